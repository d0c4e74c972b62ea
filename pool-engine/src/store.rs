//! Pool records inside a transaction

use crate::{Pool, Result};
use ledger_core::{records::keys, KvTransaction};

/// Load a pool, `None` if it was never created
pub fn load_pool(txn: &mut dyn KvTransaction, pool_id: &str) -> Result<Option<Pool>> {
    let record = txn.get_all(&keys::pool(pool_id))?;
    if record.is_empty() {
        return Ok(None);
    }
    Pool::from_record(&record).map(Some)
}

/// Write every pool field
pub fn save_pool(txn: &mut dyn KvTransaction, pool: &Pool) -> Result<()> {
    txn.put_fields(&keys::pool(pool.pool_id.as_str()), pool.to_record())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::{AssetId, KvStore, MemoryStore};
    use rust_decimal::Decimal;

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let mut pool = Pool::product(
            AssetId::new("BOND").unwrap(),
            AssetId::new("USD").unwrap(),
            Decimal::new(3, 3),
            Decimal::ONE,
            Utc::now(),
        )
        .unwrap();
        pool.amount_base = 7;

        let mut txn = store.watch(&[]).unwrap();
        assert!(load_pool(&mut *txn, "BOND-USD").unwrap().is_none());
        save_pool(&mut *txn, &pool).unwrap();
        txn.commit().unwrap();

        let mut txn = store.watch(&[]).unwrap();
        let loaded = load_pool(&mut *txn, "BOND-USD").unwrap().unwrap();
        // RFC3339 keeps sub-second precision
        assert_eq!(loaded, pool);
    }
}
