//! Loading and saving aggregates inside a transaction
//!
//! Missing records read as initial/zero values. Saving a Position or the
//! Module is a no-op unless it was modified, and also refreshes the derived
//! per-asset [`Balance`] records so readers of `balances:*` see the same
//! available/locked/supplied figures.

use crate::{
    records::{decode_balance, keys, InterestRecord, Record},
    storage::KvTransaction,
    AssetId, Balance, Error, Module, Position, Result,
};
use std::collections::BTreeSet;

/// Load a user's position, or an initial one if none is persisted
pub fn load_position(txn: &mut dyn KvTransaction, user_id: &str) -> Result<Position> {
    if user_id.is_empty() {
        return Err(Error::InvalidInput("empty user id".to_string()));
    }
    match txn.get_field(&keys::user_position(user_id), keys::POSITION_FIELD)? {
        Some(json) => {
            let position = Position::load(&json)?;
            if position.user_id != user_id {
                return Err(Error::InvalidData(format!(
                    "position record of {} holds {}",
                    user_id, position.user_id
                )));
            }
            Ok(position)
        }
        None => Ok(Position::initial(user_id)),
    }
}

/// Persist a modified position and refresh its balance record
pub fn save_position(txn: &mut dyn KvTransaction, position: &mut Position) -> Result<bool> {
    if !position.is_modified() {
        return Ok(false);
    }
    let user_id = position.user_id.clone();
    let json = position.snapshot()?;
    txn.put_fields(
        &keys::user_position(&user_id),
        Record::from([(keys::POSITION_FIELD.to_string(), json)]),
    )?;

    let balances_key = keys::user_balances(&user_id);
    let existing = txn.get_all(&balances_key)?;
    let mut assets: BTreeSet<AssetId> = existing
        .keys()
        .map(|field| AssetId::new(field.as_str()))
        .collect::<Result<_>>()?;
    for source in [position.owned(), position.locked(), position.supplied()] {
        assets.extend(source.iter().map(|(asset, _)| asset.clone()));
    }

    let mut fields = Record::new();
    for asset in assets {
        let mut balance = decode_balance(&asset, existing.get(asset.as_str()).map(String::as_str))?;
        let view = position.balance(&asset);
        balance.available = view.available;
        balance.locked = view.locked;
        balance.supplied = view.supplied;
        fields.insert(asset.to_string(), balance.to_json()?);
    }
    if !fields.is_empty() {
        txn.put_fields(&balances_key, fields)?;
    }
    Ok(true)
}

/// Load the module, or an initial one if none is persisted
pub fn load_module(txn: &mut dyn KvTransaction) -> Result<Module> {
    match txn.get_field(keys::MODULE_POSITION, keys::MODULE_FIELD)? {
        Some(json) => Module::load(&json),
        None => Ok(Module::initial()),
    }
}

/// Persist a modified module and refresh `balances:modules`
pub fn save_module(txn: &mut dyn KvTransaction, module: &mut Module) -> Result<bool> {
    if !module.is_modified() {
        return Ok(false);
    }
    let json = module.snapshot()?;
    txn.put_fields(
        keys::MODULE_POSITION,
        Record::from([(keys::MODULE_FIELD.to_string(), json)]),
    )?;

    let existing = txn.get_all(keys::MODULE_BALANCES)?;
    let mut assets: BTreeSet<AssetId> = existing
        .keys()
        .map(|field| AssetId::new(field.as_str()))
        .collect::<Result<_>>()?;
    for source in [module.balances(), module.supplied(), module.borrowed(), module.virtual_debt()] {
        assets.extend(source.iter().map(|(asset, _)| asset.clone()));
    }

    let mut fields = Record::new();
    for asset in assets {
        fields.insert(asset.to_string(), module.balance(&asset).to_json()?);
    }
    if !fields.is_empty() {
        txn.put_fields(keys::MODULE_BALANCES, fields)?;
    }
    Ok(true)
}

/// Load one asset of a user's balance record; missing reads as zero
pub fn load_balance(txn: &mut dyn KvTransaction, user_id: &str, asset: &AssetId) -> Result<Balance> {
    let field = txn.get_field(&keys::user_balances(user_id), asset.as_str())?;
    decode_balance(asset, field.as_deref())
}

/// Write one asset of a user's balance record
pub fn save_balance(txn: &mut dyn KvTransaction, user_id: &str, balance: &Balance) -> Result<()> {
    let asset = balance.asset_id()?;
    txn.put_fields(
        &keys::user_balances(user_id),
        Record::from([(asset.to_string(), balance.to_json()?)]),
    )
}

/// Load an interest record by key
pub fn load_interest(txn: &mut dyn KvTransaction, key: &str) -> Result<InterestRecord> {
    InterestRecord::from_record(&txn.get_all(key)?)
}

/// Write an interest record by key
pub fn save_interest(txn: &mut dyn KvTransaction, key: &str, record: &InterestRecord) -> Result<()> {
    txn.put_fields(key, record.to_record()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use crate::Amount;

    fn usd(q: u64) -> Amount {
        Amount::parse("USD", q).unwrap()
    }

    #[test]
    fn test_missing_records_read_as_initial() {
        let store = MemoryStore::new();
        let mut txn = store.watch(&[]).unwrap();
        let position = load_position(txn.as_mut(), "alice").unwrap();
        assert_eq!(position.sequence(), 0);
        assert!(!position.is_modified());
        assert_eq!(load_module(txn.as_mut()).unwrap(), Module::initial());
        let balance = load_balance(txn.as_mut(), "alice", &AssetId::new("USD").unwrap()).unwrap();
        assert!(balance.is_zero());
    }

    #[test]
    fn test_save_position_refreshes_balances() {
        let store = MemoryStore::new();
        let mut txn = store.watch(&[]).unwrap();
        let mut position = load_position(txn.as_mut(), "alice").unwrap();
        position.add(&usd(100)).unwrap();
        position.lock(&usd(30)).unwrap();
        assert!(save_position(txn.as_mut(), &mut position).unwrap());
        assert!(!save_position(txn.as_mut(), &mut position).unwrap());
        txn.commit().unwrap();

        let balances = store.get_all("balances:users:alice");
        assert_eq!(
            balances["USD"],
            r#"{"available":70,"borrowed":0,"collateral":0,"supplied":0,"virtual":0,"locked":30}"#
        );

        let mut txn = store.watch(&[]).unwrap();
        let reloaded = load_position(txn.as_mut(), "alice").unwrap();
        assert_eq!(reloaded.sequence(), 1);
        assert_eq!(reloaded.available(&AssetId::new("USD").unwrap()), 70);
    }

    #[test]
    fn test_emptied_asset_written_as_zero() {
        let store = MemoryStore::new();
        let mut txn = store.watch(&[]).unwrap();
        let mut position = load_position(txn.as_mut(), "bob").unwrap();
        position.add(&usd(5)).unwrap();
        save_position(txn.as_mut(), &mut position).unwrap();
        position.sub(&usd(5)).unwrap();
        save_position(txn.as_mut(), &mut position).unwrap();
        txn.commit().unwrap();

        let mut txn = store.watch(&[]).unwrap();
        let balance = load_balance(txn.as_mut(), "bob", &AssetId::new("USD").unwrap()).unwrap();
        assert!(balance.is_zero());
    }

    #[test]
    fn test_mismatched_position_record() {
        let store = MemoryStore::new();
        let mut txn = store.watch(&[]).unwrap();
        txn.put_fields(
            "positions:users:alice",
            Record::from([("position".to_string(), r#"{"user_id":"mallory"}"#.to_string())]),
        )
        .unwrap();
        assert!(matches!(load_position(txn.as_mut(), "alice"), Err(Error::InvalidData(_))));
    }
}
