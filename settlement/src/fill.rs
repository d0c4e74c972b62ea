//! Order fill iteration
//!
//! [`FillIterator`] walks a snapshot of one side of one book. `next()`
//! keeps returning the same order until it is filled or cancelled, so a
//! caller can loop on it without skipping a partial fill. An order whose
//! fillable remainder has dropped to zero is cancelled on the spot and its
//! unspent reservation released.
//!
//! Each fill is all-or-nothing: orders and positions are updated on copies
//! and committed together once every step has succeeded.

use crate::{
    order::{quote_for, Book, Order, OrderStatus, Side},
    record::{Counterparty, TransactionRecord},
    stablecoin::{self, Conversion},
    tracker::PositionTracker,
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{Amount, AssetRegistry, Position};
use pool_engine::{executed_price, Pool};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

/// Reason recorded on orders cancelled for having nothing left to fill
pub const DUST_CANCEL_REASON: &str = "fillable remainder is zero";

/// Activate stablecoin cover if needed, then reserve what the order needs
pub fn lock_for_order(position: &mut Position, order: &Order, registry: &AssetRegistry) -> Result<Vec<Conversion>> {
    if position.user_id != order.user_id {
        return Err(Error::InvalidInput(format!(
            "order {} belongs to {}, not {}",
            order.order_id, order.user_id, position.user_id
        )));
    }
    let reservation = order.reservation()?;
    let mut staged = position.clone();
    let conversions = stablecoin::activate(&mut staged, &reservation, registry)?;
    staged.lock(&reservation)?;
    *position = staged;
    Ok(conversions)
}

/// What a finished pass hands back
#[derive(Debug)]
pub struct FillOutcome {
    /// Orders with their updated fills and statuses
    pub orders: Vec<Order>,
    /// Positions touched, ready to save
    pub tracker: PositionTracker,
    /// One record per fill
    pub records: Vec<TransactionRecord>,
}

/// Cursor over resting orders of one book side
#[derive(Debug)]
pub struct FillIterator<'r> {
    book: Book,
    side: Side,
    orders: Vec<Order>,
    cursor: usize,
    page_full: bool,
    registry: &'r AssetRegistry,
    tracker: PositionTracker,
    records: Vec<TransactionRecord>,
}

impl<'r> FillIterator<'r> {
    /// Iterate `orders`, read as one page of at most `page_size`
    ///
    /// Every order must belong to `book` and `side`; the tracker must hold
    /// the position of every user the pass will touch.
    pub fn new(
        book: Book,
        side: Side,
        orders: Vec<Order>,
        page_size: usize,
        registry: &'r AssetRegistry,
        tracker: PositionTracker,
    ) -> Result<Self> {
        if let Some(stray) = orders.iter().find(|o| o.book != book || o.side != side) {
            return Err(Error::InvalidInput(format!(
                "order {} is {:?} on {}, iterator is {:?} on {}",
                stray.order_id, stray.side, stray.book, side, book
            )));
        }
        Ok(Self {
            page_full: page_size > 0 && orders.len() >= page_size,
            book,
            side,
            orders,
            cursor: 0,
            registry,
            tracker,
            records: Vec::new(),
        })
    }

    /// Current order, or `None` once the snapshot is exhausted
    pub fn next(&mut self) -> Result<Option<&Order>> {
        while self.cursor < self.orders.len() {
            let idx = self.cursor;
            if self.orders[idx].status.is_terminal() {
                self.cursor += 1;
                continue;
            }
            if self.orders[idx].fillable_base() == 0 {
                self.auto_cancel(idx)?;
                self.cursor += 1;
                continue;
            }
            return Ok(Some(&self.orders[idx]));
        }
        Ok(None)
    }

    /// Fill the current order by swapping `amount_in` through `pool`
    ///
    /// A sell order pays in base, a buy order pays in quote. The swap must
    /// respect the order's limit price and remainder.
    pub fn fill_with_swap(&mut self, pool: &mut Pool, amount_in: u64, now: DateTime<Utc>) -> Result<&TransactionRecord> {
        let idx = self.current_index()?;
        if pool.base_asset != self.book.base || pool.quote_asset != self.book.quote {
            return Err(Error::InvalidInput(format!(
                "pool {} does not trade {}",
                pool.pool_id, self.book
            )));
        }
        let order = &self.orders[idx];
        let asset_in = match self.side {
            Side::Sell => self.book.base.clone(),
            Side::Buy => self.book.quote.clone(),
        };
        let quote = pool.quote_swap(&asset_in, amount_in, now)?;
        let (base, quote_amount) = match self.side {
            Side::Sell => (amount_in, quote.amount_out),
            Side::Buy => (quote.amount_out, amount_in),
        };
        self.check_fill(order, base, quote_amount)?;

        let mut updated = order.clone();
        updated.record_fill(base, quote_amount)?;
        let price = self.price(base, quote_amount)?;

        let pos_idx = self.tracker.index_of(&order.user_id)?;
        let before = self.tracker.at(pos_idx)?.clone();
        let mut position = before.clone();
        let spent = Amount::new(asset_in, amount_in);
        position.unlock(&spent)?;
        position.sub(&spent)?;
        position.add(&Amount::new(quote.asset_out.clone(), quote.amount_out))?;
        self.finish(&mut position, &updated)?;

        let mut staged_pool = pool.clone();
        staged_pool.apply_swap(&quote)?;

        *pool = staged_pool;
        *self.tracker.at_mut(pos_idx)? = position.clone();
        self.orders[idx] = updated;

        let order = &self.orders[idx];
        debug!(
            order_id = %order.order_id,
            pool_id = %pool.pool_id,
            base,
            quote = quote_amount,
            "Order filled against pool"
        );
        let record = TransactionRecord {
            record_id: Uuid::now_v7(),
            order_id: order.order_id,
            user_id: order.user_id.clone(),
            counterparty: Counterparty::Pool {
                pool_id: pool.pool_id.clone(),
                fee: quote.fee,
                fee_asset: quote.fee_asset.clone(),
            },
            base_asset: self.book.base.clone(),
            quote_asset: self.book.quote.clone(),
            amount_base: base,
            amount_quote: quote_amount,
            executed_price: price,
            before: vec![before],
            after: vec![position],
            created_at: now,
        };
        Ok(self.emit(record))
    }

    /// Fill `base` of the current order against an incoming counter order
    ///
    /// Trades at the resting order's price, quote rounded down.
    pub fn fill_with_counter_order(&mut self, counter: &mut Order, base: u64) -> Result<&TransactionRecord> {
        let idx = self.current_index()?;
        let resting = &self.orders[idx];
        if counter.book != self.book || counter.side != self.side.opposite() {
            return Err(Error::InvalidInput(format!(
                "counter order {} is {:?} on {}",
                counter.order_id, counter.side, counter.book
            )));
        }
        let quote_amount = quote_for(base, resting.price, false)?;
        self.check_fill(resting, base, quote_amount)?;
        self.check_fill(counter, base, quote_amount)?;

        let mut resting_updated = resting.clone();
        resting_updated.record_fill(base, quote_amount)?;
        let mut counter_updated = counter.clone();
        counter_updated.record_fill(base, quote_amount)?;
        let price = self.price(base, quote_amount)?;

        let resting_idx = self.tracker.index_of(&resting.user_id)?;
        let counter_idx = self.tracker.index_of(&counter.user_id)?;
        if resting_idx == counter_idx {
            return Err(Error::InvalidInput(format!(
                "{} cannot fill their own order",
                resting.user_id
            )));
        }
        let before = vec![
            self.tracker.at(resting_idx)?.clone(),
            self.tracker.at(counter_idx)?.clone(),
        ];
        let mut resting_position = before[0].clone();
        let mut counter_position = before[1].clone();

        let base_leg = Amount::new(self.book.base.clone(), base);
        let quote_leg = Amount::new(self.book.quote.clone(), quote_amount);
        {
            let (seller, buyer) = match self.side {
                Side::Sell => (&mut resting_position, &mut counter_position),
                Side::Buy => (&mut counter_position, &mut resting_position),
            };
            seller.unlock(&base_leg)?;
            seller.sub(&base_leg)?;
            seller.add(&quote_leg)?;
            buyer.unlock(&quote_leg)?;
            buyer.sub(&quote_leg)?;
            buyer.add(&base_leg)?;
        }
        self.finish(&mut resting_position, &resting_updated)?;
        self.finish(&mut counter_position, &counter_updated)?;

        let (resting_slot, counter_slot) = self.tracker.pair_mut(resting_idx, counter_idx)?;
        *resting_slot = resting_position.clone();
        *counter_slot = counter_position.clone();
        self.orders[idx] = resting_updated;
        *counter = counter_updated;

        let order = &self.orders[idx];
        debug!(
            order_id = %order.order_id,
            counter_order_id = %counter.order_id,
            base,
            quote = quote_amount,
            "Order filled against counter order"
        );
        let record = TransactionRecord {
            record_id: Uuid::now_v7(),
            order_id: order.order_id,
            user_id: order.user_id.clone(),
            counterparty: Counterparty::Order {
                order_id: counter.order_id,
                user_id: counter.user_id.clone(),
            },
            base_asset: self.book.base.clone(),
            quote_asset: self.book.quote.clone(),
            amount_base: base,
            amount_quote: quote_amount,
            executed_price: price,
            before,
            after: vec![resting_position, counter_position],
            created_at: Utc::now(),
        };
        Ok(self.emit(record))
    }

    /// Every order has been visited
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.orders.len()
    }

    /// Exhausted, and the snapshot filled its page: more orders may exist
    pub fn exhausted_by_page_limit(&self) -> bool {
        self.is_exhausted() && self.page_full
    }

    /// Orders in snapshot order
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Records emitted so far
    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    /// Tracked positions
    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Finish the pass
    pub fn into_outcome(self) -> FillOutcome {
        FillOutcome {
            orders: self.orders,
            tracker: self.tracker,
            records: self.records,
        }
    }

    fn current_index(&self) -> Result<usize> {
        match self.orders.get(self.cursor) {
            Some(order) if order.fillable_base() > 0 => Ok(self.cursor),
            _ => Err(Error::InvalidInput("no fillable current order".to_string())),
        }
    }

    fn check_fill(&self, order: &Order, base: u64, quote: u64) -> Result<()> {
        if base == 0 || quote == 0 {
            return Err(Error::InvalidInput(format!(
                "empty fill of {} base for {} quote",
                base, quote
            )));
        }
        if base > order.fillable_base() {
            return Err(Error::InvalidInput(format!(
                "fill of {} exceeds fillable {} on order {}",
                base,
                order.fillable_base(),
                order.order_id
            )));
        }
        if !order.accepts(base, quote) {
            return Err(Error::InvalidInput(format!(
                "{} base for {} quote breaches limit {} of order {}",
                base, quote, order.price, order.order_id
            )));
        }
        Ok(())
    }

    fn price(&self, base: u64, quote: u64) -> Result<Decimal> {
        Ok(executed_price(
            base,
            self.registry.decimals(&self.book.base)?,
            quote,
            self.registry.decimals(&self.book.quote)?,
        )?)
    }

    /// Release a finished order's unspent reservation, then net stablecoins
    fn finish(&self, position: &mut Position, order: &Order) -> Result<()> {
        if order.status == OrderStatus::Filled {
            position.unlock(&order.remaining_reservation()?)?;
        }
        stablecoin::cleanup(position, self.registry)?;
        Ok(())
    }

    fn auto_cancel(&mut self, idx: usize) -> Result<()> {
        let order = &mut self.orders[idx];
        let remainder = order.remaining_reservation()?;
        let pos_idx = self.tracker.index_of(&order.user_id)?;
        self.tracker.at_mut(pos_idx)?.unlock(&remainder)?;
        order.cancel(DUST_CANCEL_REASON);
        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            released = %remainder,
            reason = DUST_CANCEL_REASON,
            "Order auto-cancelled"
        );
        Ok(())
    }

    fn emit(&mut self, record: TransactionRecord) -> &TransactionRecord {
        let n = self.records.len();
        self.records.push(record);
        &self.records[n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{config::asset, AssetId, AssetUsage};
    use std::str::FromStr;

    fn registry() -> AssetRegistry {
        AssetRegistry::new([
            asset("BOND", 0, false, AssetUsage::default()).unwrap(),
            asset("USD", 2, true, AssetUsage::default()).unwrap(),
            asset("USDC", 6, true, AssetUsage::default()).unwrap(),
        ])
    }

    fn book() -> Book {
        Book {
            base: AssetId::new("BOND").unwrap(),
            quote: AssetId::new("USD").unwrap(),
        }
    }

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    fn amt(asset: &str, q: u64) -> Amount {
        Amount::parse(asset, q).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Fund a user, place an order and reserve for it
    fn placed(tracker: &mut PositionTracker, user: &str, funds: &[(&str, u64)], side: Side, price: &str, qty: u64) -> Order {
        let mut position = tracker.get(user).cloned().unwrap_or_else(|| Position::initial(user));
        for (asset, q) in funds {
            position.add(&amt(asset, *q)).unwrap();
        }
        let order = Order::new(user, book(), side, dec(price), qty).unwrap();
        lock_for_order(&mut position, &order, &registry()).unwrap();
        tracker.insert(position);
        order
    }

    fn position<'a>(fills: &'a FillIterator<'_>, user: &str) -> &'a Position {
        fills.tracker().get(user).unwrap()
    }

    #[test]
    fn test_next_repeats_until_filled() {
        let registry = registry();
        let mut tracker = PositionTracker::new();
        let sell = placed(&mut tracker, "alice", &[("BOND", 10)], Side::Sell, "100", 10);
        let mut buy = placed(&mut tracker, "bob", &[("USD", 2_000)], Side::Buy, "100", 15);

        let mut fills = FillIterator::new(book(), Side::Sell, vec![sell.clone()], 10, &registry, tracker).unwrap();
        assert_eq!(fills.next().unwrap().unwrap().order_id, sell.order_id);
        let record = fills.fill_with_counter_order(&mut buy, 4).unwrap();
        assert_eq!((record.amount_base, record.amount_quote), (4, 400));
        assert_eq!(record.executed_price, Decimal::ONE);
        assert_eq!(record.before[0].available(&id("BOND")), 0);
        assert_eq!(record.after[0].locked().get(&id("BOND")), 6);

        // same order again, with the remainder
        let current = fills.next().unwrap().unwrap();
        assert_eq!(current.order_id, sell.order_id);
        assert_eq!(current.fillable_base(), 6);

        fills.fill_with_counter_order(&mut buy, 6).unwrap();
        assert!(fills.next().unwrap().is_none());
        assert!(fills.is_exhausted());
        assert!(!fills.exhausted_by_page_limit());
        assert_eq!(fills.records().len(), 2);

        let alice = position(&fills, "alice");
        assert_eq!(alice.owned().get(&id("BOND")), 0);
        assert_eq!(alice.owned().get(&id("USD")), 1_000);
        assert!(alice.locked().is_empty());

        // bob's order is 10 of 15 filled, the rest stays reserved
        let bob = position(&fills, "bob");
        assert_eq!(bob.owned().get(&id("BOND")), 10);
        assert_eq!(bob.locked().get(&id("USD")), 500);
        assert_eq!(bob.available(&id("USD")), 500);
        assert_eq!(buy.status, OrderStatus::PartiallyFilled);

        let outcome = fills.into_outcome();
        assert_eq!(outcome.orders[0].status, OrderStatus::Filled);
    }

    #[test]
    fn test_dust_order_is_cancelled_and_released() {
        let registry = registry();
        let mut tracker = PositionTracker::new();
        let mut dusty = placed(&mut tracker, "bob", &[("USD", 100)], Side::Buy, "10", 3);
        // an earlier fill left 5 quote, too little for one unit at 10
        dusty.record_fill(2, 25).unwrap();
        let live = placed(&mut tracker, "carol", &[("USD", 100)], Side::Buy, "10", 1);

        let mut fills = FillIterator::new(book(), Side::Buy, vec![dusty.clone(), live.clone()], 2, &registry, tracker).unwrap();
        assert_eq!(fills.next().unwrap().unwrap().order_id, live.order_id);
        assert_eq!(
            fills.orders()[0].status,
            OrderStatus::Cancelled(DUST_CANCEL_REASON.to_string())
        );
        // 30 reserved, 5 released
        assert_eq!(position(&fills, "bob").locked().get(&id("USD")), 25);

        fills.orders.get_mut(1).unwrap().cancel("withdrawn");
        assert!(fills.next().unwrap().is_none());
        assert!(fills.exhausted_by_page_limit());
    }

    #[test]
    fn test_fill_with_swap() {
        let registry = registry();
        let mut tracker = PositionTracker::new();
        let sell = placed(&mut tracker, "alice", &[("BOND", 10)], Side::Sell, "90", 10);
        let greedy = placed(&mut tracker, "dave", &[("BOND", 10)], Side::Sell, "200", 10);
        let mut pool = Pool::product(id("BOND"), id("USD"), Decimal::ZERO, Decimal::ONE, Utc::now()).unwrap();
        pool.amount_base = 1_000;
        pool.amount_quote = 100_000;
        pool.shares = 101_000;

        let mut fills = FillIterator::new(book(), Side::Sell, vec![sell, greedy], 0, &registry, tracker).unwrap();
        fills.next().unwrap();
        let record = fills.fill_with_swap(&mut pool, 10, Utc::now()).unwrap();
        // 100_000 × 10 / 1_010
        assert_eq!(record.amount_quote, 990);
        assert!(matches!(record.counterparty, Counterparty::Pool { fee: 0, .. }));
        assert_eq!((pool.amount_base, pool.amount_quote), (1_010, 99_010));
        assert_eq!(position(&fills, "alice").owned().get(&id("USD")), 990);
        assert!(position(&fills, "alice").locked().is_empty());

        // 10 BOND now fetch well under 200 each
        fills.next().unwrap();
        let err = fills.fill_with_swap(&mut pool, 10, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!((pool.amount_base, pool.amount_quote), (1_010, 99_010));
        assert_eq!(position(&fills, "dave").locked().get(&id("BOND")), 10);
        assert_eq!(fills.records().len(), 1);
    }

    #[test]
    fn test_stablecoin_cover_is_netted_back() {
        let registry = registry();
        let mut tracker = PositionTracker::new();
        let sell = placed(&mut tracker, "alice", &[("BOND", 1)], Side::Sell, "800", 1);
        // carol pays in USD but only holds USDC: 10.00 USD covered
        let mut buy = placed(&mut tracker, "carol", &[("USDC", 20_000_000)], Side::Buy, "1000", 1);
        let carol = tracker.get("carol").unwrap();
        assert_eq!(carol.locked().get(&id("USD")), 1_000);
        assert_eq!(carol.owned().get(&id("USDC")), 10_000_000);

        let mut fills = FillIterator::new(book(), Side::Sell, vec![sell], 10, &registry, tracker).unwrap();
        fills.next().unwrap();
        fills.fill_with_counter_order(&mut buy, 1).unwrap();

        // 8.00 spent; the unspent 2.00 goes back to USDC
        let carol = position(&fills, "carol");
        assert_eq!(carol.owned().get(&id("BOND")), 1);
        assert_eq!(carol.owned().get(&id("USD")), 0);
        assert_eq!(carol.owned().get(&id("USDC")), 12_000_000);
        assert_eq!(carol.sseq().get(&id("USD")), 800);
        assert_eq!(carol.sseq().get(&id("USDC")), -8_000_000);
        assert!(carol.locked().is_empty());
    }

    #[test]
    fn test_rejects_self_trade_and_wrong_side() {
        let registry = registry();
        let mut tracker = PositionTracker::new();
        let sell = placed(&mut tracker, "alice", &[("BOND", 5)], Side::Sell, "100", 5);
        let mut own_buy = placed(&mut tracker, "alice", &[("USD", 1_000)], Side::Buy, "100", 5);
        let mut other_sell = placed(&mut tracker, "bob", &[("BOND", 5)], Side::Sell, "100", 5);

        assert!(FillIterator::new(book(), Side::Buy, vec![sell.clone()], 0, &registry, PositionTracker::new()).is_err());

        let mut fills = FillIterator::new(book(), Side::Sell, vec![sell], 0, &registry, tracker).unwrap();
        assert!(fills.fill_with_counter_order(&mut own_buy, 1).is_err());
        fills.next().unwrap();
        assert!(fills.fill_with_counter_order(&mut own_buy, 1).is_err());
        assert!(fills.fill_with_counter_order(&mut other_sell, 1).is_err());
        assert!(fills.records().is_empty());
        assert_eq!(own_buy.filled_base, 0);
    }
}
