//! The matching engine: two price ladders, two stop ladders, and the
//! indices that make cancel/modify O(1) and best-price lookup O(1).
//!
//! Ladders are `BTreeMap<price, Limit>` — ordered so the best price is a
//! `first_key_value`/`last_key_value` lookup away. Each price level uses
//! the intrusive `Limit` (see `limit.rs`) instead of a plain `VecDeque`,
//! so cancelling an order in the middle of a busy price level is O(1)
//! instead of O(n).

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use tracing::{debug, trace};

use crate::errors::{BookError, BookResult};
use crate::limit::{Limit, LimitHandle};
use crate::orders::{Order, OrderClass, OrderType, Side};
use crate::trade::{ExecutionOutcome, SubmitResult, Trade};

/// Where a live order is resting: which ladder, at which price, and its
/// handle within that price's `Limit`. Erased the moment the order
/// terminates; never outlives the slot it points at.
#[derive(Clone, Copy)]
struct Location {
    side: Side,
    price: u64,
    handle: LimitHandle,
}

/// The single-symbol limit order book.
pub struct OrderBook {
    bids: BTreeMap<u64, Limit>,
    asks: BTreeMap<u64, Limit>,
    buy_stops: BTreeMap<u64, Limit>,
    sell_stops: BTreeMap<u64, Limit>,
    limit_index: HashMap<u64, Location>,
    stop_index: HashMap<u64, Location>,
    stop_limit_index: HashMap<u64, Location>,
    last_trade_price: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            buy_stops: BTreeMap::new(),
            sell_stops: BTreeMap::new(),
            limit_index: HashMap::new(),
            stop_index: HashMap::new(),
            stop_limit_index: HashMap::new(),
            last_trade_price: 0,
        }
    }

    // ---- read-only queries ----------------------------------------------

    pub fn get_best_bid_price(&self) -> u64 {
        self.bids.keys().next_back().copied().unwrap_or(0)
    }

    pub fn get_best_ask_price(&self) -> u64 {
        self.asks.keys().next().copied().unwrap_or(0)
    }

    pub fn last_trade_price(&self) -> u64 {
        self.last_trade_price
    }

    pub fn volume_at(&self, side: Side, price: u64) -> u64 {
        let ladder = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        ladder.get(&price).map(Limit::total_volume).unwrap_or(0)
    }

    fn is_live(&self, id: u64) -> bool {
        self.limit_index.contains_key(&id)
            || self.stop_index.contains_key(&id)
            || self.stop_limit_index.contains_key(&id)
    }

    // ---- order entry -----------------------------------------------------

    pub fn market_order(&mut self, id: u64, side: Side, shares: u64) -> BookResult<SubmitResult> {
        self.validate_new_order(id, shares)?;
        let trades = self.match_against(side, id, shares, None);
        trace!(id, shares, fills = trades.len(), "market order matched");
        let aggressor = ExecutionOutcome {
            order_id: id,
            side,
            trades,
            leaves_qty: 0,
            rested: false,
        };
        let triggered = self.cascade_if_traded(&aggressor);
        Ok(SubmitResult {
            aggressor,
            triggered,
        })
    }

    pub fn add_limit_order(
        &mut self,
        id: u64,
        side: Side,
        shares: u64,
        price: u64,
    ) -> BookResult<SubmitResult> {
        self.validate_new_order(id, shares)?;
        if price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "price must be > 0".into(),
            });
        }
        self.add_limit_order_unchecked(id, side, shares, price)
    }

    fn add_limit_order_unchecked(
        &mut self,
        id: u64,
        side: Side,
        shares: u64,
        price: u64,
    ) -> BookResult<SubmitResult> {
        let trades = self.match_against(side, id, shares, Some(price));
        let filled: u64 = trades.iter().map(|t| t.quantity).sum();
        let remaining = shares - filled;
        let rested = remaining > 0;
        if rested {
            self.rest_limit(id, side, remaining, price);
        }
        debug!(id, price, filled, remaining, "limit order processed");
        let aggressor = ExecutionOutcome {
            order_id: id,
            side,
            trades,
            leaves_qty: remaining,
            rested,
        };
        let triggered = self.cascade_if_traded(&aggressor);
        Ok(SubmitResult {
            aggressor,
            triggered,
        })
    }

    pub fn add_stop_order(
        &mut self,
        id: u64,
        side: Side,
        shares: u64,
        stop_price: u64,
    ) -> BookResult<()> {
        self.validate_new_order(id, shares)?;
        if stop_price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "stop price must be > 0".into(),
            });
        }
        self.rest_stop(
            Order {
                id,
                side,
                order_type: OrderType::Stop,
                shares,
                limit_price: None,
                stop_price: Some(stop_price),
            },
            OrderClass::Stop,
        );
        Ok(())
    }

    pub fn add_stop_limit_order(
        &mut self,
        id: u64,
        side: Side,
        shares: u64,
        limit_price: u64,
        stop_price: u64,
    ) -> BookResult<()> {
        self.validate_new_order(id, shares)?;
        if limit_price == 0 || stop_price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "limit and stop price must be > 0".into(),
            });
        }
        self.rest_stop(
            Order {
                id,
                side,
                order_type: OrderType::StopLimit,
                shares,
                limit_price: Some(limit_price),
                stop_price: Some(stop_price),
            },
            OrderClass::StopLimit,
        );
        Ok(())
    }

    fn validate_new_order(&self, id: u64, shares: u64) -> BookResult<()> {
        if shares == 0 {
            return Err(BookError::InvalidRequest {
                reason: "shares must be > 0".into(),
            });
        }
        if self.is_live(id) {
            return Err(BookError::DuplicateId { id });
        }
        Ok(())
    }

    // ---- cancel / modify --------------------------------------------------

    pub fn cancel_limit_order(&mut self, id: u64) -> BookResult<()> {
        self.remove_limit_entry(id)?;
        Ok(())
    }

    pub fn modify_limit_order(
        &mut self,
        id: u64,
        new_shares: u64,
        new_price: u64,
    ) -> BookResult<SubmitResult> {
        if new_shares == 0 {
            return Err(BookError::InvalidRequest {
                reason: "shares must be > 0".into(),
            });
        }
        if new_price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "price must be > 0".into(),
            });
        }
        let side = self.remove_limit_entry(id)?;
        self.add_limit_order_unchecked(id, side, new_shares, new_price)
    }

    pub fn cancel_stop_order(&mut self, id: u64) -> BookResult<()> {
        self.remove_stop_entry(id, OrderClass::Stop)?;
        Ok(())
    }

    pub fn modify_stop_order(
        &mut self,
        id: u64,
        new_shares: u64,
        new_stop_price: u64,
    ) -> BookResult<()> {
        if new_shares == 0 || new_stop_price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "shares and stop price must be > 0".into(),
            });
        }
        let side = self.remove_stop_entry(id, OrderClass::Stop)?;
        self.rest_stop(
            Order {
                id,
                side,
                order_type: OrderType::Stop,
                shares: new_shares,
                limit_price: None,
                stop_price: Some(new_stop_price),
            },
            OrderClass::Stop,
        );
        Ok(())
    }

    pub fn cancel_stop_limit_order(&mut self, id: u64) -> BookResult<()> {
        self.remove_stop_entry(id, OrderClass::StopLimit)?;
        Ok(())
    }

    pub fn modify_stop_limit_order(
        &mut self,
        id: u64,
        new_shares: u64,
        new_limit_price: u64,
        new_stop_price: u64,
    ) -> BookResult<()> {
        if new_shares == 0 || new_limit_price == 0 || new_stop_price == 0 {
            return Err(BookError::InvalidRequest {
                reason: "shares, limit price and stop price must be > 0".into(),
            });
        }
        let side = self.remove_stop_entry(id, OrderClass::StopLimit)?;
        self.rest_stop(
            Order {
                id,
                side,
                order_type: OrderType::StopLimit,
                shares: new_shares,
                limit_price: Some(new_limit_price),
                stop_price: Some(new_stop_price),
            },
            OrderClass::StopLimit,
        );
        Ok(())
    }

    fn remove_limit_entry(&mut self, id: u64) -> BookResult<Side> {
        let loc = self
            .limit_index
            .remove(&id)
            .ok_or(BookError::NotFound { id })?;
        let ladder = match loc.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let limit = ladder
            .get_mut(&loc.price)
            .expect("index points at a live limit");
        limit.remove(loc.handle);
        if limit.is_empty() {
            ladder.remove(&loc.price);
        }
        Ok(loc.side)
    }

    fn remove_stop_entry(&mut self, id: u64, class: OrderClass) -> BookResult<Side> {
        let index = self.stop_index_mut(class);
        let loc = index.remove(&id).ok_or(BookError::NotFound { id })?;
        let ladder = match loc.side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        let bucket = ladder
            .get_mut(&loc.price)
            .expect("index points at a live stop bucket");
        bucket.remove(loc.handle);
        if bucket.is_empty() {
            ladder.remove(&loc.price);
        }
        Ok(loc.side)
    }

    fn stop_index_mut(&mut self, class: OrderClass) -> &mut HashMap<u64, Location> {
        match class {
            OrderClass::Stop => &mut self.stop_index,
            OrderClass::StopLimit => &mut self.stop_limit_index,
            OrderClass::Limit => &mut self.limit_index,
        }
    }

    // ---- matching core -----------------------------------------------------

    fn rest_limit(&mut self, id: u64, side: Side, shares: u64, price: u64) {
        let ladder = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let limit = ladder
            .entry(price)
            .or_insert_with(|| Limit::new(price, side));
        let handle = limit.append(Order {
            id,
            side,
            order_type: OrderType::Limit,
            shares,
            limit_price: Some(price),
            stop_price: None,
        });
        self.limit_index.insert(
            id,
            Location {
                side,
                price,
                handle,
            },
        );
    }

    fn rest_stop(&mut self, order: Order, class: OrderClass) {
        let id = order.id;
        let side = order.side;
        let price = order.stop_price.expect("stop orders carry a stop price");
        let ladder = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        let bucket = ladder
            .entry(price)
            .or_insert_with(|| Limit::new(price, side));
        let handle = bucket.append(order);
        self.stop_index_mut(class).insert(
            id,
            Location {
                side,
                price,
                handle,
            },
        );
    }

    /// Matches an aggressor against the opposite ladder. `limit_price` is
    /// `None` for market orders (unbounded feasibility) and `Some(p)` for a
    /// limit/stop-limit aggressor, which stops matching once the best
    /// opposite price is no longer feasible.
    fn match_against(
        &mut self,
        side: Side,
        taker_id: u64,
        mut remaining: u64,
        limit_price: Option<u64>,
    ) -> Vec<Trade> {
        let mut trades = Vec::new();
        while remaining > 0 {
            let opposite = match side {
                Side::Buy => &mut self.asks,
                Side::Sell => &mut self.bids,
            };
            let best_price = match side {
                Side::Buy => opposite.keys().next().copied(),
                Side::Sell => opposite.keys().next_back().copied(),
            };
            let Some(price) = best_price else { break };
            if let Some(lp) = limit_price {
                let feasible = match side {
                    Side::Buy => lp >= price,
                    Side::Sell => lp <= price,
                };
                if !feasible {
                    break;
                }
            }
            let limit = opposite
                .get_mut(&price)
                .expect("best price always has a live limit");
            let head_shares = limit
                .peek_head()
                .expect("non-empty limit has a head")
                .shares;
            let fill_qty = remaining.min(head_shares);
            let (maker_id, emptied) = limit.fill_head(fill_qty).expect("head exists");
            if emptied {
                self.limit_index.remove(&maker_id);
            }
            if limit.is_empty() {
                opposite.remove(&price);
            }
            remaining -= fill_qty;
            self.last_trade_price = price;
            trades.push(Trade {
                price,
                quantity: fill_qty,
                maker_id,
                taker_id,
            });
        }
        trades
    }

    fn cascade_if_traded(&mut self, aggressor: &ExecutionOutcome) -> Vec<ExecutionOutcome> {
        if aggressor.trades.is_empty() {
            return Vec::new();
        }
        self.process_stop_cascade()
    }

    /// Drains triggerable stop and stop-limit orders to fixpoint: buy-stops
    /// ascending while `price <= last_trade_price`, then sell-stops
    /// descending while `price >= last_trade_price`, repeating until
    /// neither side has anything left to fire. Triggering one order can
    /// itself move `last_trade_price`, which is why this loops to a
    /// fixpoint rather than making a single pass.
    fn process_stop_cascade(&mut self) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let mut fired_any = false;

            while let Some(&price) = self.buy_stops.keys().next() {
                if price > self.last_trade_price {
                    break;
                }
                fired_any |= self.fire_one_stop(Side::Buy, price, &mut outcomes);
            }

            while let Some(&price) = self.sell_stops.keys().next_back() {
                if price < self.last_trade_price {
                    break;
                }
                fired_any |= self.fire_one_stop(Side::Sell, price, &mut outcomes);
            }

            if !fired_any {
                break;
            }
        }
        outcomes
    }

    /// Fires the head order of the given trigger bucket, if any remain.
    /// Returns whether an order actually fired, so the cascade loop keeps
    /// draining a price level across repeated calls.
    fn fire_one_stop(&mut self, side: Side, price: u64, outcomes: &mut Vec<ExecutionOutcome>) -> bool {
        let ladder = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        let Some(bucket) = ladder.get_mut(&price) else {
            return false;
        };
        let Some(order) = bucket.remove_head() else {
            return false;
        };
        if bucket.is_empty() {
            ladder.remove(&price);
        }

        let outcome = match order.order_type {
            OrderType::Stop => {
                self.stop_index.remove(&order.id);
                debug!(id = order.id, price, "stop triggered -> market order");
                let trades = self.match_against(order.side, order.id, order.shares, None);
                ExecutionOutcome {
                    order_id: order.id,
                    side: order.side,
                    trades,
                    leaves_qty: 0,
                    rested: false,
                }
            }
            OrderType::StopLimit => {
                self.stop_limit_index.remove(&order.id);
                let limit_price = order
                    .limit_price
                    .expect("stop-limit orders carry a limit price");
                debug!(id = order.id, price, limit_price, "stop-limit triggered -> limit order");
                let trades =
                    self.match_against(order.side, order.id, order.shares, Some(limit_price));
                let filled: u64 = trades.iter().map(|t| t.quantity).sum();
                let remaining = order.shares - filled;
                let rested = remaining > 0;
                if rested {
                    self.rest_limit(order.id, order.side, remaining, limit_price);
                }
                ExecutionOutcome {
                    order_id: order.id,
                    side: order.side,
                    trades,
                    leaves_qty: remaining,
                    rested,
                }
            }
            OrderType::Market | OrderType::Limit => {
                unreachable!("stop ladders only ever hold Stop/StopLimit orders")
            }
        };
        outcomes.push(outcome);
        true
    }

    // ---- load-testing surface consumed by external order generators -----

    pub fn get_random_order(&self, class: OrderClass, rng: &mut impl Rng) -> Option<Order> {
        let index = match class {
            OrderClass::Limit => &self.limit_index,
            OrderClass::Stop => &self.stop_index,
            OrderClass::StopLimit => &self.stop_limit_index,
        };
        if index.is_empty() {
            return None;
        }
        // Reservoir sampling of size 1: a single pass, uniform over the
        // live ids, without collecting them into a temporary Vec first.
        let mut chosen: Option<u64> = None;
        for (i, id) in index.keys().enumerate() {
            if rng.random_range(0..=i) == 0 {
                chosen = Some(*id);
            }
        }
        let id = chosen?;
        let loc = *index.get(&id)?;
        let ladder = match class {
            OrderClass::Limit => match loc.side {
                Side::Buy => &self.bids,
                Side::Sell => &self.asks,
            },
            OrderClass::Stop | OrderClass::StopLimit => match loc.side {
                Side::Buy => &self.buy_stops,
                Side::Sell => &self.sell_stops,
            },
        };
        ladder.get(&loc.price)?.get(loc.handle).cloned()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        OrderBook::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resting_limit_then_market_fills_it() {
        let mut book = OrderBook::new();
        let r1 = book.add_limit_order(1, Side::Sell, 50, 151).unwrap();
        assert!(r1.aggressor.trades.is_empty());
        assert!(r1.aggressor.rested);

        let r2 = book.market_order(2, Side::Buy, 30).unwrap();
        assert_eq!(r2.aggressor.cum_qty(), 30);
        assert_eq!(r2.aggressor.avg_px(), 151.0);
        assert_eq!(book.get_best_ask_price(), 151);
        assert_eq!(book.get_best_bid_price(), 0);
        assert_eq!(book.volume_at(Side::Sell, 151), 20);
    }

    #[test]
    fn price_time_priority_within_a_level() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 100, 150).unwrap();
        book.add_limit_order(2, Side::Buy, 100, 150).unwrap();
        let r3 = book.add_limit_order(3, Side::Sell, 150, 150).unwrap();

        assert_eq!(r3.aggressor.trades.len(), 2);
        assert_eq!(r3.aggressor.trades[0].maker_id, 1);
        assert_eq!(r3.aggressor.trades[0].quantity, 100);
        assert_eq!(r3.aggressor.trades[1].maker_id, 2);
        assert_eq!(r3.aggressor.trades[1].quantity, 50);
        assert_eq!(book.volume_at(Side::Buy, 150), 50);
        assert_eq!(book.get_best_bid_price(), 150);
    }

    #[test]
    fn crossing_limit_matches_instead_of_resting() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Sell, 5, 105).unwrap();
        let r = book.add_limit_order(2, Side::Buy, 3, 110).unwrap();
        assert_eq!(r.aggressor.trades.len(), 1);
        assert_eq!(r.aggressor.trades[0].price, 105);
        assert_eq!(r.aggressor.trades[0].quantity, 3);
        assert!(!book.limit_index.contains_key(&2));
    }

    #[test]
    fn stop_sell_triggers_when_trade_price_reaches_it() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 100, 150).unwrap();
        book.add_stop_order(2, Side::Sell, 50, 150).unwrap();

        let r = book.add_limit_order(3, Side::Buy, 100, 150).unwrap();
        assert_eq!(book.last_trade_price(), 150);
        assert_eq!(r.triggered.len(), 1);
        assert_eq!(r.triggered[0].order_id, 2);
        assert!(r.triggered[0].trades.is_empty(), "the resting bid was fully consumed already");
    }

    #[test]
    fn stop_limit_triggers_then_rests_residual() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Sell, 100, 150).unwrap();
        book.add_stop_limit_order(2, Side::Buy, 200, 151, 150).unwrap();

        let r = book.market_order(3, Side::Sell, 50).unwrap();
        assert_eq!(book.last_trade_price(), 150);
        assert_eq!(r.triggered.len(), 1);
        assert_eq!(r.triggered[0].order_id, 2);
        assert!(r.triggered[0].rested);
        assert_eq!(r.triggered[0].leaves_qty, 100);
        assert_eq!(book.volume_at(Side::Buy, 151), 100);
    }

    #[test]
    fn cancel_of_missing_order_fails() {
        let mut book = OrderBook::new();
        assert_eq!(
            book.cancel_limit_order(999).unwrap_err(),
            BookError::NotFound { id: 999 }
        );
    }

    #[test]
    fn modify_requeues_at_tail() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 100, 150).unwrap();
        book.add_limit_order(2, Side::Buy, 100, 150).unwrap();
        book.modify_limit_order(1, 100, 150).unwrap();
        let r3 = book.add_limit_order(3, Side::Sell, 100, 150).unwrap();

        assert_eq!(r3.aggressor.trades[0].maker_id, 2);
        assert_eq!(r3.aggressor.trades[0].quantity, 100);
    }

    #[test]
    fn no_crossed_book_invariant() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 10, 100).unwrap();
        book.add_limit_order(2, Side::Sell, 10, 105).unwrap();
        let bid = book.get_best_bid_price();
        let ask = book.get_best_ask_price();
        assert!(bid == 0 || ask == 0 || bid < ask);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 10, 100).unwrap();
        assert_eq!(
            book.add_limit_order(1, Side::Sell, 5, 200).unwrap_err(),
            BookError::DuplicateId { id: 1 }
        );
    }

    #[test]
    fn market_order_residual_is_discarded_not_rested() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Sell, 10, 100).unwrap();
        let r = book.market_order(2, Side::Buy, 50).unwrap();
        assert_eq!(r.aggressor.cum_qty(), 10);
        assert_eq!(r.aggressor.leaves_qty, 0);
        assert_eq!(book.get_best_bid_price(), 0);
        assert_eq!(book.get_best_ask_price(), 0);
    }

    #[test]
    fn get_random_order_samples_live_orders_only() {
        let mut book = OrderBook::new();
        book.add_limit_order(1, Side::Buy, 10, 100).unwrap();
        book.add_limit_order(2, Side::Buy, 10, 101).unwrap();
        let mut rng = rand::rng();
        let sampled = book
            .get_random_order(OrderClass::Limit, &mut rng)
            .unwrap();
        assert!(sampled.id == 1 || sampled.id == 2);

        book.cancel_limit_order(1).unwrap();
        book.cancel_limit_order(2).unwrap();
        assert!(book.get_random_order(OrderClass::Limit, &mut rng).is_none());
    }
}
