//! Trade records and the outcome types `Book` returns from its operations.

use crate::orders::Side;

/// A trade represents a matched transaction between two orders.
///
/// - The price comes from the maker's order (i.e. the resting order).
/// - Quantity is the amount filled.
/// - The taker is the incoming order that triggered the trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub price: u64,
    pub quantity: u64,
    pub maker_id: u64,
    pub taker_id: u64,
}

/// What happened to one order submitted to the book: the fills it
/// generated as the taker, and whether any residual now rests.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub order_id: u64,
    pub side: Side,
    pub trades: Vec<Trade>,
    pub leaves_qty: u64,
    pub rested: bool,
}

impl ExecutionOutcome {
    pub fn cum_qty(&self) -> u64 {
        self.trades.iter().map(|t| t.quantity).sum()
    }

    pub fn avg_px(&self) -> f64 {
        let cum = self.cum_qty();
        if cum == 0 {
            return 0.0;
        }
        let notional: u64 = self.trades.iter().map(|t| t.price * t.quantity).sum();
        notional as f64 / cum as f64
    }
}

/// Result of submitting an order that can move the last trade price: the
/// aggressor's own outcome, followed by the outcome of every stop order the
/// cascade triggered, in cascade order.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub aggressor: ExecutionOutcome,
    pub triggered: Vec<ExecutionOutcome>,
}
