//! Order records and the small enums that classify them.

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,  //Bid,
    Sell, //Ask,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// The four order types the core accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Which order-id index a resting order lives in. Market orders never rest
/// and so never belong to a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderClass {
    Limit,
    Stop,
    StopLimit,
}

/// A single order. `shares` is the residual (unfilled) quantity and
/// decreases monotonically until the order terminates.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub shares: u64,
    /// Limit price, present for Limit and StopLimit orders.
    pub limit_price: Option<u64>,
    /// Trigger price, present for Stop and StopLimit orders.
    pub stop_price: Option<u64>,
}
