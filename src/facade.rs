//! The session facade: a stateless dispatcher from wire `Message`s onto
//! `OrderBook` calls, keyed by MsgType. Cancel requests probe limit, then
//! stop, then stop-limit, since a `ClOrdID` alone doesn't say which class
//! it belongs to. Every error from the book becomes a Reject; nothing
//! throws past this boundary.

use std::time::SystemTime;

use tracing::debug;

use crate::codec::{self, Message};
use crate::orderbook::OrderBook;
use crate::orders::Side;
use crate::trade::ExecutionOutcome;

/// Supplies the facade's `SendingTime` field. A trait rather than a bare
/// `SystemTime::now()` call so tests can inject a fixed instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The default clock, backed by the system wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub struct FacadeConfig {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub clock: Box<dyn Clock>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            sender_comp_id: "SERVER".to_string(),
            target_comp_id: "CLIENT".to_string(),
            clock: Box::new(SystemClock),
        }
    }
}

/// Owns the outbound sequence counter and dispatches decoded requests
/// against a `OrderBook`. One instance per book/session; not `Clone` since
/// the sequence counter must stay single-owner (the serializer task in
/// `server.rs` is that owner).
pub struct SessionFacade {
    config: FacadeConfig,
    msg_seq_num: u64,
}

impl SessionFacade {
    pub fn new(config: FacadeConfig) -> Self {
        SessionFacade {
            config,
            msg_seq_num: 1,
        }
    }

    /// Decodes `raw`, dispatches it against `book`, and returns the encoded
    /// responses in emission order — an ExecutionReport or Reject for the
    /// request itself, followed by one ExecutionReport per order any stop
    /// cascade it set off, also in cascade order. Never an error; every
    /// failure on `book` becomes a Reject instead.
    pub fn process_message(&mut self, book: &mut OrderBook, raw: &[u8]) -> Vec<Vec<u8>> {
        let msg = match Message::decode(raw) {
            Ok(m) => m,
            Err(_) => return vec![self.create_reject("", "Malformed message")],
        };
        if !msg.has_field(codec::TAG_MSG_TYPE) {
            return vec![self.create_reject("", "Missing MsgType")];
        }

        let cl_ord_id = msg.get_str(codec::TAG_CL_ORD_ID).unwrap_or("").to_string();
        debug!(msg_type = %msg.msg_type(), cl_ord_id, "dispatching message");

        match msg.msg_type() {
            codec::MSG_TYPE_NEW_ORDER_SINGLE => self.handle_new_order(book, &msg),
            codec::MSG_TYPE_ORDER_CANCEL_REQUEST => vec![self.handle_cancel_request(book, &msg)],
            codec::MSG_TYPE_ORDER_CANCEL_REPLACE_REQUEST => {
                self.handle_cancel_replace_request(book, &msg)
            }
            _ => vec![self.create_reject(&cl_ord_id, "Unsupported message type")],
        }
    }

    fn handle_new_order(&mut self, book: &mut OrderBook, msg: &Message) -> Vec<Vec<u8>> {
        let cl_ord_id = msg.get_str(codec::TAG_CL_ORD_ID).unwrap_or("").to_string();
        let side_char = msg.get_char(codec::TAG_SIDE);
        let symbol = msg.get_str(codec::TAG_SYMBOL).unwrap_or("").to_string();

        let order_qty = match msg.get_int(codec::TAG_ORDER_QTY) {
            Ok(q) if q > 0 => q as u64,
            _ => return vec![self.create_reject(&cl_ord_id, "Invalid order parameters")],
        };
        let Some(order_id) = parse_order_id(&cl_ord_id) else {
            return vec![self.create_reject(&cl_ord_id, "Invalid order parameters")];
        };
        let side = match side_char {
            codec::SIDE_BUY => Side::Buy,
            codec::SIDE_SELL => Side::Sell,
            _ => return vec![self.create_reject(&cl_ord_id, "Invalid order parameters")],
        };

        let result = match msg.get_char(codec::TAG_ORD_TYPE) {
            codec::ORD_TYPE_MARKET => book.market_order(order_id, side, order_qty).map(|r| {
                let cum = r.aggressor.cum_qty();
                (codec::EXEC_TYPE_FILL, 0, cum, r.aggressor.avg_px(), r.triggered)
            }),
            codec::ORD_TYPE_LIMIT => {
                let price = match msg.get_decimal(codec::TAG_PRICE) {
                    Ok(p) if p > 0.0 => codec::decimal_to_ticks(p),
                    _ => return vec![self.create_reject(&cl_ord_id, "Invalid limit price")],
                };
                book.add_limit_order(order_id, side, order_qty, price)
                    .map(|r| (codec::EXEC_TYPE_NEW, order_qty, 0, 0.0, r.triggered))
            }
            codec::ORD_TYPE_STOP => {
                let stop_px = match msg.get_decimal(codec::TAG_STOP_PX) {
                    Ok(p) if p > 0.0 => codec::decimal_to_ticks(p),
                    _ => return vec![self.create_reject(&cl_ord_id, "Invalid stop price")],
                };
                book.add_stop_order(order_id, side, order_qty, stop_px)
                    .map(|_| (codec::EXEC_TYPE_NEW, order_qty, 0, 0.0, Vec::new()))
            }
            codec::ORD_TYPE_STOP_LIMIT => {
                let (price, stop_px) = match (
                    msg.get_decimal(codec::TAG_PRICE),
                    msg.get_decimal(codec::TAG_STOP_PX),
                ) {
                    (Ok(p), Ok(s)) if p > 0.0 && s > 0.0 => {
                        (codec::decimal_to_ticks(p), codec::decimal_to_ticks(s))
                    }
                    _ => return vec![self.create_reject(&cl_ord_id, "Invalid stop-limit prices")],
                };
                book.add_stop_limit_order(order_id, side, order_qty, price, stop_px)
                    .map(|_| (codec::EXEC_TYPE_NEW, order_qty, 0, 0.0, Vec::new()))
            }
            _ => return vec![self.create_reject(&cl_ord_id, "Unsupported order type")],
        };

        match result {
            Ok((exec_type, leaves_qty, cum_qty, avg_px, triggered)) => {
                let ord_status = exec_type;
                let mut reports = vec![self.create_execution_report(
                    order_id, exec_type, ord_status, leaves_qty, cum_qty, avg_px, &cl_ord_id,
                    side_char, order_qty, &symbol,
                )];
                reports.extend(
                    triggered
                        .iter()
                        .map(|outcome| self.triggered_execution_report(outcome, &symbol)),
                );
                reports
            }
            Err(e) => vec![self.create_reject(&cl_ord_id, &format!("Order failed: {e}"))],
        }
    }

    /// Builds the ExecutionReport for one order a stop cascade fired. Its
    /// own id doubles as ClOrdID here, since ClOrdIDs in this engine are
    /// just the client-supplied order id and the triggering request didn't
    /// carry one for an order placed earlier.
    fn triggered_execution_report(&mut self, outcome: &ExecutionOutcome, symbol: &str) -> Vec<u8> {
        let cum_qty = outcome.cum_qty();
        let exec_type = if outcome.leaves_qty > 0 {
            if cum_qty > 0 {
                codec::EXEC_TYPE_PARTIAL_FILL
            } else {
                codec::EXEC_TYPE_NEW
            }
        } else {
            codec::EXEC_TYPE_FILL
        };
        let side_char = match outcome.side {
            Side::Buy => codec::SIDE_BUY,
            Side::Sell => codec::SIDE_SELL,
        };
        self.create_execution_report(
            outcome.order_id,
            exec_type,
            exec_type,
            outcome.leaves_qty,
            cum_qty,
            outcome.avg_px(),
            &outcome.order_id.to_string(),
            side_char,
            cum_qty + outcome.leaves_qty,
            symbol,
        )
    }

    fn handle_cancel_request(&mut self, book: &mut OrderBook, msg: &Message) -> Vec<u8> {
        let cl_ord_id = msg.get_str(codec::TAG_CL_ORD_ID).unwrap_or("").to_string();
        let orig_cl_ord_id = msg.get_str(codec::TAG_ORIG_CL_ORD_ID).unwrap_or("");
        let side_char = msg.get_char(codec::TAG_SIDE);
        let symbol = msg.get_str(codec::TAG_SYMBOL).unwrap_or("").to_string();

        if orig_cl_ord_id.is_empty() {
            return self.create_reject(&cl_ord_id, "Missing OrigClOrdID");
        }
        let Some(order_id) = parse_order_id(orig_cl_ord_id) else {
            return self.create_reject(&cl_ord_id, "Cancel failed: invalid OrigClOrdID");
        };

        // An OrigClOrdID doesn't say which class the order belongs to, so
        // probe limit, then stop, then stop-limit until one accepts it.
        let result = book
            .cancel_limit_order(order_id)
            .or_else(|_| book.cancel_stop_order(order_id))
            .or_else(|_| book.cancel_stop_limit_order(order_id));

        match result {
            Ok(()) => self.create_execution_report(
                order_id,
                codec::EXEC_TYPE_CANCELED,
                codec::EXEC_TYPE_CANCELED,
                0,
                0,
                0.0,
                &cl_ord_id,
                side_char,
                0,
                &symbol,
            ),
            Err(e) => self.create_reject(&cl_ord_id, &format!("Cancel failed: {e}")),
        }
    }

    fn handle_cancel_replace_request(&mut self, book: &mut OrderBook, msg: &Message) -> Vec<Vec<u8>> {
        let cl_ord_id = msg.get_str(codec::TAG_CL_ORD_ID).unwrap_or("").to_string();
        let orig_cl_ord_id = msg.get_str(codec::TAG_ORIG_CL_ORD_ID).unwrap_or("");
        let side_char = msg.get_char(codec::TAG_SIDE);
        let symbol = msg.get_str(codec::TAG_SYMBOL).unwrap_or("").to_string();

        let order_qty = match msg.get_int(codec::TAG_ORDER_QTY) {
            Ok(q) if q > 0 => q as u64,
            _ => return vec![self.create_reject(&cl_ord_id, "Invalid modify parameters")],
        };
        let price = match msg.get_decimal(codec::TAG_PRICE) {
            Ok(p) if p > 0.0 => codec::decimal_to_ticks(p),
            _ => return vec![self.create_reject(&cl_ord_id, "Invalid modify parameters")],
        };
        if orig_cl_ord_id.is_empty() {
            return vec![self.create_reject(&cl_ord_id, "Invalid modify parameters")];
        }
        let Some(order_id) = parse_order_id(orig_cl_ord_id) else {
            return vec![self.create_reject(&cl_ord_id, "Modify failed: invalid OrigClOrdID")];
        };

        // A re-queued order can itself cross the book, so a modify can set
        // off a stop cascade just like a new market or limit order.
        match book.modify_limit_order(order_id, order_qty, price) {
            Ok(r) => {
                let mut reports = vec![self.create_execution_report(
                    order_id,
                    codec::EXEC_TYPE_REPLACED,
                    codec::EXEC_TYPE_REPLACED,
                    order_qty,
                    0,
                    0.0,
                    &cl_ord_id,
                    side_char,
                    order_qty,
                    &symbol,
                )];
                reports.extend(
                    r.triggered
                        .iter()
                        .map(|outcome| self.triggered_execution_report(outcome, &symbol)),
                );
                reports
            }
            Err(e) => vec![self.create_reject(&cl_ord_id, &format!("Modify failed: {e}"))],
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_execution_report(
        &mut self,
        order_id: u64,
        exec_type: char,
        ord_status: char,
        leaves_qty: u64,
        cum_qty: u64,
        avg_px: f64,
        cl_ord_id: &str,
        side: char,
        order_qty: u64,
        symbol: &str,
    ) -> Vec<u8> {
        let mut msg = Message::new(codec::MSG_TYPE_EXECUTION_REPORT);
        self.stamp_header(&mut msg);
        msg.set_int(codec::TAG_ORDER_ID, order_id as i64);
        msg.set_str(codec::TAG_CL_ORD_ID, cl_ord_id);
        msg.set_char(codec::TAG_EXEC_TYPE, exec_type);
        msg.set_char(codec::TAG_ORD_STATUS, ord_status);
        msg.set_char(codec::TAG_SIDE, side);
        msg.set_int(codec::TAG_ORDER_QTY, order_qty as i64);
        msg.set_int(codec::TAG_LEAVES_QTY, leaves_qty as i64);
        msg.set_int(codec::TAG_CUM_QTY, cum_qty as i64);
        msg.set_decimal(codec::TAG_AVG_PX, avg_px);
        msg.set_str(codec::TAG_SYMBOL, symbol);
        msg.encode()
    }

    fn create_reject(&mut self, cl_ord_id: &str, reason: &str) -> Vec<u8> {
        let mut msg = Message::new(codec::MSG_TYPE_REJECT);
        self.stamp_header(&mut msg);
        if !cl_ord_id.is_empty() {
            msg.set_str(codec::TAG_CL_ORD_ID, cl_ord_id);
        }
        msg.set_str(codec::TAG_TEXT, reason);
        msg.encode()
    }

    fn stamp_header(&mut self, msg: &mut Message) {
        msg.set_str(codec::TAG_SENDER_COMP_ID, &self.config.sender_comp_id);
        msg.set_str(codec::TAG_TARGET_COMP_ID, &self.config.target_comp_id);
        msg.set_int(codec::TAG_MSG_SEQ_NUM, self.msg_seq_num as i64);
        self.msg_seq_num += 1;
        msg.set_str(codec::TAG_SENDING_TIME, format_sending_time(self.config.clock.now()));
    }
}

fn parse_order_id(raw: &str) -> Option<u64> {
    raw.parse().ok()
}

fn format_sending_time(time: SystemTime) -> String {
    let secs = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{secs}")
}
