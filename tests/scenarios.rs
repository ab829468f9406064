//! The six literal end-to-end scenarios of the spec, driven through the
//! wire facade exactly as a real client would see them.

use order_book_engine::codec::{self, Message};
use order_book_engine::facade::{FacadeConfig, SessionFacade};
use order_book_engine::orderbook::OrderBook;

fn new_order(cl_ord_id: &str, side: char, ord_type: char, qty: i64, price: Option<f64>, stop_px: Option<f64>) -> Vec<u8> {
    let mut msg = Message::new(codec::MSG_TYPE_NEW_ORDER_SINGLE);
    msg.set_str(codec::TAG_CL_ORD_ID, cl_ord_id);
    msg.set_char(codec::TAG_SIDE, side);
    msg.set_char(codec::TAG_ORD_TYPE, ord_type);
    msg.set_int(codec::TAG_ORDER_QTY, qty);
    msg.set_str(codec::TAG_SYMBOL, "AAPL");
    if let Some(p) = price {
        msg.set_decimal(codec::TAG_PRICE, p);
    }
    if let Some(s) = stop_px {
        msg.set_decimal(codec::TAG_STOP_PX, s);
    }
    msg.encode()
}

fn cancel(cl_ord_id: &str, orig_cl_ord_id: &str, side: char) -> Vec<u8> {
    let mut msg = Message::new(codec::MSG_TYPE_ORDER_CANCEL_REQUEST);
    msg.set_str(codec::TAG_CL_ORD_ID, cl_ord_id);
    msg.set_str(codec::TAG_ORIG_CL_ORD_ID, orig_cl_ord_id);
    msg.set_char(codec::TAG_SIDE, side);
    msg.set_str(codec::TAG_SYMBOL, "AAPL");
    msg.encode()
}

fn fresh() -> (OrderBook, SessionFacade) {
    (OrderBook::new(), SessionFacade::new(FacadeConfig::default()))
}

/// S1 — resting limit, then market fills it.
#[test]
fn scenario_1_resting_limit_then_market_fills_it() {
    let (mut book, mut fac) = fresh();

    let r1 = fac.process_message(&mut book, &new_order("1", codec::SIDE_SELL, codec::ORD_TYPE_LIMIT, 50, Some(151.00), None));
    let d1 = Message::decode(&r1[0]).unwrap();
    assert_eq!(d1.get_char(codec::TAG_EXEC_TYPE), codec::EXEC_TYPE_NEW);
    assert_eq!(d1.get_int(codec::TAG_LEAVES_QTY).unwrap(), 50);

    let r2 = fac.process_message(&mut book, &new_order("2", codec::SIDE_BUY, codec::ORD_TYPE_MARKET, 30, None, None));
    let d2 = Message::decode(&r2[0]).unwrap();
    assert_eq!(d2.get_char(codec::TAG_EXEC_TYPE), codec::EXEC_TYPE_FILL);
    assert_eq!(d2.get_int(codec::TAG_CUM_QTY).unwrap(), 30);
    assert_eq!(d2.get_decimal(codec::TAG_AVG_PX).unwrap(), 151.00);

    assert_eq!(codec::ticks_to_decimal(book.get_best_ask_price()), 151.00);
    assert_eq!(book.get_best_bid_price(), 0);
    assert_eq!(book.volume_at(order_book_engine::orders::Side::Sell, codec::decimal_to_ticks(151.00)), 20);
}

/// S2 — price-time priority.
#[test]
fn scenario_2_price_time_priority() {
    let (mut book, mut fac) = fresh();
    fac.process_message(&mut book, &new_order("1", codec::SIDE_BUY, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));
    fac.process_message(&mut book, &new_order("2", codec::SIDE_BUY, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));
    fac.process_message(&mut book, &new_order("3", codec::SIDE_SELL, codec::ORD_TYPE_LIMIT, 150, Some(150.00), None));

    assert_eq!(codec::ticks_to_decimal(book.get_best_bid_price()), 150.00);
    assert_eq!(book.volume_at(order_book_engine::orders::Side::Buy, codec::decimal_to_ticks(150.00)), 50);
    assert!(book.cancel_limit_order(1).is_err(), "id 1 should be fully consumed");
    assert!(book.cancel_limit_order(2).is_ok(), "id 2 should still have 50 shares resting");
}

/// S3 — stop-sell triggers on downtick (forced-trigger variant from spec.md).
#[test]
fn scenario_3_stop_sell_triggers_when_forced() {
    let (mut book, mut fac) = fresh();
    fac.process_message(&mut book, &new_order("1", codec::SIDE_BUY, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));
    fac.process_message(&mut book, &new_order("2", codec::SIDE_SELL, codec::ORD_TYPE_LIMIT, 100, Some(151.00), None));
    fac.process_message(&mut book, &new_order("3", codec::SIDE_SELL, codec::ORD_TYPE_STOP, 50, None, Some(150.00)));

    // A marketable sell crosses id 1 at 150, triggering the stop.
    let reports = fac.process_message(&mut book, &new_order("4", codec::SIDE_SELL, codec::ORD_TYPE_LIMIT, 100, Some(148.00), None));

    assert_eq!(codec::ticks_to_decimal(book.last_trade_price()), 150.00);
    // The stop fired and tried to sell into an empty bid side; its
    // residual is discarded per the market-order-residual policy.
    assert!(book.cancel_stop_order(3).is_err());

    // The aggressor's own ack comes first, then the triggered stop's report.
    assert_eq!(reports.len(), 2);
    let triggered = Message::decode(&reports[1]).unwrap();
    assert_eq!(triggered.get_int(codec::TAG_ORDER_ID).unwrap(), 3);
    assert_eq!(triggered.get_char(codec::TAG_SIDE), codec::SIDE_SELL);
}

/// S4 — cancel of a non-existent order rejects.
#[test]
fn scenario_4_cancel_of_missing_order_rejects() {
    let (mut book, mut fac) = fresh();
    let r1 = fac.process_message(&mut book, &cancel("1", "999", codec::SIDE_BUY));
    let d1 = Message::decode(&r1[0]).unwrap();
    assert_eq!(d1.msg_type(), codec::MSG_TYPE_REJECT);
    assert!(d1.get_str(codec::TAG_TEXT).unwrap().contains("Cancel failed"));
    let seq1 = d1.get_int(codec::TAG_MSG_SEQ_NUM).unwrap();

    let r2 = fac.process_message(&mut book, &cancel("2", "999", codec::SIDE_BUY));
    let d2 = Message::decode(&r2[0]).unwrap();
    let seq2 = d2.get_int(codec::TAG_MSG_SEQ_NUM).unwrap();
    assert_eq!(seq2, seq1 + 1, "MsgSeqNum must strictly increase across rejects too");
}

/// S5 — modify re-queues at tail, losing time priority.
#[test]
fn scenario_5_modify_requeues_at_tail() {
    let (mut book, mut fac) = fresh();
    fac.process_message(&mut book, &new_order("1", codec::SIDE_BUY, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));
    fac.process_message(&mut book, &new_order("2", codec::SIDE_BUY, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));

    let mut modify = Message::new(codec::MSG_TYPE_ORDER_CANCEL_REPLACE_REQUEST);
    modify.set_str(codec::TAG_CL_ORD_ID, "1b");
    modify.set_str(codec::TAG_ORIG_CL_ORD_ID, "1");
    modify.set_char(codec::TAG_SIDE, codec::SIDE_BUY);
    modify.set_int(codec::TAG_ORDER_QTY, 100);
    modify.set_decimal(codec::TAG_PRICE, 150.00);
    modify.set_str(codec::TAG_SYMBOL, "AAPL");
    fac.process_message(&mut book, &modify.encode());

    fac.process_message(&mut book, &new_order("3", codec::SIDE_SELL, codec::ORD_TYPE_LIMIT, 100, Some(150.00), None));

    // id 2 kept priority and was filled; id 1 (re-queued by the modify)
    // still rests with its full size.
    assert!(book.cancel_limit_order(2).is_err());
    assert!(book.cancel_limit_order(1).is_ok());
}

/// S6 — codec round-trip on a realistic NewOrderSingle.
#[test]
fn scenario_6_codec_round_trip() {
    let mut msg = Message::new(codec::MSG_TYPE_NEW_ORDER_SINGLE);
    msg.set_str(codec::TAG_CL_ORD_ID, "1001");
    msg.set_char(codec::TAG_SIDE, codec::SIDE_BUY);
    msg.set_int(codec::TAG_ORDER_QTY, 100);
    msg.set_char(codec::TAG_ORD_TYPE, codec::ORD_TYPE_LIMIT);
    msg.set_decimal(codec::TAG_PRICE, 150.50);
    msg.set_str(codec::TAG_SYMBOL, "AAPL");

    let wire = msg.encode();
    let decoded = Message::decode(&wire).unwrap();
    assert_eq!(decoded.get_str(codec::TAG_CL_ORD_ID), Some("1001"));
    assert_eq!(decoded.get_char(codec::TAG_SIDE), codec::SIDE_BUY);
    assert_eq!(decoded.get_int(codec::TAG_ORDER_QTY).unwrap(), 100);
    assert_eq!(decoded.get_decimal(codec::TAG_PRICE).unwrap(), 150.50);
    assert_eq!(decoded.get_str(codec::TAG_SYMBOL), Some("AAPL"));

    let re_encoded = decoded.encode();
    assert_eq!(re_encoded, wire, "re-encoding a decoded message reproduces identical bytes");
}
