//! A small tag=value wire codec in the style of FIX 4.2 session messages.
//!
//! Fields are delimited by SOH (`\x01`) as `tag=value` pairs; a message is
//! framed by `BeginString`, `BodyLength`, and a trailing mod-256 `CheckSum`.
//! Fields encode in a fixed order — header first, then body fields, then
//! the checksum last — and the checksum itself is the sum of the preceding
//! bytes mod 256, zero-padded to three digits.

use std::collections::BTreeMap;

use crate::errors::{BookError, BookResult};

pub const SOH: u8 = 0x01;

// Common header tags.
pub const TAG_BEGIN_STRING: u32 = 8;
pub const TAG_BODY_LENGTH: u32 = 9;
pub const TAG_MSG_TYPE: u32 = 35;
pub const TAG_SENDER_COMP_ID: u32 = 49;
pub const TAG_TARGET_COMP_ID: u32 = 56;
pub const TAG_MSG_SEQ_NUM: u32 = 34;
pub const TAG_SENDING_TIME: u32 = 52;
pub const TAG_CHECKSUM: u32 = 10;

// Order fields.
pub const TAG_CL_ORD_ID: u32 = 11;
pub const TAG_ORDER_ID: u32 = 37;
pub const TAG_SIDE: u32 = 54;
pub const TAG_ORDER_QTY: u32 = 38;
pub const TAG_ORD_TYPE: u32 = 40;
pub const TAG_PRICE: u32 = 44;
pub const TAG_STOP_PX: u32 = 99;
pub const TAG_SYMBOL: u32 = 55;
pub const TAG_EXEC_TYPE: u32 = 150;
pub const TAG_ORD_STATUS: u32 = 39;
pub const TAG_LEAVES_QTY: u32 = 151;
pub const TAG_CUM_QTY: u32 = 14;
pub const TAG_AVG_PX: u32 = 6;
pub const TAG_TEXT: u32 = 58;
pub const TAG_ORIG_CL_ORD_ID: u32 = 41;

// MsgType values.
pub const MSG_TYPE_NEW_ORDER_SINGLE: char = 'D';
pub const MSG_TYPE_ORDER_CANCEL_REQUEST: char = 'F';
pub const MSG_TYPE_ORDER_CANCEL_REPLACE_REQUEST: char = 'G';
pub const MSG_TYPE_EXECUTION_REPORT: char = '8';
pub const MSG_TYPE_REJECT: char = '3';

// Side values.
pub const SIDE_BUY: char = '1';
pub const SIDE_SELL: char = '2';

// OrdType values.
pub const ORD_TYPE_MARKET: char = '1';
pub const ORD_TYPE_LIMIT: char = '2';
pub const ORD_TYPE_STOP: char = '3';
pub const ORD_TYPE_STOP_LIMIT: char = '4';

// ExecType / OrdStatus values.
pub const EXEC_TYPE_NEW: char = '0';
pub const EXEC_TYPE_PARTIAL_FILL: char = '1';
pub const EXEC_TYPE_FILL: char = '2';
pub const EXEC_TYPE_CANCELED: char = '4';
pub const EXEC_TYPE_REPLACED: char = '5';
pub const EXEC_TYPE_REJECTED: char = '8';

const DEFAULT_BEGIN_STRING: &str = "FIX.4.2";

/// One tag=value message. Fields are kept in a `BTreeMap` so `encode`
/// produces a deterministic field order without extra bookkeeping; FIX
/// itself doesn't require any particular body field order.
#[derive(Debug, Clone, Default)]
pub struct Message {
    fields: BTreeMap<u32, String>,
}

impl Message {
    pub fn new(msg_type: char) -> Self {
        let mut m = Message {
            fields: BTreeMap::new(),
        };
        m.fields
            .insert(TAG_BEGIN_STRING, DEFAULT_BEGIN_STRING.to_string());
        m.set_char(TAG_MSG_TYPE, msg_type);
        m
    }

    pub fn set_str(&mut self, tag: u32, value: impl Into<String>) {
        self.fields.insert(tag, value.into());
    }

    pub fn set_int(&mut self, tag: u32, value: i64) {
        self.fields.insert(tag, value.to_string());
    }

    pub fn set_char(&mut self, tag: u32, value: char) {
        self.fields.insert(tag, value.to_string());
    }

    /// Sets a decimal price field with 2 fractional digits, FIX-style.
    pub fn set_decimal(&mut self, tag: u32, value: f64) {
        self.fields.insert(tag, format!("{:.2}", value));
    }

    pub fn get_str(&self, tag: u32) -> Option<&str> {
        self.fields.get(&tag).map(String::as_str)
    }

    pub fn get_int(&self, tag: u32) -> BookResult<i64> {
        let raw = self.get_str(tag).unwrap_or("");
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| BookError::MalformedMessage {
            reason: format!("tag {tag} is not an integer: {raw:?}"),
        })
    }

    pub fn get_decimal(&self, tag: u32) -> BookResult<f64> {
        let raw = self.get_str(tag).unwrap_or("");
        if raw.is_empty() {
            return Ok(0.0);
        }
        raw.parse().map_err(|_| BookError::MalformedMessage {
            reason: format!("tag {tag} is not a decimal: {raw:?}"),
        })
    }

    pub fn get_char(&self, tag: u32) -> char {
        self.get_str(tag)
            .and_then(|s| s.chars().next())
            .unwrap_or('\0')
    }

    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.contains_key(&tag)
    }

    pub fn msg_type(&self) -> char {
        self.get_char(TAG_MSG_TYPE)
    }

    /// Builds the wire form: BeginString, BodyLength, body fields in tag
    /// order, CheckSum last. Mirrors `FIXMessage::encode`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (&tag, value) in &self.fields {
            if tag == TAG_BEGIN_STRING || tag == TAG_BODY_LENGTH || tag == TAG_CHECKSUM {
                continue;
            }
            body.extend_from_slice(tag.to_string().as_bytes());
            body.push(b'=');
            body.extend_from_slice(value.as_bytes());
            body.push(SOH);
        }

        let mut message = Vec::new();
        let begin_string = self
            .get_str(TAG_BEGIN_STRING)
            .unwrap_or(DEFAULT_BEGIN_STRING);
        message.extend_from_slice(format!("{TAG_BEGIN_STRING}={begin_string}").as_bytes());
        message.push(SOH);
        message.extend_from_slice(format!("{TAG_BODY_LENGTH}={}", body.len()).as_bytes());
        message.push(SOH);
        message.extend_from_slice(&body);

        let checksum = checksum(&message);
        message.extend_from_slice(format!("{TAG_CHECKSUM}={checksum:03}").as_bytes());
        message.push(SOH);
        message
    }

    /// Parses tag=value pairs delimited by SOH. Tolerant of a missing
    /// trailing SOH; does not validate BodyLength or CheckSum (that's
    /// `decode_strict`'s job). Mirrors `FIXMessage::parse`.
    pub fn decode(raw: &[u8]) -> BookResult<Message> {
        let mut fields = BTreeMap::new();
        let mut pos = 0;
        while pos < raw.len() {
            let Some(eq) = raw[pos..].iter().position(|&b| b == b'=') else {
                break;
            };
            let eq = pos + eq;
            let tag_str = std::str::from_utf8(&raw[pos..eq]).map_err(|_| {
                BookError::MalformedMessage {
                    reason: "tag is not valid utf-8".into(),
                }
            })?;
            let tag: u32 = tag_str.parse().map_err(|_| BookError::MalformedMessage {
                reason: format!("invalid tag {tag_str:?}"),
            })?;
            let soh = raw[eq..]
                .iter()
                .position(|&b| b == SOH)
                .map(|i| eq + i)
                .unwrap_or(raw.len());
            let value = std::str::from_utf8(&raw[eq + 1..soh])
                .map_err(|_| BookError::MalformedMessage {
                    reason: "value is not valid utf-8".into(),
                })?
                .to_string();
            fields.insert(tag, value);
            pos = soh + 1;
        }
        if fields.is_empty() {
            return Err(BookError::MalformedMessage {
                reason: "message had no fields".into(),
            });
        }
        Ok(Message { fields })
    }

    /// Like `decode`, but also recomputes BodyLength and CheckSum and
    /// rejects the message if either doesn't match what's on the wire.
    pub fn decode_strict(raw: &[u8]) -> BookResult<Message> {
        let msg = Message::decode(raw)?;

        let checksum_tag = format!("{TAG_CHECKSUM}=");
        let checksum_pos = find_last(raw, checksum_tag.as_bytes()).ok_or_else(|| {
            BookError::MalformedMessage {
                reason: "missing CheckSum field".into(),
            }
        })?;
        let expected = checksum(&raw[..checksum_pos]);
        let actual = msg.get_int(TAG_CHECKSUM)? as u32;
        if actual != expected {
            return Err(BookError::MalformedMessage {
                reason: format!("checksum mismatch: wire={actual} computed={expected}"),
            });
        }

        let body_len = msg.get_int(TAG_BODY_LENGTH)?;
        let body_start = find_nth_soh(raw, 1).map(|i| i + 1).unwrap_or(raw.len());
        let body_end = checksum_pos;
        let actual_len = (body_end.saturating_sub(body_start)) as i64;
        if body_len != actual_len {
            return Err(BookError::MalformedMessage {
                reason: format!("BodyLength mismatch: declared={body_len} actual={actual_len}"),
            });
        }

        Ok(msg)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().map(|&b| b as u32).sum::<u32>() % 256
}

fn find_nth_soh(raw: &[u8], n: usize) -> Option<usize> {
    raw.iter()
        .enumerate()
        .filter(|&(_, &b)| b == SOH)
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
}

fn find_last(raw: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || raw.len() < needle.len() {
        return None;
    }
    (0..=raw.len() - needle.len())
        .rev()
        .find(|&i| &raw[i..i + needle.len()] == needle)
}

/// Converts a decimal price string (2 fractional digits on the wire) into
/// integer ticks, truncating any precision finer than a cent.
pub fn decimal_to_ticks(value: f64) -> u64 {
    (value * 100.0) as u64
}

/// Converts integer ticks back into the decimal form used on the wire.
pub fn ticks_to_decimal(ticks: u64) -> f64 {
    ticks as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut msg = Message::new(MSG_TYPE_NEW_ORDER_SINGLE);
        msg.set_str(TAG_CL_ORD_ID, "abc123");
        msg.set_char(TAG_SIDE, SIDE_BUY);
        msg.set_int(TAG_ORDER_QTY, 100);
        msg.set_decimal(TAG_PRICE, 151.25);

        let wire = msg.encode();
        let decoded = Message::decode(&wire).unwrap();

        assert_eq!(decoded.msg_type(), MSG_TYPE_NEW_ORDER_SINGLE);
        assert_eq!(decoded.get_str(TAG_CL_ORD_ID), Some("abc123"));
        assert_eq!(decoded.get_char(TAG_SIDE), SIDE_BUY);
        assert_eq!(decoded.get_int(TAG_ORDER_QTY).unwrap(), 100);
        assert_eq!(decoded.get_decimal(TAG_PRICE).unwrap(), 151.25);
    }

    #[test]
    fn checksum_matches_reference_algorithm() {
        let mut msg = Message::new(MSG_TYPE_NEW_ORDER_SINGLE);
        msg.set_str(TAG_SYMBOL, "TEST");
        let wire = msg.encode();

        let checksum_marker = format!("{TAG_CHECKSUM}=");
        let pos = find_last(&wire, checksum_marker.as_bytes()).unwrap();
        let expected = checksum(&wire[..pos]);

        let decoded = Message::decode(&wire).unwrap();
        assert_eq!(decoded.get_int(TAG_CHECKSUM).unwrap() as u32, expected);
    }

    #[test]
    fn decode_strict_rejects_tampered_checksum() {
        let msg = Message::new(MSG_TYPE_REJECT);
        let mut wire = msg.encode();
        // Flip a byte in the body without touching the trailing checksum
        // field, so decode_strict must notice the mismatch.
        let body_start = find_nth_soh(&wire, 2).unwrap() + 1;
        wire[body_start] ^= 0xFF;

        assert!(Message::decode_strict(&wire).is_err());
        assert!(Message::decode(&wire).is_ok());
    }

    #[test]
    fn decode_tolerates_missing_trailing_soh() {
        let mut msg = Message::new(MSG_TYPE_EXECUTION_REPORT);
        msg.set_int(TAG_CUM_QTY, 42);
        let mut wire = msg.encode();
        wire.pop();

        let decoded = Message::decode(&wire).unwrap();
        assert_eq!(decoded.get_int(TAG_CUM_QTY).unwrap(), 42);
    }

    #[test]
    fn decimal_tick_conversion_truncates_sub_cent_precision() {
        assert_eq!(decimal_to_ticks(151.25), 15125);
        assert_eq!(ticks_to_decimal(15125), 151.25);
        assert_eq!(decimal_to_ticks(151.2599), 15125);
    }
}
