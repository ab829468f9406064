//! Parser and driver for the replay-file grammar: one whitespace-separated
//! command per line, talking to the `OrderBook` API directly rather than
//! through the wire codec. This is a file-driven shortcut for feeding the
//! book a sequence of operations without building and encoding a `Message`
//! for each one.

use std::io::BufRead;

use tracing::{info, warn};

use crate::errors::{BookError, BookResult};
use crate::orderbook::OrderBook;
use crate::orders::Side;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Market { id: u64, side: Side, shares: u64 },
    AddLimit { id: u64, side: Side, shares: u64, price: u64 },
    /// `AddMarketLimit` is a marketable-limit synonym for `AddLimit`.
    CancelLimit { id: u64 },
    ModifyLimit { id: u64, shares: u64, price: u64 },
    AddStop { id: u64, side: Side, shares: u64, stop_price: u64 },
    CancelStop { id: u64 },
    ModifyStop { id: u64, shares: u64, stop_price: u64 },
    AddStopLimit {
        id: u64,
        side: Side,
        shares: u64,
        limit_price: u64,
        stop_price: u64,
    },
    CancelStopLimit { id: u64 },
    ModifyStopLimit {
        id: u64,
        shares: u64,
        limit_price: u64,
        stop_price: u64,
    },
}

fn parse_side(raw: &str) -> BookResult<Side> {
    match raw {
        "1" => Ok(Side::Buy),
        "0" => Ok(Side::Sell),
        other => Err(BookError::InvalidRequest {
            reason: format!("expected side 0 or 1, got {other:?}"),
        }),
    }
}

fn parse_u64(raw: &str, field: &str) -> BookResult<u64> {
    raw.parse().map_err(|_| BookError::InvalidRequest {
        reason: format!("expected an integer for {field}, got {raw:?}"),
    })
}

/// Parses one non-empty, non-comment line into a `Command`.
pub fn parse_line(line: &str) -> BookResult<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (keyword, args) = tokens.split_first().ok_or(BookError::InvalidRequest {
        reason: "empty line".into(),
    })?;

    let command = match *keyword {
        "Market" => {
            let [id, side, shares] = require(args, "Market")?;
            Command::Market {
                id: parse_u64(id, "id")?,
                side: parse_side(side)?,
                shares: parse_u64(shares, "shares")?,
            }
        }
        "AddLimit" | "AddMarketLimit" => {
            let [id, side, shares, price] = require(args, keyword)?;
            Command::AddLimit {
                id: parse_u64(id, "id")?,
                side: parse_side(side)?,
                shares: parse_u64(shares, "shares")?,
                price: parse_u64(price, "price")?,
            }
        }
        "CancelLimit" => {
            let [id] = require(args, "CancelLimit")?;
            Command::CancelLimit {
                id: parse_u64(id, "id")?,
            }
        }
        "ModifyLimit" => {
            let [id, shares, price] = require(args, "ModifyLimit")?;
            Command::ModifyLimit {
                id: parse_u64(id, "id")?,
                shares: parse_u64(shares, "shares")?,
                price: parse_u64(price, "price")?,
            }
        }
        "AddStop" => {
            let [id, side, shares, stop_price] = require(args, "AddStop")?;
            Command::AddStop {
                id: parse_u64(id, "id")?,
                side: parse_side(side)?,
                shares: parse_u64(shares, "shares")?,
                stop_price: parse_u64(stop_price, "stopPrice")?,
            }
        }
        "CancelStop" => {
            let [id] = require(args, "CancelStop")?;
            Command::CancelStop {
                id: parse_u64(id, "id")?,
            }
        }
        "ModifyStop" => {
            let [id, shares, stop_price] = require(args, "ModifyStop")?;
            Command::ModifyStop {
                id: parse_u64(id, "id")?,
                shares: parse_u64(shares, "shares")?,
                stop_price: parse_u64(stop_price, "stopPrice")?,
            }
        }
        "AddStopLimit" => {
            let [id, side, shares, limit_price, stop_price] = require(args, "AddStopLimit")?;
            Command::AddStopLimit {
                id: parse_u64(id, "id")?,
                side: parse_side(side)?,
                shares: parse_u64(shares, "shares")?,
                limit_price: parse_u64(limit_price, "limitPrice")?,
                stop_price: parse_u64(stop_price, "stopPrice")?,
            }
        }
        "CancelStopLimit" => {
            let [id] = require(args, "CancelStopLimit")?;
            Command::CancelStopLimit {
                id: parse_u64(id, "id")?,
            }
        }
        "ModifyStopLimit" => {
            let [id, shares, limit_price, stop_price] = require(args, "ModifyStopLimit")?;
            Command::ModifyStopLimit {
                id: parse_u64(id, "id")?,
                shares: parse_u64(shares, "shares")?,
                limit_price: parse_u64(limit_price, "limitPrice")?,
                stop_price: parse_u64(stop_price, "stopPrice")?,
            }
        }
        other => {
            return Err(BookError::InvalidRequest {
                reason: format!("unknown command {other:?}"),
            })
        }
    };
    Ok(command)
}

fn require<'a, const N: usize>(args: &'a [&'a str], keyword: &str) -> BookResult<[&'a str; N]> {
    args.try_into().map_err(|_| BookError::InvalidRequest {
        reason: format!("{keyword} expects {N} argument(s), got {}", args.len()),
    })
}

/// Applies one `Command` to `book`, returning whatever `OrderBook` returns.
/// Callers that only care about side effects (the `replay` CLI subcommand)
/// can discard the `Ok` value; tests use it to assert on trades/outcomes.
pub fn apply(book: &mut OrderBook, command: Command) -> BookResult<()> {
    match command {
        Command::Market { id, side, shares } => book.market_order(id, side, shares).map(drop),
        Command::AddLimit {
            id,
            side,
            shares,
            price,
        } => book.add_limit_order(id, side, shares, price).map(drop),
        Command::CancelLimit { id } => book.cancel_limit_order(id),
        Command::ModifyLimit { id, shares, price } => {
            book.modify_limit_order(id, shares, price).map(drop)
        }
        Command::AddStop {
            id,
            side,
            shares,
            stop_price,
        } => book.add_stop_order(id, side, shares, stop_price),
        Command::CancelStop { id } => book.cancel_stop_order(id),
        Command::ModifyStop {
            id,
            shares,
            stop_price,
        } => book.modify_stop_order(id, shares, stop_price),
        Command::AddStopLimit {
            id,
            side,
            shares,
            limit_price,
            stop_price,
        } => book.add_stop_limit_order(id, side, shares, limit_price, stop_price),
        Command::CancelStopLimit { id } => book.cancel_stop_limit_order(id),
        Command::ModifyStopLimit {
            id,
            shares,
            limit_price,
            stop_price,
        } => book.modify_stop_limit_order(id, shares, limit_price, stop_price),
    }
}

/// Feeds every non-blank line of `reader` through `book`, logging and
/// skipping lines that fail to parse or apply rather than aborting the
/// whole run — a malformed line in a replay file shouldn't lose the rest
/// of the session's history.
pub fn run_file(book: &mut OrderBook, reader: impl BufRead) -> BookResult<usize> {
    let mut applied = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| BookError::InvalidRequest {
            reason: format!("I/O error reading line {}: {e}", lineno + 1),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed).and_then(|cmd| apply(book, cmd)) {
            Ok(()) => {
                info!(line = lineno + 1, "applied replay command");
                applied += 1;
            }
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping replay command"),
        }
    }
    Ok(applied)
}
