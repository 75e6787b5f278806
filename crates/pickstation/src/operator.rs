// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator command surface.
//!
//! Commands arrive as text lines (console or any other line source) and are
//! forwarded to the station loop over a channel:
//!
//! ```text
//! scan A1 L1          start a session (also: "A1 L1", "i A1 L1")
//! assign 3 12345 50  put order 12345 (50 pieces) on destination 3 (also: "i 3 12345 50")
//! finalize 3          close destination 3 as it stands (also: "f 3")
//! confirm 2           confirm destination 2 (also: "ok 2")
//! +2 / -2             adjust destination 2
//! accept              accept the short count under review
//! reject              send it back for adjustment
//! sub L7:2 L8:1       complete it from other lots
//! cancel              cancel the session (also: "salir")
//! status | clear | done | load <path> | help | quit
//! ```

use crate::engine::Substitute;
use crate::error::StationError;
use crate::protocol::{Delta, DeviceEvent};
use crossbeam::channel::Sender;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

/// One operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    StartSession { sku: String, lot: String },
    Assign { destination: i64, order: u32, pieces: u32 },
    Finalize(i64),
    Confirm(i64),
    Adjust(i64, Delta),
    Accept,
    Reject,
    Substitute(Vec<Substitute>),
    CancelSession,
    Status,
    ClearDisplays,
    DisplayCompleted,
    LoadManifest(PathBuf),
    Help,
    Quit,
}

impl OperatorCommand {
    /// Parse a console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, StationError> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("scan" | "start" | "i", [sku, lot]) => OperatorCommand::StartSession {
                sku: sku.to_string(),
                lot: lot.to_string(),
            },
            ("assign" | "i", [n, order, pieces]) => OperatorCommand::Assign {
                destination: parse_destination(line, n)?,
                order: parse_count(line, order, "order")?,
                pieces: parse_count(line, pieces, "piece count")?,
            },
            ("finalize" | "f", [n]) => OperatorCommand::Finalize(parse_destination(line, n)?),
            ("confirm" | "ok", [n]) => OperatorCommand::Confirm(parse_destination(line, n)?),
            ("accept" | "a", []) => OperatorCommand::Accept,
            ("reject" | "r", []) => OperatorCommand::Reject,
            ("sub" | "substitute", subs) if !subs.is_empty() => OperatorCommand::Substitute(
                subs.iter()
                    .map(|s| parse_substitute(line, s))
                    .collect::<Result<_, _>>()?,
            ),
            ("cancel" | "salir", []) => OperatorCommand::CancelSession,
            ("status" | "s", []) => OperatorCommand::Status,
            ("clear" | "c", []) => OperatorCommand::ClearDisplays,
            ("done" | "d", []) => OperatorCommand::DisplayCompleted,
            ("load", [path]) => OperatorCommand::LoadManifest(PathBuf::from(*path)),
            ("help" | "?", []) => OperatorCommand::Help,
            ("quit" | "q" | "exit", []) => OperatorCommand::Quit,
            (_, []) if head.starts_with(['+', '-']) => match DeviceEvent::parse(head)? {
                DeviceEvent::Adjust(n, delta) => OperatorCommand::Adjust(i64::from(n), delta),
                _ => return Err(StationError::parse(line, "unknown command")),
            },
            (word, [lot]) if !KEYWORDS.contains(&word) => OperatorCommand::StartSession {
                sku: head.to_string(),
                lot: lot.to_string(),
            },
            _ => return Err(StationError::parse(line, "unknown command")),
        };
        Ok(Some(command))
    }
}

const KEYWORDS: &[&str] = &[
    "scan", "start", "i", "assign", "f", "finalize", "confirm", "ok", "accept", "a", "reject", "r", "sub", "substitute",
    "cancel", "salir", "status", "s", "clear", "c", "done", "d", "load", "help", "?", "quit",
    "q", "exit",
];

fn parse_destination(line: &str, word: &str) -> Result<i64, StationError> {
    word.parse::<i64>()
        .map_err(|_| StationError::parse(line, format!("{word:?} is not a destination number")))
}

/// Positive count for `what`.
fn parse_count(line: &str, word: &str, what: &str) -> Result<u32, StationError> {
    match word.parse::<u32>() {
        Ok(0) => Err(StationError::parse(line, format!("{what} must be positive"))),
        Ok(n) => Ok(n),
        Err(_) => Err(StationError::parse(line, format!("{word:?} is not a valid {what}"))),
    }
}

fn parse_substitute(line: &str, word: &str) -> Result<Substitute, StationError> {
    let (lot, pieces) = word
        .split_once(':')
        .ok_or_else(|| StationError::parse(line, format!("{word:?} is not LOT:QTY")))?;
    if lot.is_empty() {
        return Err(StationError::parse(line, "substitute lot is empty"));
    }
    let pieces = pieces
        .parse::<u32>()
        .map_err(|_| StationError::parse(line, format!("{pieces:?} is not a quantity")))?;
    Ok(Substitute {
        lot: lot.to_string(),
        pieces,
    })
}

/// Console help text.
pub const HELP: &str = "\
commands:
  scan <sku> <lot>     start a session (or just: <sku> <lot>)
  i <n> <order> <qty>  put an order on destination n by hand
  f <n>                close destination n as it stands
  confirm <n>          confirm destination n
  +<n> / -<n>          adjust destination n
  accept | reject      resolve the confirmation under review
  sub <lot>:<qty> ...  complete it from other lots
  cancel               cancel the session
  status | clear | done | load <path> | quit";

/// Read operator commands from stdin on a background thread.
///
/// Unparseable lines are logged and skipped. The thread ends on
/// end of input, after forwarding `quit`, or when the receiver is gone.
pub fn spawn_console(commands: Sender<OperatorCommand>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pickstation-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match OperatorCommand::parse(&line) {
                    Ok(Some(command)) => {
                        let quit = command == OperatorCommand::Quit;
                        if commands.send(command).is_err() || quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Ignoring operator input"),
                }
            }
            let _ = commands.send(OperatorCommand::Quit);
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> OperatorCommand {
        OperatorCommand::parse(line)
            .expect("parses")
            .expect("not blank")
    }

    #[test]
    fn test_start_session_forms() {
        let expected = OperatorCommand::StartSession {
            sku: "A1".into(),
            lot: "L1".into(),
        };
        assert_eq!(parse("scan A1 L1"), expected);
        assert_eq!(parse("i A1 L1"), expected);
        assert_eq!(parse("  A1   L1 "), expected);
    }

    #[test]
    fn test_destination_commands() {
        assert_eq!(parse("confirm 3"), OperatorCommand::Confirm(3));
        assert_eq!(parse("OK 2"), OperatorCommand::Confirm(2));
        assert_eq!(parse("+4"), OperatorCommand::Adjust(4, Delta::Increment));
        assert_eq!(parse("-1"), OperatorCommand::Adjust(1, Delta::Decrement));
        assert_eq!(
            parse("i 3 12345 50"),
            OperatorCommand::Assign {
                destination: 3,
                order: 12345,
                pieces: 50
            }
        );
        assert_eq!(
            parse("assign 1 7 2"),
            OperatorCommand::Assign {
                destination: 1,
                order: 7,
                pieces: 2
            }
        );
        assert_eq!(parse("f 2"), OperatorCommand::Finalize(2));
        assert_eq!(parse("finalize 4"), OperatorCommand::Finalize(4));
    }

    #[test]
    fn test_review_commands() {
        assert_eq!(parse("accept"), OperatorCommand::Accept);
        assert_eq!(parse("r"), OperatorCommand::Reject);
        assert_eq!(
            parse("sub L7:2 L8:1"),
            OperatorCommand::Substitute(vec![
                Substitute {
                    lot: "L7".into(),
                    pieces: 2
                },
                Substitute {
                    lot: "L8".into(),
                    pieces: 1
                },
            ])
        );
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse("salir"), OperatorCommand::CancelSession);
        assert_eq!(parse("status"), OperatorCommand::Status);
        assert_eq!(parse("c"), OperatorCommand::ClearDisplays);
        assert_eq!(parse("done"), OperatorCommand::DisplayCompleted);
        assert_eq!(
            parse("load orders.csv"),
            OperatorCommand::LoadManifest(PathBuf::from("orders.csv"))
        );
        assert_eq!(parse("quit"), OperatorCommand::Quit);
    }

    #[test]
    fn test_blank_and_invalid() {
        assert_eq!(OperatorCommand::parse("   ").ok(), Some(None));
        for bad in [
            "confirm x",
            "sub L7",
            "sub :2",
            "sub L7:x",
            "+z",
            "a b c",
            "accept now",
            "i 1 10 0",
            "i 1 0 5",
            "i 1 10 x",
            "f x",
            "f 1 2",
            "sub L7:4294967296",
        ] {
            assert!(
                matches!(OperatorCommand::parse(bad), Err(StationError::Parse { .. })),
                "{bad} should not parse"
            );
        }
    }
}
