//! Line-oriented text protocol. Every message is one newline-terminated line
//! whose first token names the command.

use std::{fmt, io};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::Rejection;
use crate::types::{Coord, MAX_NAME_LEN, Orientation, ShipKind, ShotOutcome};

/// Longest accepted line, newline excluded.
pub const MAX_LINE: usize = 256;

const JOIN_USAGE: &str = "JOIN <name>";
const POS_USAGE: &str = "POS <kind> <row> <col> <H|V>";
const READY_USAGE: &str = "READY";
const FIRE_USAGE: &str = "FIRE <row> <col>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join {
        name: String,
    },
    Place {
        kind: ShipKind,
        row: i64,
        col: i64,
        orientation: Orientation,
    },
    Ready,
    Fire {
        row: i64,
        col: i64,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, Rejection> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Err(Rejection::UnknownCommand(String::new()));
        };
        let args: Vec<&str> = tokens.collect();

        match head.to_ascii_uppercase().as_str() {
            "JOIN" => {
                let name = args.join(" ");
                if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
                    return Err(Rejection::Malformed(JOIN_USAGE));
                }
                Ok(Command::Join { name })
            }
            "POS" => {
                let [kind, row, col, orientation] = args[..] else {
                    return Err(Rejection::Malformed(POS_USAGE));
                };
                let kind = ShipKind::from_identifier(kind)
                    .ok_or_else(|| Rejection::UnknownShipKind(kind.to_string()))?;
                let row = parse_int(row, POS_USAGE)?;
                let col = parse_int(col, POS_USAGE)?;
                let orientation = Orientation::from_token(orientation)
                    .ok_or_else(|| Rejection::InvalidOrientation(orientation.to_string()))?;
                Ok(Command::Place {
                    kind,
                    row,
                    col,
                    orientation,
                })
            }
            "READY" => {
                if !args.is_empty() {
                    return Err(Rejection::Malformed(READY_USAGE));
                }
                Ok(Command::Ready)
            }
            "FIRE" => {
                let [row, col] = args[..] else {
                    return Err(Rejection::Malformed(FIRE_USAGE));
                };
                Ok(Command::Fire {
                    row: parse_int(row, FIRE_USAGE)?,
                    col: parse_int(col, FIRE_USAGE)?,
                })
            }
            _ => Err(Rejection::UnknownCommand(head.to_string())),
        }
    }
}

fn parse_int(token: &str, usage: &'static str) -> Result<i64, Rejection> {
    token.parse().map_err(|_| Rejection::Malformed(usage))
}

/// Splits a byte stream into lines of at most [`MAX_LINE`] bytes.
///
/// An overlong line is reported once as [`Rejection::LineTooLong`] and the
/// rest of it is skipped up to the next newline, so a peer that never sends
/// one cannot grow the buffer. Partial reads survive in `buf`, which keeps
/// [`LineReader::next_line`] usable inside `tokio::select!`.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(MAX_LINE + 1),
            discarding: false,
        }
    }

    /// `Ok(None)` once the peer closes the stream.
    pub async fn next_line(&mut self) -> io::Result<Option<Result<String, Rejection>>> {
        loop {
            let budget = (MAX_LINE + 1).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(budget)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 {
                if self.discarding || self.buf.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf).trim_end_matches('\r').to_string();
                self.buf.clear();
                return Ok(Some(Ok(line)));
            }

            let complete = self.buf.last() == Some(&b'\n');
            if self.discarding {
                self.buf.clear();
                if complete {
                    self.discarding = false;
                }
                continue;
            }
            if complete {
                let line = String::from_utf8_lossy(&self.buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                self.buf.clear();
                return Ok(Some(Ok(line)));
            }
            if self.buf.len() > MAX_LINE {
                self.buf.clear();
                self.discarding = true;
                return Ok(Some(Err(Rejection::LineTooLong(MAX_LINE))));
            }
        }
    }
}

/// Everything the server can say to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    WaitingForOpponent,
    Connected,
    Placed(ShipKind),
    ReadyAccepted,
    Rejected(Rejection),
    Start,
    Play,
    Wait,
    ShotResult(ShotOutcome),
    OpponentFire { at: Coord, outcome: ShotOutcome },
    Lose,
    OpponentLeft,
    End,
    Full,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::WaitingForOpponent => f.write_str("Waiting for another player..."),
            Notice::Connected => f.write_str("Connected. Preparing the game."),
            Notice::Placed(kind) => write!(f, "OK {kind} placed."),
            Notice::ReadyAccepted => f.write_str("OK Ready. Waiting for opponent..."),
            Notice::Rejected(rejection) => write!(f, "ERR {rejection}"),
            Notice::Start => f.write_str("START"),
            Notice::Play => f.write_str("PLAY"),
            Notice::Wait => f.write_str("WAIT"),
            Notice::ShotResult(outcome) => f.write_str(outcome_token(*outcome)),
            Notice::OpponentFire { at, outcome } => {
                // The defender only learns hit/sunk/miss; the win is announced by LOSE.
                let token = match outcome {
                    ShotOutcome::Win => outcome_token(ShotOutcome::Sunk),
                    other => outcome_token(*other),
                };
                write!(f, "OPPONENT_FIRE {at} {token}")
            }
            Notice::Lose => f.write_str("LOSE"),
            Notice::OpponentLeft => f.write_str("OPPONENT_LEFT Opponent disconnected. Game over."),
            Notice::End => f.write_str("END"),
            Notice::Full => f.write_str("FULL Game is full. Try again later."),
        }
    }
}

fn outcome_token(outcome: ShotOutcome) -> &'static str {
    match outcome {
        ShotOutcome::Miss => "MISS",
        ShotOutcome::Hit => "HIT",
        ShotOutcome::Sunk => "SUNK",
        ShotOutcome::Win => "WIN",
    }
}
