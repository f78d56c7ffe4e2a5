use thiserror::Error;

use crate::types::ShipKind;

/// A single command refused by the server. The connection stays open and
/// nothing was mutated; the client has to re-issue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Invalid command format. Usage: {0}")]
    Malformed(&'static str),
    #[error("Line too long (max {0} bytes).")]
    LineTooLong(usize),
    #[error("Unknown command '{0}'.")]
    UnknownCommand(String),
    #[error("Command not allowed now: {0}")]
    WrongPhase(&'static str),
    #[error("Unknown ship kind '{0}'. Use SUBMARINE (S), FRIGATE (F) or DESTROYER (D).")]
    UnknownShipKind(String),
    #[error("Invalid orientation '{0}'. Use H or V.")]
    InvalidOrientation(String),
    #[error("Limit for {kind} reached ({placed}/{max}).")]
    QuotaExceeded {
        kind: ShipKind,
        placed: usize,
        max: usize,
    },
    #[error("Invalid placement: outside the board.")]
    OutOfBounds,
    #[error("Invalid placement: overlaps another ship.")]
    Overlap,
    #[error("Fleet incomplete: place 1 SUBMARINE, 2 FRIGATE and 1 DESTROYER first.")]
    FleetIncomplete,
    #[error("Game not active.")]
    GameNotActive,
    #[error("Not your turn.")]
    NotYourTurn,
    #[error("Invalid coordinate (0-7).")]
    InvalidCoordinate,
    #[error("Already targeted. Pick another cell.")]
    AlreadyTargeted,
}

/// Why a freshly accepted connection gets no seat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Game is full. Try again later.")]
    Full,
}
