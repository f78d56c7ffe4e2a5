use std::fmt;

pub const GRID_SIZE: usize = 8;

/// Ships every player must place before READY is accepted (1 + 2 + 1).
pub const FLEET_SIZE: usize = 4;

pub const MAX_NAME_LEN: usize = 49;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Empty,
    Ship(ShipKind),
    Hit,
    Miss,
}

impl CellState {
    pub fn is_resolved(self) -> bool {
        matches!(self, CellState::Hit | CellState::Miss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipKind {
    Submarine,
    Frigate,
    Destroyer,
}

pub const SHIP_KINDS: [ShipKind; 3] = [ShipKind::Submarine, ShipKind::Frigate, ShipKind::Destroyer];

impl ShipKind {
    pub fn symbol(self) -> char {
        match self {
            ShipKind::Submarine => 'S',
            ShipKind::Frigate => 'F',
            ShipKind::Destroyer => 'D',
        }
    }

    pub fn length(self) -> usize {
        match self {
            ShipKind::Submarine => 1,
            ShipKind::Frigate => 2,
            ShipKind::Destroyer => 3,
        }
    }

    pub fn max_count(self) -> usize {
        match self {
            ShipKind::Submarine => 1,
            ShipKind::Frigate => 2,
            ShipKind::Destroyer => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShipKind::Submarine => "SUBMARINE",
            ShipKind::Frigate => "FRIGATE",
            ShipKind::Destroyer => "DESTROYER",
        }
    }

    /// Looks a kind up by full name or one-letter symbol, ignoring case.
    pub fn from_identifier(identifier: &str) -> Option<ShipKind> {
        SHIP_KINDS.into_iter().find(|kind| {
            identifier.eq_ignore_ascii_case(kind.name())
                || (identifier.len() == 1
                    && identifier.chars().all(|c| c.eq_ignore_ascii_case(&kind.symbol())))
        })
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ShipKind::Submarine => 0,
            ShipKind::Frigate => 1,
            ShipKind::Destroyer => 2,
        }
    }
}

impl fmt::Display for ShipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn from_token(token: &str) -> Option<Orientation> {
        match token {
            "H" | "h" => Some(Orientation::Horizontal),
            "V" | "v" => Some(Orientation::Vertical),
            _ => None,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Horizontal => f.write_str("H"),
            Orientation::Vertical => f.write_str("V"),
        }
    }
}

/// Zero-indexed board position. Horizontal ships grow along `col`,
/// vertical ones along `row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Builds a coordinate from raw wire integers, `None` when off the grid.
    pub fn checked(row: i64, col: i64) -> Option<Coord> {
        let in_range = |v: i64| (0..GRID_SIZE as i64).contains(&v);
        if in_range(row) && in_range(col) {
            Some(Coord::new(row as usize, col as usize))
        } else {
            None
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Seat {
    First,
    Second,
}

pub const SEATS: [Seat; 2] = [Seat::First, Seat::Second];

impl Seat {
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }

    pub fn opponent(self) -> Seat {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat {}", self.index())
    }
}

/// Result of one shot as seen from the attacker's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotOutcome {
    Miss,
    Hit,
    Sunk,
    Win,
}
