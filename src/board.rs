use crate::error::Rejection;
use crate::types::{CellState, Coord, GRID_SIZE, Orientation, SHIP_KINDS, ShipKind, ShotOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ship {
    pub kind: ShipKind,
    pub origin: Coord,
    pub orientation: Orientation,
    pub hits: usize,
}

impl Ship {
    pub fn length(&self) -> usize {
        self.kind.length()
    }

    pub fn is_sunk(&self) -> bool {
        self.hits == self.length()
    }

    pub fn cells(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.length()).map(move |i| match self.orientation {
            Orientation::Horizontal => Coord::new(self.origin.row, self.origin.col + i),
            Orientation::Vertical => Coord::new(self.origin.row + i, self.origin.col),
        })
    }

    pub fn contains(&self, at: Coord) -> bool {
        let end = |start: usize| start + self.length();
        match self.orientation {
            Orientation::Horizontal => {
                at.row == self.origin.row && (self.origin.col..end(self.origin.col)).contains(&at.col)
            }
            Orientation::Vertical => {
                at.col == self.origin.col && (self.origin.row..end(self.origin.row)).contains(&at.row)
            }
        }
    }
}

/// Ships placed so far, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipCounts([usize; 3]);

impl ShipCounts {
    pub fn get(&self, kind: ShipKind) -> usize {
        self.0[kind.index()]
    }

    fn increment(&mut self, kind: ShipKind) {
        self.0[kind.index()] += 1;
    }

    /// True only for exactly the legal fleet: 1 submarine, 2 frigates, 1 destroyer.
    pub fn is_complete(&self) -> bool {
        SHIP_KINDS.iter().all(|kind| self.get(*kind) == kind.max_count())
    }
}

/// One player's 8x8 grid plus the ships placed on it.
#[derive(Debug, Clone)]
pub struct Board {
    grid: [[CellState; GRID_SIZE]; GRID_SIZE],
    ships: Vec<Ship>,
    counts: ShipCounts,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            grid: [[CellState::Empty; GRID_SIZE]; GRID_SIZE],
            ships: Vec::new(),
            counts: ShipCounts::default(),
        }
    }

    pub fn cell(&self, at: Coord) -> CellState {
        self.grid[at.row][at.col]
    }

    pub fn ships(&self) -> &[Ship] {
        &self.ships
    }

    pub fn counts(&self) -> ShipCounts {
        self.counts
    }

    pub fn occupied_cells(&self) -> usize {
        self.grid
            .iter()
            .flatten()
            .filter(|cell| matches!(cell, CellState::Ship(_)))
            .count()
    }

    pub fn sunk_ships(&self) -> usize {
        self.ships.iter().filter(|ship| ship.is_sunk()).count()
    }

    /// Checks quota, bounds and overlap (in that order) and only then writes
    /// the ship. A rejected placement leaves the board untouched.
    pub fn validate_and_place(
        &mut self,
        kind: ShipKind,
        row: i64,
        col: i64,
        orientation: Orientation,
    ) -> Result<(), Rejection> {
        let placed = self.counts.get(kind);
        if placed >= kind.max_count() {
            return Err(Rejection::QuotaExceeded {
                kind,
                placed,
                max: kind.max_count(),
            });
        }

        let origin = Coord::checked(row, col).ok_or(Rejection::OutOfBounds)?;
        let far_end = match orientation {
            Orientation::Horizontal => origin.col + kind.length(),
            Orientation::Vertical => origin.row + kind.length(),
        };
        if far_end > GRID_SIZE {
            return Err(Rejection::OutOfBounds);
        }

        let ship = Ship {
            kind,
            origin,
            orientation,
            hits: 0,
        };
        if ship.cells().any(|at| self.cell(at) != CellState::Empty) {
            return Err(Rejection::Overlap);
        }

        for at in ship.cells() {
            self.grid[at.row][at.col] = CellState::Ship(kind);
        }
        self.counts.increment(kind);
        self.ships.push(ship);
        Ok(())
    }

    /// Resolves a shot against this board. Never returns `Win`; deciding the
    /// match is the coordinator's job.
    pub fn receive_shot(&mut self, at: Coord) -> Result<ShotOutcome, Rejection> {
        let cell = &mut self.grid[at.row][at.col];
        match *cell {
            CellState::Hit | CellState::Miss => Err(Rejection::AlreadyTargeted),
            CellState::Empty => {
                *cell = CellState::Miss;
                Ok(ShotOutcome::Miss)
            }
            CellState::Ship(_) => {
                *cell = CellState::Hit;
                let Some(ship) = self.ships.iter_mut().find(|ship| ship.contains(at)) else {
                    // Grid and ship list are written together, so this is unreachable.
                    return Ok(ShotOutcome::Hit);
                };
                ship.hits += 1;
                if ship.is_sunk() {
                    Ok(ShotOutcome::Sunk)
                } else {
                    Ok(ShotOutcome::Hit)
                }
            }
        }
    }
}
