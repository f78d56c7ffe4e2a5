use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::{Notify, mpsc};

use crate::board::Board;
use crate::config::FirstTurn;
use crate::error::{JoinError, Rejection};
use crate::protocol::Notice;
use crate::types::{Coord, FLEET_SIZE, Orientation, SEATS, Seat, ShipKind, ShotOutcome};

/// Channel feeding one connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Notice>;

struct Occupant {
    name: Option<String>,
    outbox: Outbox,
}

impl Occupant {
    fn send(&self, notice: Notice) {
        // A closed outbox means the writer already saw the socket die; the
        // reader side reports that disconnect on its own.
        let _ = self.outbox.send(notice);
    }

    fn label(&self, seat: Seat) -> String {
        match &self.name {
            Some(name) => format!("{name} ({seat})"),
            None => seat.to_string(),
        }
    }
}

#[derive(Default)]
struct MatchState {
    seats: [Option<Occupant>; 2],
    ready: [bool; 2],
    started: bool,
    over: bool,
    current_turn: Option<Seat>,
    sunk_by: [usize; 2],
}

impl MatchState {
    fn send(&self, seat: Seat, notice: Notice) {
        if let Some(occupant) = &self.seats[seat.index()] {
            occupant.send(notice);
        }
    }

    fn label(&self, seat: Seat) -> String {
        match &self.seats[seat.index()] {
            Some(occupant) => occupant.label(seat),
            None => seat.to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        self.seats.iter().all(Option::is_none)
    }
}

/// Point-in-time view of the coordinator, mostly for tests and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub seated: [bool; 2],
    pub ready: [bool; 2],
    pub started: bool,
    pub over: bool,
    pub current_turn: Option<Seat>,
    pub sunk_by: [usize; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnWait {
    MyTurn,
    Over,
}

/// Shared state for one two-seat match.
///
/// Lock order is always `state` before a board. Readiness, turn and the
/// started/over flags live behind `state`; each board has its own lock and
/// is only touched by its owner while placing and by the attacker while
/// resolving a shot.
pub struct Match {
    state: Mutex<MatchState>,
    boards: [Mutex<Board>; 2],
    started: Notify,
    turn_changed: Notify,
    first_turn: FirstTurn,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Match {
    pub fn new(first_turn: FirstTurn) -> Self {
        Self {
            state: Mutex::new(MatchState::default()),
            boards: [Mutex::new(Board::new()), Mutex::new(Board::new())],
            started: Notify::new(),
            turn_changed: Notify::new(),
            first_turn,
        }
    }

    /// Claims a free seat for a new connection and greets it with the lobby
    /// notice. A finished match keeps refusing until its last handler leaves.
    pub fn seat(&self, outbox: Outbox) -> Result<Seat, JoinError> {
        let mut state = lock(&self.state);
        if state.over && !state.is_empty() {
            return Err(JoinError::Full);
        }
        let seat = SEATS
            .into_iter()
            .find(|seat| state.seats[seat.index()].is_none())
            .ok_or(JoinError::Full)?;

        let opponent_present = state.seats[seat.opponent().index()].is_some();
        let occupant = Occupant { name: None, outbox };
        occupant.send(if opponent_present {
            Notice::Connected
        } else {
            Notice::WaitingForOpponent
        });
        state.seats[seat.index()] = Some(occupant);
        Ok(seat)
    }

    pub fn set_name(&self, seat: Seat, name: String) {
        let mut state = lock(&self.state);
        if let Some(occupant) = state.seats[seat.index()].as_mut() {
            info!("Player {} joined as {}", name, seat);
            occupant.name = Some(name);
        }
    }

    pub fn place(
        &self,
        seat: Seat,
        kind: ShipKind,
        row: i64,
        col: i64,
        orientation: Orientation,
    ) -> Result<(), Rejection> {
        let mut board = lock(&self.boards[seat.index()]);
        board.validate_and_place(kind, row, col, orientation)?;
        debug!(
            "{} placed {} at ({}, {}) {}; fleet so far: S:{} F:{} D:{}",
            seat,
            kind,
            row,
            col,
            orientation,
            board.counts().get(ShipKind::Submarine),
            board.counts().get(ShipKind::Frigate),
            board.counts().get(ShipKind::Destroyer),
        );
        Ok(())
    }

    /// Accepts READY only for a complete fleet and acknowledges it. The
    /// second acceptance starts the match, announces the first turn and
    /// wakes both handlers.
    pub fn mark_ready(&self, seat: Seat) -> Result<(), Rejection> {
        let complete = lock(&self.boards[seat.index()]).counts().is_complete();
        if !complete {
            return Err(Rejection::FleetIncomplete);
        }

        let mut state = lock(&self.state);
        if state.over {
            return Err(Rejection::GameNotActive);
        }
        state.ready[seat.index()] = true;
        state.send(seat, Notice::ReadyAccepted);
        debug!("{} is ready", state.label(seat));

        if state.ready.iter().all(|ready| *ready) && !state.started {
            let first = match self.first_turn {
                FirstTurn::FirstSeat => Seat::First,
                FirstTurn::Random => {
                    if rand::random::<bool>() {
                        Seat::First
                    } else {
                        Seat::Second
                    }
                }
            };
            state.started = true;
            state.current_turn = Some(first);
            for each in SEATS {
                state.send(each, Notice::Start);
                state.send(each, if each == first { Notice::Play } else { Notice::Wait });
            }
            info!("Both fleets ready, match started. {} fires first", state.label(first));
            self.started.notify_waiters();
            self.turn_changed.notify_waiters();
        }
        Ok(())
    }

    /// Blocks until the match starts (`true`) or ends before starting (`false`).
    pub async fn wait_started(&self) -> bool {
        loop {
            let notified = self.started.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = lock(&self.state);
                if state.over {
                    return false;
                }
                if state.started {
                    return true;
                }
            }
            notified.await;
        }
    }

    pub async fn wait_turn(&self, seat: Seat) -> TurnWait {
        loop {
            let notified = self.turn_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = lock(&self.state);
                if state.over {
                    return TurnWait::Over;
                }
                if state.current_turn == Some(seat) {
                    return TurnWait::MyTurn;
                }
            }
            notified.await;
        }
    }

    pub async fn wait_over(&self) {
        loop {
            let notified = self.turn_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let over = lock(&self.state).over;
            if over {
                return;
            }
            notified.await;
        }
    }

    /// Fires `attacker`'s shot at the opponent's board.
    ///
    /// Preconditions are checked in order (game active, turn, coordinate,
    /// fresh cell) and a failure mutates nothing. The defender's board is
    /// updated and released before the turn flips, so the next attacker
    /// never observes a half-resolved shot.
    pub fn resolve_attack(&self, attacker: Seat, row: i64, col: i64) -> Result<ShotOutcome, Rejection> {
        {
            let state = lock(&self.state);
            if !state.started || state.over {
                return Err(Rejection::GameNotActive);
            }
            if state.current_turn != Some(attacker) {
                return Err(Rejection::NotYourTurn);
            }
        }
        let at = Coord::checked(row, col).ok_or(Rejection::InvalidCoordinate)?;
        let defender = attacker.opponent();

        let mut outcome = lock(&self.boards[defender.index()]).receive_shot(at)?;

        let mut state = lock(&self.state);
        if outcome == ShotOutcome::Sunk {
            state.sunk_by[attacker.index()] += 1;
            if state.sunk_by[attacker.index()] == FLEET_SIZE {
                outcome = ShotOutcome::Win;
            }
        }
        info!(
            "{} fired at ({}) -> {:?}",
            state.label(attacker),
            at,
            outcome
        );

        let own_result = match outcome {
            ShotOutcome::Win => ShotOutcome::Sunk,
            other => other,
        };
        state.send(attacker, Notice::ShotResult(own_result));
        state.send(defender, Notice::OpponentFire { at, outcome: own_result });

        if outcome == ShotOutcome::Win {
            if !state.over {
                state.over = true;
                state.send(attacker, Notice::ShotResult(ShotOutcome::Win));
                state.send(defender, Notice::Lose);
                let sunk = lock(&self.boards[defender.index()]).sunk_ships();
                info!(
                    "Match over. {} wins, {}/{} ships sunk",
                    state.label(attacker),
                    sunk,
                    FLEET_SIZE
                );
            }
            self.started.notify_waiters();
            self.turn_changed.notify_waiters();
        } else if !state.over {
            state.current_turn = Some(defender);
            state.send(attacker, Notice::Wait);
            state.send(defender, Notice::Play);
            debug!("Turn passed to {}", state.label(defender));
            self.turn_changed.notify_waiters();
        }
        Ok(outcome)
    }

    /// Ends the match because `seat` dropped. Returns whether this call was
    /// the one that ended it.
    pub fn abandon(&self, seat: Seat) -> bool {
        let mut state = lock(&self.state);
        let ended_now = !state.over;
        if ended_now {
            state.over = true;
            state.send(seat.opponent(), Notice::OpponentLeft);
            warn!("{} disconnected, match over", state.label(seat));
        }
        self.started.notify_waiters();
        self.turn_changed.notify_waiters();
        ended_now
    }

    /// Frees `seat`. When the last seat empties, the whole match is reset in
    /// place so the next pair of connections starts from scratch.
    pub fn leave(&self, seat: Seat) {
        let mut state = lock(&self.state);
        debug!("{} left", state.label(seat));
        state.seats[seat.index()] = None;

        if state.is_empty() {
            *state = MatchState::default();
            for board in &self.boards {
                *lock(board) = Board::new();
            }
            info!("Session reset, ready for a new match");
        } else if !state.started && !state.over {
            // Left before the match began (malformed JOIN): the seat is reusable.
            state.ready[seat.index()] = false;
            *lock(&self.boards[seat.index()]) = Board::new();
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        let state = lock(&self.state);
        MatchSnapshot {
            seated: [state.seats[0].is_some(), state.seats[1].is_some()],
            ready: state.ready,
            started: state.started,
            over: state.over,
            current_turn: state.current_turn,
            sunk_by: state.sunk_by,
        }
    }

    #[cfg(test)]
    pub fn board(&self, seat: Seat) -> Board {
        lock(&self.boards[seat.index()]).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellState;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn seated_match() -> (Match, UnboundedReceiver<Notice>, UnboundedReceiver<Notice>) {
        let game = Match::new(FirstTurn::FirstSeat);
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        assert_eq!(game.seat(tx_a), Ok(Seat::First));
        assert_eq!(game.seat(tx_b), Ok(Seat::Second));
        (game, rx_a, rx_b)
    }

    fn place_fleet(game: &Match, seat: Seat, first_row: i64) {
        let h = Orientation::Horizontal;
        game.place(seat, ShipKind::Submarine, first_row, 0, h).unwrap();
        game.place(seat, ShipKind::Frigate, first_row + 1, 0, h).unwrap();
        game.place(seat, ShipKind::Frigate, first_row + 2, 0, h).unwrap();
        game.place(seat, ShipKind::Destroyer, first_row + 3, 0, h).unwrap();
    }

    fn started_match() -> (Match, UnboundedReceiver<Notice>, UnboundedReceiver<Notice>) {
        let (game, rx_a, rx_b) = seated_match();
        place_fleet(&game, Seat::First, 0);
        place_fleet(&game, Seat::Second, 4);
        game.mark_ready(Seat::First).unwrap();
        game.mark_ready(Seat::Second).unwrap();
        (game, rx_a, rx_b)
    }

    fn drain(rx: &mut UnboundedReceiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    #[test]
    fn third_seat_is_refused() {
        let (game, mut rx_a, mut rx_b) = seated_match();
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        assert_eq!(game.seat(tx_c), Err(JoinError::Full));
        assert_eq!(drain(&mut rx_a), vec![Notice::WaitingForOpponent]);
        assert_eq!(drain(&mut rx_b), vec![Notice::Connected]);
    }

    #[test]
    fn ready_requires_complete_fleet() {
        let (game, _rx_a, _rx_b) = seated_match();
        game.place(Seat::First, ShipKind::Submarine, 0, 0, Orientation::Vertical)
            .unwrap();
        assert_eq!(game.mark_ready(Seat::First), Err(Rejection::FleetIncomplete));
        assert_eq!(game.snapshot().ready, [false, false]);
    }

    #[test]
    fn ready_is_idempotent_and_start_happens_once() {
        let (game, mut rx_a, mut rx_b) = seated_match();
        place_fleet(&game, Seat::First, 0);
        place_fleet(&game, Seat::Second, 4);
        game.mark_ready(Seat::First).unwrap();
        game.mark_ready(Seat::First).unwrap();
        assert!(!game.snapshot().started);

        game.mark_ready(Seat::Second).unwrap();
        game.mark_ready(Seat::Second).unwrap();
        let snapshot = game.snapshot();
        assert!(snapshot.started);
        assert_eq!(snapshot.current_turn, Some(Seat::First));

        assert_eq!(
            drain(&mut rx_a),
            vec![
                Notice::WaitingForOpponent,
                Notice::ReadyAccepted,
                Notice::ReadyAccepted,
                Notice::Start,
                Notice::Play
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![
                Notice::Connected,
                Notice::ReadyAccepted,
                Notice::Start,
                Notice::Wait,
                Notice::ReadyAccepted
            ]
        );
    }

    #[test]
    fn random_first_turn_is_announced_and_enforced() {
        let mut openers = [0usize; 2];
        for _ in 0..64 {
            let game = Match::new(FirstTurn::Random);
            let (tx_a, mut rx_a) = mpsc::unbounded_channel();
            let (tx_b, mut rx_b) = mpsc::unbounded_channel();
            game.seat(tx_a).unwrap();
            game.seat(tx_b).unwrap();
            place_fleet(&game, Seat::First, 0);
            place_fleet(&game, Seat::Second, 4);
            game.mark_ready(Seat::First).unwrap();
            game.mark_ready(Seat::Second).unwrap();

            let first = game.snapshot().current_turn.expect("no first turn chosen");
            openers[first.index()] += 1;
            let (opener_rx, waiter_rx) = match first {
                Seat::First => (&mut rx_a, &mut rx_b),
                Seat::Second => (&mut rx_b, &mut rx_a),
            };
            assert_eq!(drain(opener_rx).last(), Some(&Notice::Play));
            assert_eq!(drain(waiter_rx).last(), Some(&Notice::Wait));
            assert_eq!(
                game.resolve_attack(first.opponent(), 3, 7),
                Err(Rejection::NotYourTurn)
            );
            assert_eq!(game.resolve_attack(first, 3, 7), Ok(ShotOutcome::Miss));
            assert_eq!(game.snapshot().current_turn, Some(first.opponent()));
        }
        // 2^-63 chance of a false failure.
        assert!(openers[0] > 0 && openers[1] > 0, "coin never flipped: {openers:?}");
    }

    #[test]
    fn hit_notifies_both_and_flips_turn() {
        let (game, mut rx_a, mut rx_b) = started_match();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(game.resolve_attack(Seat::First, 4, 0), Ok(ShotOutcome::Sunk));
        assert_eq!(
            drain(&mut rx_a),
            vec![Notice::ShotResult(ShotOutcome::Sunk), Notice::Wait]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![
                Notice::OpponentFire {
                    at: Coord::new(4, 0),
                    outcome: ShotOutcome::Sunk
                },
                Notice::Play
            ]
        );
        assert_eq!(game.snapshot().current_turn, Some(Seat::Second));
        assert_eq!(
            game.resolve_attack(Seat::First, 5, 0),
            Err(Rejection::NotYourTurn)
        );
    }

    #[test]
    fn rejections_follow_precondition_order() {
        let (game, _rx_a, _rx_b) = seated_match();
        assert_eq!(
            game.resolve_attack(Seat::First, 99, 0),
            Err(Rejection::GameNotActive)
        );

        let (game, _rx_a, _rx_b) = started_match();
        assert_eq!(
            game.resolve_attack(Seat::Second, 99, 0),
            Err(Rejection::NotYourTurn)
        );
        assert_eq!(
            game.resolve_attack(Seat::First, 8, 0),
            Err(Rejection::InvalidCoordinate)
        );
        assert_eq!(game.resolve_attack(Seat::First, 7, 7), Ok(ShotOutcome::Miss));
        assert_eq!(game.resolve_attack(Seat::Second, 7, 7), Ok(ShotOutcome::Miss));
        let before = game.snapshot();
        assert_eq!(
            game.resolve_attack(Seat::First, 7, 7),
            Err(Rejection::AlreadyTargeted)
        );
        assert_eq!(game.snapshot(), before);
    }

    #[test]
    fn sinking_every_ship_wins() {
        let (game, mut rx_a, mut rx_b) = started_match();
        let targets = [(4, 0), (5, 0), (5, 1), (6, 0), (6, 1), (7, 0), (7, 1), (7, 2)];
        let mut misses = (0..8).map(|col| (7i64, col as i64)).rev();

        for (i, (row, col)) in targets.iter().enumerate() {
            let outcome = game.resolve_attack(Seat::First, *row, *col).unwrap();
            if i == targets.len() - 1 {
                assert_eq!(outcome, ShotOutcome::Win);
                break;
            }
            assert_ne!(outcome, ShotOutcome::Win);
            let (mr, mc) = misses.next().unwrap();
            assert_eq!(game.resolve_attack(Seat::Second, mr, mc), Ok(ShotOutcome::Miss));
        }

        let snapshot = game.snapshot();
        assert!(snapshot.over);
        assert_eq!(snapshot.sunk_by, [FLEET_SIZE, 0]);
        assert_eq!(game.board(Seat::Second).sunk_ships(), FLEET_SIZE);
        assert_eq!(
            game.resolve_attack(Seat::Second, 0, 0),
            Err(Rejection::GameNotActive)
        );

        let tail_a = drain(&mut rx_a);
        assert_eq!(
            &tail_a[tail_a.len() - 2..],
            &[
                Notice::ShotResult(ShotOutcome::Sunk),
                Notice::ShotResult(ShotOutcome::Win)
            ]
        );
        let tail_b = drain(&mut rx_b);
        assert_eq!(tail_b.last(), Some(&Notice::Lose));
    }

    #[test]
    fn abandon_notifies_opponent_once() {
        let (game, mut rx_a, mut rx_b) = started_match();
        drain(&mut rx_a);
        drain(&mut rx_b);
        assert!(game.abandon(Seat::Second));
        assert!(!game.abandon(Seat::First));
        assert_eq!(drain(&mut rx_a), vec![Notice::OpponentLeft]);
        assert!(drain(&mut rx_b).is_empty());
        assert!(game.snapshot().over);
    }

    #[test]
    fn last_leave_resets_match() {
        let (game, _rx_a, _rx_b) = started_match();
        game.resolve_attack(Seat::First, 4, 0).unwrap();
        game.abandon(Seat::First);

        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        game.leave(Seat::First);
        assert_eq!(game.seat(tx_c), Err(JoinError::Full));

        game.leave(Seat::Second);
        let snapshot = game.snapshot();
        assert!(!snapshot.started && !snapshot.over);
        assert_eq!(snapshot.current_turn, None);
        assert_eq!(game.board(Seat::Second).cell(Coord::new(4, 0)), CellState::Empty);
        assert!(game.board(Seat::First).ships().is_empty());

        let (tx_d, _rx_d) = mpsc::unbounded_channel();
        assert_eq!(game.seat(tx_d), Ok(Seat::First));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiters_wake_on_start_and_turn() {
        let (game, _rx_a, _rx_b) = seated_match();
        let game = Arc::new(game);
        place_fleet(&game, Seat::First, 0);
        place_fleet(&game, Seat::Second, 4);

        let waiter = {
            let game = Arc::clone(&game);
            tokio::spawn(async move {
                let started = game.wait_started().await;
                (started, game.wait_turn(Seat::Second).await)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        game.mark_ready(Seat::First).unwrap();
        game.mark_ready(Seat::Second).unwrap();
        game.resolve_attack(Seat::First, 7, 7).unwrap();

        let (started, turn) = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter stalled")
            .unwrap();
        assert!(started);
        assert_eq!(turn, TurnWait::MyTurn);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandon_releases_every_waiter() {
        let (game, _rx_a, _rx_b) = seated_match();
        let game = Arc::new(game);

        let start_waiter = {
            let game = Arc::clone(&game);
            tokio::spawn(async move { game.wait_started().await })
        };
        let turn_waiter = {
            let game = Arc::clone(&game);
            tokio::spawn(async move { game.wait_turn(Seat::First).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        game.abandon(Seat::Second);

        let started = tokio::time::timeout(Duration::from_secs(2), start_waiter)
            .await
            .expect("start waiter stalled")
            .unwrap();
        let turn = tokio::time::timeout(Duration::from_secs(2), turn_waiter)
            .await
            .expect("turn waiter stalled")
            .unwrap();
        assert!(!started);
        assert_eq!(turn, TurnWait::Over);
    }

    fn any_counts() -> impl Strategy<Value = (usize, usize, usize)> {
        (0usize..=1, 0usize..=2, 0usize..=1)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn ready_accepted_only_for_full_fleet((subs, frigates, destroyers) in any_counts()) {
            let (game, _rx_a, _rx_b) = seated_match();
            let v = Orientation::Vertical;
            for col in 0..subs {
                game.place(Seat::First, ShipKind::Submarine, 0, col as i64, v).unwrap();
            }
            for col in 0..frigates {
                game.place(Seat::First, ShipKind::Frigate, 2, col as i64, v).unwrap();
            }
            for col in 0..destroyers {
                game.place(Seat::First, ShipKind::Destroyer, 5, col as i64, v).unwrap();
            }
            let complete = (subs, frigates, destroyers) == (1, 2, 1);
            prop_assert_eq!(game.mark_ready(Seat::First).is_ok(), complete);
            prop_assert_eq!(game.snapshot().ready[0], complete);
        }
    }
}
