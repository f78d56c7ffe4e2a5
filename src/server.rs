use anyhow::Result;
use log::{debug, error, info, warn};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use crate::config::Config;
use crate::error::{JoinError, Rejection};
use crate::game_match::{Match, Outbox, TurnWait};
use crate::protocol::{Command, LineReader, Notice};
use crate::types::{Seat, ShotOutcome};

pub async fn run_server(config: &Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Battleship server listening on {}", listener.local_addr()?);
    info!("Waiting for 2 players to connect...");

    let game = Arc::new(Match::new(config.first_turn));

    tokio::select! {
        result = serve(listener, game) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down server...");
            Ok(())
        }
    }
}

/// Accept loop. Every connection gets a seat in `game` or is turned away
/// with a FULL notice.
pub async fn serve(listener: TcpListener, game: Arc<Match>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = admit(stream, addr, &game).await {
                    error!("Failed to admit {}: {}", addr, e);
                }
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

async fn admit(mut stream: TcpStream, addr: SocketAddr, game: &Arc<Match>) -> Result<()> {
    let (outbox, inbox) = mpsc::unbounded_channel();
    let seat = match game.seat(outbox.clone()) {
        Ok(seat) => seat,
        Err(JoinError::Full) => {
            info!("Rejected {}: game is full", addr);
            stream.write_all(format!("{}\n", Notice::Full).as_bytes()).await?;
            stream.shutdown().await?;
            return Ok(());
        }
    };
    info!("Player connected from {} into {}", addr, seat);

    let (reader, writer) = stream.into_split();
    tokio::spawn(write_notices(writer, inbox, addr));

    let connection = Connection {
        game: Arc::clone(game),
        seat,
        lines: LineReader::new(reader),
        outbox,
        peer_open: true,
    };
    tokio::spawn(connection.run());
    Ok(())
}

/// Drains one connection's outbox onto its socket. Ends once every sender
/// (the handler and its seat) has been dropped, which closes the socket.
async fn write_notices(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::UnboundedReceiver<Notice>,
    addr: SocketAddr,
) {
    while let Some(notice) = inbox.recv().await {
        debug!("-> {}: {}", addr, notice);
        if let Err(e) = writer.write_all(format!("{notice}\n").as_bytes()).await {
            error!("Write to {} failed: {}", addr, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingJoin,
    Placing,
    AwaitingOpponentReady,
    AwaitingTurn,
    MyTurn,
    Finished,
}

struct Connection {
    game: Arc<Match>,
    seat: Seat,
    lines: LineReader<OwnedReadHalf>,
    outbox: Outbox,
    peer_open: bool,
}

impl Connection {
    async fn run(mut self) {
        let mut phase = Phase::AwaitingJoin;
        while phase != Phase::Finished {
            debug!("{} -> {:?}", self.seat, phase);
            phase = self.advance(phase).await;
        }

        if self.peer_open {
            self.send(Notice::End);
        }
        self.game.leave(self.seat);
        debug!("{} handler finished", self.seat);
    }

    async fn advance(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::AwaitingJoin => self.await_join().await,
            Phase::Placing => self.placing().await,
            Phase::AwaitingOpponentReady => self.await_opponent_ready().await,
            Phase::AwaitingTurn => self.await_turn().await,
            Phase::MyTurn => self.my_turn().await,
            Phase::Finished => Phase::Finished,
        }
    }

    fn send(&self, notice: Notice) {
        let _ = self.outbox.send(notice);
    }

    fn reject(&self, rejection: Rejection) {
        debug!("{} rejected: {}", self.seat, rejection);
        self.send(Notice::Rejected(rejection));
    }

    /// Next parsed command from the socket; `None` on EOF or any read error.
    async fn next_command(&mut self) -> Option<Result<Command, Rejection>> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(line.and_then(|line| Command::parse(&line))),
            Ok(None) => None,
            Err(e) => {
                warn!("Read from {} failed: {}", self.seat, e);
                None
            }
        }
    }

    fn disconnected(&mut self) -> Phase {
        self.peer_open = false;
        self.game.abandon(self.seat);
        Phase::Finished
    }

    async fn await_join(&mut self) -> Phase {
        let game = Arc::clone(&self.game);
        let command = tokio::select! {
            command = self.next_command() => command,
            _ = game.wait_over() => return Phase::Finished,
        };
        let Some(command) = command else {
            return self.disconnected();
        };
        match command {
            Ok(Command::Join { name }) => {
                self.game.set_name(self.seat, name);
                Phase::Placing
            }
            other => {
                warn!("{} sent malformed JOIN: {:?}", self.seat, other);
                self.send(Notice::Rejected(Rejection::Malformed("JOIN <name>")));
                // Only this connection is dropped; the match carries on.
                self.peer_open = false;
                Phase::Finished
            }
        }
    }

    async fn placing(&mut self) -> Phase {
        loop {
            let game = Arc::clone(&self.game);
            let command = tokio::select! {
                command = self.next_command() => command,
                _ = game.wait_over() => return Phase::Finished,
            };
            let Some(command) = command else {
                return self.disconnected();
            };

            match command {
                Ok(Command::Place {
                    kind,
                    row,
                    col,
                    orientation,
                }) => match self.game.place(self.seat, kind, row, col, orientation) {
                    Ok(()) => self.send(Notice::Placed(kind)),
                    Err(rejection) => self.reject(rejection),
                },
                Ok(Command::Ready) => match self.game.mark_ready(self.seat) {
                    Ok(()) => return Phase::AwaitingOpponentReady,
                    Err(rejection) => self.reject(rejection),
                },
                Ok(Command::Fire { .. }) => self.reject(Rejection::GameNotActive),
                Ok(Command::Join { .. }) => self.reject(Rejection::WrongPhase("already joined")),
                Err(rejection) => self.reject(rejection),
            }
        }
    }

    async fn await_opponent_ready(&mut self) -> Phase {
        loop {
            let game = Arc::clone(&self.game);
            // The start takes priority over lines already queued behind it.
            let command = tokio::select! {
                biased;
                started = game.wait_started() => {
                    return if started { Phase::AwaitingTurn } else { Phase::Finished };
                }
                command = self.next_command() => command,
            };
            let Some(command) = command else {
                return self.disconnected();
            };

            match command {
                Ok(Command::Ready) => {
                    if let Err(rejection) = self.game.mark_ready(self.seat) {
                        self.reject(rejection);
                    }
                }
                Ok(Command::Fire { row, col }) => {
                    if let Some(next) = self.battle_command(Ok(Command::Fire { row, col })) {
                        return next;
                    }
                }
                Ok(_) => self.reject(Rejection::WrongPhase("waiting for opponent to be ready")),
                Err(rejection) => self.reject(rejection),
            }
        }
    }

    async fn await_turn(&mut self) -> Phase {
        loop {
            let game = Arc::clone(&self.game);
            let command = tokio::select! {
                turn = game.wait_turn(self.seat) => {
                    return match turn {
                        TurnWait::MyTurn => Phase::MyTurn,
                        TurnWait::Over => Phase::Finished,
                    };
                }
                command = self.next_command() => command,
            };
            let Some(command) = command else {
                return self.disconnected();
            };
            if let Some(next) = self.battle_command(command) {
                return next;
            }
        }
    }

    async fn my_turn(&mut self) -> Phase {
        loop {
            let game = Arc::clone(&self.game);
            let command = tokio::select! {
                _ = game.wait_over() => return Phase::Finished,
                command = self.next_command() => command,
            };
            let Some(command) = command else {
                return self.disconnected();
            };
            if let Some(next) = self.battle_command(command) {
                return next;
            }
        }
    }

    /// Handles one command during play. `None` keeps the current phase.
    fn battle_command(&self, command: Result<Command, Rejection>) -> Option<Phase> {
        match command {
            Ok(Command::Fire { row, col }) => match self.game.resolve_attack(self.seat, row, col) {
                Ok(ShotOutcome::Win) => Some(Phase::Finished),
                Ok(_) => Some(Phase::AwaitingTurn),
                Err(rejection) => {
                    self.reject(rejection);
                    None
                }
            },
            Ok(_) => {
                self.reject(Rejection::WrongPhase("game in progress, use FIRE <row> <col>"));
                None
            }
            Err(rejection) => {
                self.reject(rejection);
                None
            }
        }
    }
}
