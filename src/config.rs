use clap::{Parser, ValueEnum};

/// Who fires first once both fleets are ready.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FirstTurn {
    /// The player holding the first seat.
    #[default]
    FirstSeat,
    /// A coin flip per match.
    Random,
}

/// Two-player naval combat server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,
    /// First-turn policy for every match
    #[arg(long, value_enum, default_value_t = FirstTurn::FirstSeat)]
    pub first_turn: FirstTurn,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
