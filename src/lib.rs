pub mod board;
pub mod config;
pub mod error;
pub mod game_match;
pub mod protocol;
pub mod server;
pub mod types;
