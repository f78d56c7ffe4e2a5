use anyhow::Result;
use battleserver::{config::Config, server::run_server};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    run_server(&config).await
}
