use clap::Parser;
use cintessa::cli::{self, Cli};
use cintessa::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    cli::run(Cli::parse()).await
}
