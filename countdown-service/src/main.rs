use clap::Parser;
use countdown_service::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), countdown_service::AppError> {
    run(Cli::parse()).await
}
