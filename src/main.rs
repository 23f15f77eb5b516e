use anyhow::Result;
use cardsync::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::load();
    cardsync::tracing::init_tracing("info,sqlx=warn")?;
    cardsync::util::env::bootstrap_cli("cardsync");
    cli::run(cli).await
}
