//! One-shot yugioh sync; options come from `SYNC_*` env vars (see `SyncArgs::from_env`).
use anyhow::Result;
use cardsync::model::Game;

#[tokio::main]
async fn main() -> Result<()> {
    cardsync::tracing::init_tracing("info,sqlx=warn")?;
    cardsync::util::env::bootstrap_cli("sync_yugioh");
    cardsync::cli::sync_from_env(Game::Yugioh).await
}
