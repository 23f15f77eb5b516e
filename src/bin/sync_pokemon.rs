//! One-shot pokemon sync; options come from `SYNC_*` env vars (see `SyncArgs::from_env`).
use anyhow::Result;
use cardsync::model::Game;

#[tokio::main]
async fn main() -> Result<()> {
    cardsync::tracing::init_tracing("info,sqlx=warn")?;
    cardsync::util::env::bootstrap_cli("sync_pokemon");
    cardsync::cli::sync_from_env(Game::Pokemon).await
}
