//! `cardsync` command surface shared by the main binary and the per-game sync bins.
use std::ffi::OsString;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{info, warn};

use crate::model::{CardId, Game};
use crate::orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
use crate::profile::{FailurePolicy, GameProfile};
use crate::providers::{fetch_single, HttpFetcher, HttpSettings};
use crate::storage::{open_store, validate_table, Backend, CardStore, MemoryStore, DEFAULT_SEARCH_LIMIT};
use crate::util::env::{env_flag, env_opt, init_env};

#[derive(Parser, Debug)]
#[command(name = "cardsync", version, about = "Mirror MTG, Pokémon and Yu-Gi-Oh! catalogs into Supabase")]
pub struct Cli {
    /// Storage backend for writes and lookups
    #[arg(long, global = true, value_enum, env = "CARDSYNC_BACKEND", default_value_t = Backend::Rest)]
    pub backend: Backend,
    /// Override the game's table (not allowed with `sync all`)
    #[arg(long, global = true)]
    pub table: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse the process arguments once `.env` is loaded, so `CARDSYNC_BACKEND`
    /// set there still feeds `--backend`.
    pub fn load() -> Self {
        Self::load_from(init_env, std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    pub fn load_from<I, T>(load_env: impl FnOnce(), args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        load_env();
        Self::try_parse_from(args)
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Commands {
    /// Run a full sync pass for one game or all three
    Sync {
        #[arg(value_enum)]
        target: SyncTarget,
        #[command(flatten)]
        args: SyncArgs,
    },
    /// Refresh a single card from upstream and upsert it
    FetchCard {
        #[arg(value_enum)]
        game: Game,
        id: String,
        /// Normalize and print without writing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print one stored card as JSON
    Get {
        #[arg(value_enum)]
        game: Game,
        id: String,
    },
    /// Case-insensitive name search over stored cards
    Search {
        #[arg(value_enum)]
        game: Game,
        name: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Load several stored cards at once (binder preload)
    Preload {
        #[arg(value_enum)]
        game: Game,
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncTarget {
    #[value(alias = "mtg")]
    Magic,
    Pokemon,
    #[value(alias = "ygo")]
    Yugioh,
    All,
}

impl SyncTarget {
    pub fn games(self) -> Vec<Game> {
        match self {
            SyncTarget::Magic => vec![Game::Magic],
            SyncTarget::Pokemon => vec![Game::Pokemon],
            SyncTarget::Yugioh => vec![Game::Yugioh],
            SyncTarget::All => Game::ALL.to_vec(),
        }
    }
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncArgs {
    /// Stop after processing this many records
    #[arg(long)]
    pub limit: Option<usize>,
    /// Fetch and normalize, but write to an in-memory store
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Abort the pass at the first record that fails
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,
    /// After a clean pass, delete rows that were not refreshed
    #[arg(long, default_value_t = false)]
    pub prune_stale: bool,
}

impl SyncArgs {
    /// Options for the one-shot bins: `SYNC_LIMIT`, `SYNC_DRY_RUN`, `SYNC_FAIL_FAST`, `SYNC_PRUNE_STALE`.
    pub fn from_env() -> Self {
        Self {
            limit: env_opt("SYNC_LIMIT").and_then(|v| v.trim().parse().ok()),
            dry_run: env_flag("SYNC_DRY_RUN", false),
            fail_fast: env_flag("SYNC_FAIL_FAST", false),
            prune_stale: env_flag("SYNC_PRUNE_STALE", false),
        }
    }

    fn options(&self) -> SyncOptions {
        SyncOptions {
            limit: self.limit,
            prune_stale: self.prune_stale && !self.dry_run,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let table = cli.table.as_deref();
    match cli.command {
        Commands::Sync { target, args } => {
            if target == SyncTarget::All && table.is_some() {
                bail!("--table names a single table; pick one game instead of `all`");
            }
            let reports = run_sync(&target.games(), &args, cli.backend, table).await?;
            finish(&reports)
        }
        Commands::FetchCard { game, id, dry_run } => fetch_card(game, &id, dry_run, cli.backend, table).await,
        Commands::Get { game, id } => {
            let profile = profile_for(game, table)?;
            let id = parse_id(game, &id)?;
            let store = open_store(cli.backend).await?;
            match store.get_by_id(&profile.table, &id).await? {
                Some(row) => print_json(&row),
                None => bail!("{} card {id} not found in {}", game.label(), profile.table),
            }
        }
        Commands::Search { game, name, limit } => {
            let profile = profile_for(game, table)?;
            let store = open_store(cli.backend).await?;
            let rows = store.search_by_name(&profile.table, &name, limit).await?;
            info!(game = %game, query = %name, hits = rows.len(), "search finished");
            print_json(&Value::Array(rows))
        }
        Commands::Preload { game, ids } => {
            let profile = profile_for(game, table)?;
            let ids = ids.iter().map(|raw| parse_id(game, raw)).collect::<Result<Vec<CardId>>>()?;
            let store = open_store(cli.backend).await?;
            let rows = store.get_many(&profile.table, &ids).await?;
            if rows.len() < ids.len() {
                warn!(requested = ids.len(), found = rows.len(), "some cards are not stored yet");
            }
            print_json(&Value::Array(rows))
        }
    }
}

/// Entry point for the `sync_<game>` binaries.
pub async fn sync_from_env(game: Game) -> Result<()> {
    let backend = match env_opt("CARDSYNC_BACKEND") {
        Some(raw) => Backend::from_str(raw.trim(), true).map_err(|e| anyhow!("CARDSYNC_BACKEND: {e}"))?,
        None => Backend::default(),
    };
    let reports = run_sync(&[game], &SyncArgs::from_env(), backend, None).await?;
    finish(&reports)
}

/// Run one pass per game in order; a failed pass does not stop the next game.
pub async fn run_sync(
    games: &[Game],
    args: &SyncArgs,
    backend: Backend,
    table: Option<&str>,
) -> Result<Vec<SyncReport>> {
    let profiles = games
        .iter()
        .map(|&game| {
            let profile = profile_for(game, table)?;
            Ok(if args.fail_fast {
                profile.with_failure_policy(FailurePolicy::Abort)
            } else {
                profile
            })
        })
        .collect::<Result<Vec<GameProfile>>>()?;

    let store: Arc<dyn CardStore> = if args.dry_run {
        info!("dry run: writes go to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        open_store(backend).await?
    };
    let orchestrator = SyncOrchestrator::new(store);
    let settings = HttpSettings::from_env();

    let mut reports = Vec::with_capacity(profiles.len());
    for profile in &profiles {
        let fetcher = HttpFetcher::for_profile(profile, settings)
            .with_context(|| format!("building HTTP client for {}", profile.game))?;
        let report = orchestrator
            .sync_game(profile, Arc::new(fetcher), args.options())
            .await;
        println!("{}", report.summary_line());
        reports.push(report);
    }
    Ok(reports)
}

fn finish(reports: &[SyncReport]) -> Result<()> {
    let aborted: Vec<String> = reports
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.game.to_string())
        .collect();
    if aborted.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("sync aborted for: {}", aborted.join(", ")))
    }
}

async fn fetch_card(game: Game, raw_id: &str, dry_run: bool, backend: Backend, table: Option<&str>) -> Result<()> {
    let profile = profile_for(game, table)?;
    let id = parse_id(game, raw_id)?;
    let fetcher = HttpFetcher::for_profile(&profile, HttpSettings::from_env())?;
    let raw = fetch_single(&profile, &fetcher, &id).await?;
    let card = (profile.normalizer)(&raw)
        .with_context(|| format!("normalizing {} card {id}", game.label()))?;

    let store: Arc<dyn CardStore> = if dry_run {
        Arc::new(MemoryStore::new())
    } else {
        open_store(backend).await?
    };
    let stamped = store.upsert(&profile.table, &card).await?;
    info!(game = %game, id = %card.id, table = %profile.table, backend = store.backend_name(), "card refreshed");
    print_json(&Value::Object(card.to_row(stamped)?))
}

fn profile_for(game: Game, table: Option<&str>) -> Result<GameProfile> {
    let profile = GameProfile::from_env(game);
    let profile = match table {
        Some(t) => profile.with_table(t),
        None => profile,
    };
    validate_table(&profile.table)?;
    Ok(profile)
}

fn parse_id(game: Game, raw: &str) -> Result<CardId> {
    game.parse_id(raw).map_err(|e| anyhow!(e))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
