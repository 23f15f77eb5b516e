//! Upsert sinks and the read path used by lookups.
pub mod memory;
pub mod postgres;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{CanonicalCard, CardId};
use crate::util::env::{db_url, env_parse, preflight_check};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Per-game card tables keyed by the upstream card id.
///
/// `upsert` replaces the whole row and stamps `last_updated` with the write time.
/// Each call is its own atomic unit; nothing spans multiple records.
#[async_trait]
pub trait CardStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Insert or fully replace the row for `card.id`; returns the stamped `last_updated`.
    async fn upsert(&self, table: &str, card: &CanonicalCard) -> Result<DateTime<Utc>, StorageError>;

    /// Delete rows whose `last_updated` is older than `before`; returns how many went.
    async fn sweep_stale(&self, table: &str, before: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn get_by_id(&self, table: &str, id: &CardId) -> Result<Option<Value>, StorageError>;

    /// Case-insensitive substring match on `name`, ordered by name.
    async fn search_by_name(
        &self,
        table: &str,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError>;

    /// Rows for the given ids (binder preload); unknown ids are skipped.
    async fn get_many(&self, table: &str, ids: &[CardId]) -> Result<Vec<Value>, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Supabase PostgREST with the service-role key.
    #[default]
    Rest,
    /// Direct Postgres connection string.
    #[value(alias = "pg")]
    Postgres,
}

/// Validate credentials for `backend` and open it. Missing credentials are fatal.
pub async fn open_store(backend: Backend) -> anyhow::Result<Arc<dyn CardStore>> {
    match backend {
        Backend::Rest => {
            preflight_check(
                "cardsync rest",
                &["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"],
                &["SYNC_MAX_RETRIES", "SYNC_BACKOFF_MS"],
            )?;
            Ok(Arc::new(RestStore::from_env()?))
        }
        Backend::Postgres => {
            preflight_check(
                "cardsync postgres",
                &[],
                &["SUPABASE_DB_URL", "DATABASE_URL", "DB_URL", "DB_MAX_CONNECTIONS"],
            )?;
            let url = db_url()?;
            let max_connections = env_parse("DB_MAX_CONNECTIONS", 2u32);
            let store = PgStore::connect(&url, max_connections).await?;
            store.db().ping().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Table names end up in SQL and URLs, so only plain identifiers are accepted.
pub fn validate_table(table: &str) -> Result<&str, StorageError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && table.len() <= 63;
    if valid {
        Ok(table)
    } else {
        Err(StorageError::InvalidTable(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers_only() {
        for ok in ["cards", "pokemon_cards", "_staging2"] {
            assert!(validate_table(ok).is_ok(), "{ok}");
        }
        for bad in ["", "2cards", "cards; drop table x", "public.cards", "cards\""] {
            assert!(validate_table(bad).is_err(), "{bad}");
        }
    }
}
