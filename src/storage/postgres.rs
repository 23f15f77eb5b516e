use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{validate_table, CardStore};
use crate::error::StorageError;
use crate::model::{CanonicalCard, CardId};
use crate::util::db::Db;
use crate::util::retry::RetryPolicy;

/// Direct Postgres sink (Supabase database URL) over the shared sqlx pool.
///
/// Rows are bound as one jsonb document and expanded with `jsonb_populate_record`,
/// so the table's own column types drive the casts.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
    retry: RetryPolicy,
}

impl PgStore {
    pub fn new(db: Db, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = Db::connect(database_url, max_connections).await?;
        Ok(Self::new(db, RetryPolicy::from_env()))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let table = quote_ident(table);
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let updates: Vec<String> = cols
        .iter()
        .filter(|c| c.as_str() != "\"id\"")
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) \
         ON CONFLICT (\"id\") DO UPDATE SET {updates}",
        cols = cols.join(", "),
        updates = updates.join(", "),
    )
}

/// `id` keys grouped by kind, so each group binds with the column's own type.
#[derive(Debug, PartialEq)]
pub(crate) enum IdKeys {
    Numeric(Vec<i64>),
    Text(Vec<String>),
}

pub(crate) fn id_keys(ids: &[CardId]) -> Vec<IdKeys> {
    let mut numeric = Vec::new();
    let mut text = Vec::new();
    for id in ids {
        match id {
            CardId::Numeric(n) => numeric.push(*n),
            CardId::Text(s) => text.push(s.clone()),
        }
    }
    let mut keys = Vec::with_capacity(2);
    if !numeric.is_empty() {
        keys.push(IdKeys::Numeric(numeric));
    }
    if !text.is_empty() {
        keys.push(IdKeys::Text(text));
    }
    keys
}

/// Compares the bare key column; no cast, so the primary-key index stays usable.
pub(crate) fn select_by_id_sql(table: &str, many: bool) -> String {
    let predicate = if many { "= ANY($1)" } else { "= $1" };
    format!("SELECT to_jsonb(t) FROM {} t WHERE t.\"id\" {predicate}", quote_ident(table))
}

/// `%` and `_` in user input are literal.
pub(crate) fn ilike_pattern(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len() + 2);
    out.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[async_trait]
impl CardStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, card), fields(id = %card.id))]
    async fn upsert(&self, table: &str, card: &CanonicalCard) -> Result<DateTime<Utc>, StorageError> {
        let table = validate_table(table)?;
        let now = Utc::now();
        let row = Value::Object(card.to_row(now)?);
        let sql = upsert_sql(table, card.columns());
        let (sql, row, pool) = (&sql, &row, &self.db.pool);
        self.retry
            .run(table, move || async move {
                sqlx::query(sql)
                    .bind(row)
                    .persistent(false)
                    .execute(pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        Ok(now)
    }

    async fn sweep_stale(&self, table: &str, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let table = validate_table(table)?;
        let sql = format!("DELETE FROM {} WHERE \"last_updated\" < $1", quote_ident(table));
        let res = sqlx::query(&sql)
            .bind(before)
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        debug!(table, removed = res.rows_affected(), "swept stale rows");
        Ok(res.rows_affected())
    }

    async fn get_by_id(&self, table: &str, id: &CardId) -> Result<Option<Value>, StorageError> {
        let sql = select_by_id_sql(validate_table(table)?, false);
        let query = sqlx::query_scalar::<sqlx::Postgres, Value>(&sql);
        let query = match id {
            CardId::Numeric(n) => query.bind(*n),
            CardId::Text(s) => query.bind(s.as_str()),
        };
        let row = query.persistent(false).fetch_optional(&self.db.pool).await?;
        Ok(row)
    }

    async fn search_by_name(
        &self,
        table: &str,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let table = validate_table(table)?;
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.\"name\" ILIKE $1 ESCAPE '\\' ORDER BY t.\"name\" LIMIT $2",
            quote_ident(table)
        );
        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(ilike_pattern(fragment))
            .bind(limit as i64)
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    async fn get_many(&self, table: &str, ids: &[CardId]) -> Result<Vec<Value>, StorageError> {
        let table = validate_table(table)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = select_by_id_sql(table, true);
        let mut rows = Vec::with_capacity(ids.len());
        for keys in id_keys(ids) {
            let query = sqlx::query_scalar::<sqlx::Postgres, Value>(&sql);
            let query = match keys {
                IdKeys::Numeric(n) => query.bind(n),
                IdKeys::Text(s) => query.bind(s),
            };
            rows.extend(query.persistent(false).fetch_all(&self.db.pool).await?);
        }
        Ok(rows)
    }
}
