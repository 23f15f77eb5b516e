use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{validate_table, CardStore};
use crate::error::StorageError;
use crate::model::{format_timestamp, CanonicalCard, CardId};
use crate::util::env::{env_parse, env_req};
use crate::util::retry::RetryPolicy;

const MAX_ERROR_BODY: usize = 512;

/// Supabase PostgREST sink authenticated with the service-role key.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        service_key: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let mut headers = HeaderMap::new();
        let key = service_key.trim();
        let mut apikey = HeaderValue::from_str(key)
            .map_err(|_| StorageError::Transport("service key is not a valid header value".into()))?;
        apikey.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| StorageError::Transport("service key is not a valid header value".into()))?;
        bearer.set_sensitive(true);
        headers.insert("apikey", apikey);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StorageError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// `SUPABASE_URL` + `SUPABASE_SERVICE_ROLE_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let url = env_req("SUPABASE_URL")?;
        let key = env_req("SUPABASE_SERVICE_ROLE_KEY")?;
        let timeout = Duration::from_secs(env_parse("SUPABASE_TIMEOUT_SECS", 60u64));
        Ok(Self::new(&url, &key, timeout, RetryPolicy::from_env())?)
    }

    fn endpoint(&self, table: &str) -> Result<String, StorageError> {
        Ok(format!("{}/rest/v1/{}", self.base_url, validate_table(table)?))
    }

    async fn check(table: &str, resp: Response) -> Result<Response, StorageError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
        }
        Err(StorageError::Rejected {
            table: table.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>, StorageError> {
        let url = self.endpoint(table)?;
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        let rows = Self::check(table, resp)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(transport)?;
        Ok(rows)
    }
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Transport(e.to_string())
}

/// PostgREST `ilike` filter with `*` wildcards; literal `*` in input is dropped.
pub(crate) fn ilike_filter(fragment: &str) -> String {
    format!("ilike.*{}*", fragment.replace('*', ""))
}

/// PostgREST `in` filter; text ids are double-quoted so commas and dots survive.
pub(crate) fn in_filter(ids: &[CardId]) -> String {
    let items: Vec<String> = ids
        .iter()
        .map(|id| match id {
            CardId::Numeric(n) => n.to_string(),
            CardId::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        })
        .collect();
    format!("in.({})", items.join(","))
}

/// Row count from a `Content-Range: 0-9/10` or `*/10` header.
pub(crate) fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl CardStore for RestStore {
    fn backend_name(&self) -> &'static str {
        "rest"
    }

    #[instrument(skip(self, card), fields(id = %card.id))]
    async fn upsert(&self, table: &str, card: &CanonicalCard) -> Result<DateTime<Utc>, StorageError> {
        let url = self.endpoint(table)?;
        let now = Utc::now();
        let row = Value::Object(card.to_row(now)?);
        let (url, row, http) = (&url, &row, &self.http);
        self.retry
            .run(table, move || async move {
                let resp = http
                    .post(url)
                    .query(&[("on_conflict", "id")])
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(row)
                    .send()
                    .await
                    .map_err(transport)?;
                Self::check(table, resp).await.map(|_| ())
            })
            .await?;
        Ok(now)
    }

    async fn sweep_stale(&self, table: &str, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let url = self.endpoint(table)?;
        let resp = self
            .http
            .delete(&url)
            .query(&[("last_updated", format!("lt.{}", format_timestamp(before)))])
            .header("Prefer", "return=minimal,count=exact")
            .send()
            .await
            .map_err(transport)?;
        let resp = Self::check(table, resp).await?;
        let removed = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0);
        debug!(table, removed, "swept stale rows");
        Ok(removed)
    }

    async fn get_by_id(&self, table: &str, id: &CardId) -> Result<Option<Value>, StorageError> {
        let rows = self
            .select(
                table,
                &[("select", "*".into()), ("id", format!("eq.{id}")), ("limit", "1".into())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn search_by_name(
        &self,
        table: &str,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        self.select(
            table,
            &[
                ("select", "*".into()),
                ("name", ilike_filter(fragment)),
                ("order", "name.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn get_many(&self, table: &str, ids: &[CardId]) -> Result<Vec<Value>, StorageError> {
        if ids.is_empty() {
            validate_table(table)?;
            return Ok(Vec::new());
        }
        self.select(table, &[("select", "*".into()), ("id", in_filter(ids))])
            .await
    }
}
