//! Source adapters: retrieve raw card records from the upstream catalogs.
//!
//! Every adapter yields batches of raw JSON records. Bulk adapters yield the whole
//! catalog as a single batch, the paginated adapter yields one batch per page.
pub mod bulk;
pub mod http;
pub mod paged;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FetchError, SyncError};
use crate::model::CardId;
use crate::profile::{FetchStrategy, GameProfile};

pub use bulk::{BulkEndpointSource, BulkIndexSource};
pub use http::{HttpFetcher, HttpSettings};
pub use paged::PagedSource;

/// Minimal HTTP surface the adapters need; lets tests script responses.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError>;
}

/// A finite, pull-based sequence of raw record batches.
#[async_trait]
pub trait CardSource: Send {
    /// Human-readable label identifying this source in logs.
    fn describe(&self) -> String;

    /// Next batch of raw records, `None` once the catalog is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, FetchError>;
}

/// Build the adapter the profile's strategy asks for.
pub fn source_for(profile: &GameProfile, fetcher: Arc<dyn JsonFetcher>) -> Box<dyn CardSource> {
    match &profile.strategy {
        FetchStrategy::BulkIndex {
            index_url,
            entry_type,
        } => Box::new(BulkIndexSource::new(fetcher, index_url, entry_type)),
        FetchStrategy::BulkEndpoint { url, envelope } => {
            Box::new(BulkEndpointSource::new(fetcher, url, envelope.as_deref()))
        }
        FetchStrategy::Paginated {
            url,
            page_size,
            envelope,
        } => Box::new(PagedSource::new(fetcher, url, *page_size, envelope)),
    }
}

/// Fetch one raw card straight from upstream, for single-card refreshes.
pub async fn fetch_single(
    profile: &GameProfile,
    fetcher: &dyn JsonFetcher,
    id: &CardId,
) -> Result<Value, SyncError> {
    let endpoint = profile.single_card.as_ref().ok_or_else(|| {
        SyncError::Unsupported(format!(
            "{} has no single-card endpoint; run a full sync instead",
            profile.game.label()
        ))
    })?;
    let encoded = url::form_urlencoded::byte_serialize(id.to_string().as_bytes()).collect::<String>();
    let url = endpoint.url_template.replace("{id}", &encoded);
    let body = fetcher.get_json(&url, &[]).await?;
    match &endpoint.envelope {
        Some(key) => body.get(key.as_str()).cloned().ok_or_else(|| {
            FetchError::UnexpectedShape {
                url,
                detail: format!("missing `{key}` envelope"),
            }
            .into()
        }),
        None => Ok(body),
    }
}

/// Pull the record array out of a response body, optionally under an envelope key.
pub(crate) fn take_records(
    body: Value,
    envelope: Option<&str>,
    url: &str,
) -> Result<Vec<Value>, FetchError> {
    let inner = match envelope {
        Some(key) => match body {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        },
        None => Some(body),
    };
    match inner {
        Some(Value::Array(records)) => Ok(records),
        Some(_) | None => Err(FetchError::UnexpectedShape {
            url: url.to_string(),
            detail: match envelope {
                Some(key) => format!("expected an array under `{key}`"),
                None => "expected a top-level array".to_string(),
            },
        }),
    }
}
