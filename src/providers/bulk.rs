//! Bulk strategies: the whole catalog arrives in one response.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{take_records, CardSource, JsonFetcher};
use crate::error::FetchError;

/// Discover the dump location from a bulk-data index, then download it (Scryfall).
pub struct BulkIndexSource {
    fetcher: Arc<dyn JsonFetcher>,
    index_url: String,
    entry_type: String,
    done: bool,
}

impl BulkIndexSource {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, index_url: &str, entry_type: &str) -> Self {
        Self {
            fetcher,
            index_url: index_url.to_string(),
            entry_type: entry_type.to_string(),
            done: false,
        }
    }

    async fn resolve_download_uri(&self) -> Result<String, FetchError> {
        let index = self.fetcher.get_json(&self.index_url, &[]).await?;
        let entries = take_records(index, Some("data"), &self.index_url)?;
        entries
            .iter()
            .find(|e| e.get("type").and_then(Value::as_str) == Some(self.entry_type.as_str()))
            .and_then(|e| e.get("download_uri"))
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FetchError::BulkEntryMissing {
                entry_type: self.entry_type.clone(),
            })
    }
}

#[async_trait]
impl CardSource for BulkIndexSource {
    fn describe(&self) -> String {
        format!("bulk index {} ({})", self.index_url, self.entry_type)
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
        if self.done {
            return Ok(None);
        }
        // One shot: a failed discovery or download must not be retried by the caller's loop.
        self.done = true;
        let download_uri = self.resolve_download_uri().await?;
        info!(entry_type = %self.entry_type, %download_uri, "downloading bulk dump");
        let dump = self.fetcher.get_json(&download_uri, &[]).await?;
        let records = take_records(dump, None, &download_uri)?;
        info!(records = records.len(), "bulk dump decoded");
        Ok(Some(records))
    }
}

/// A single endpoint that returns the full catalog (YGOPRODeck).
pub struct BulkEndpointSource {
    fetcher: Arc<dyn JsonFetcher>,
    url: String,
    envelope: Option<String>,
    done: bool,
}

impl BulkEndpointSource {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, url: &str, envelope: Option<&str>) -> Self {
        Self {
            fetcher,
            url: url.to_string(),
            envelope: envelope.map(str::to_string),
            done: false,
        }
    }
}

#[async_trait]
impl CardSource for BulkEndpointSource {
    fn describe(&self) -> String {
        format!("bulk endpoint {}", self.url)
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let body = self.fetcher.get_json(&self.url, &[]).await?;
        let records = take_records(body, self.envelope.as_deref(), &self.url)?;
        info!(url = %self.url, records = records.len(), "catalog downloaded");
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedFetcher;
    use serde_json::json;

    fn index() -> Value {
        json!({
            "object": "list",
            "data": [
                {"type": "oracle_cards", "download_uri": "https://data.scryfall.io/oracle.json"},
                {"type": "default_cards", "download_uri": "https://data.scryfall.io/default.json"},
                {"type": "all_cards", "download_uri": "https://data.scryfall.io/all.json"}
            ]
        })
    }

    #[tokio::test]
    async fn follows_the_default_cards_entry() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(index()),
            Ok(json!([{"id": "a", "name": "Opt"}, {"id": "b", "name": "Shock"}])),
        ]));
        let mut src = BulkIndexSource::new(fetcher.clone(), "https://api.scryfall.com/bulk-data", "default_cards");

        let batch = src.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(src.next_batch().await.unwrap().is_none());

        let urls: Vec<String> = fetcher.requests().into_iter().map(|(u, _)| u).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.scryfall.com/bulk-data".to_string(),
                "https://data.scryfall.io/default.json".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn missing_entry_aborts_without_download() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(json!({"data": [
            {"type": "rulings", "download_uri": "https://data.scryfall.io/rulings.json"}
        ]}))]));
        let mut src = BulkIndexSource::new(fetcher.clone(), "https://api.scryfall.com/bulk-data", "default_cards");
        let err = src.next_batch().await.unwrap_err();
        assert!(matches!(err, FetchError::BulkEntryMissing { .. }));
        assert_eq!(fetcher.requests().len(), 1);
        assert!(src.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_failure_is_fatal() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(index()),
            Err(FetchError::Status {
                url: "https://data.scryfall.io/default.json".into(),
                status: 503,
                retry_after_secs: None,
            }),
        ]));
        let mut src = BulkIndexSource::new(fetcher, "https://api.scryfall.com/bulk-data", "default_cards");
        assert!(matches!(
            src.next_batch().await,
            Err(FetchError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn endpoint_unwraps_data_envelope() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(json!({
            "data": [{"id": 1, "name": "Kuriboh"}, {"id": 2, "name": "Sangan"}, {"id": 3, "name": "Jinzo"}]
        }))]));
        let mut src = BulkEndpointSource::new(fetcher, "https://db.ygoprodeck.com/api/v7/cardinfo.php", Some("data"));
        assert_eq!(src.next_batch().await.unwrap().unwrap().len(), 3);
        assert!(src.next_batch().await.unwrap().is_none());
    }
}
