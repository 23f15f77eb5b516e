use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{take_records, CardSource, JsonFetcher};
use crate::error::FetchError;

/// Page-numbered catalog (Pokémon TCG): `?page=N&pageSize=S`, 1-based.
///
/// Keeps requesting while the previous page came back exactly full and stops at
/// the first short page. A failed page ends the sequence.
pub struct PagedSource {
    fetcher: Arc<dyn JsonFetcher>,
    url: String,
    page_size: usize,
    envelope: String,
    next_page: u32,
    exhausted: bool,
}

impl PagedSource {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, url: &str, page_size: usize, envelope: &str) -> Self {
        Self {
            fetcher,
            url: url.to_string(),
            page_size: page_size.max(1),
            envelope: envelope.to_string(),
            next_page: 1,
            exhausted: false,
        }
    }

    pub fn pages_requested(&self) -> u32 {
        self.next_page - 1
    }
}

#[async_trait]
impl CardSource for PagedSource {
    fn describe(&self) -> String {
        format!("paginated {} (pageSize={})", self.url, self.page_size)
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.next_page;
        self.next_page += 1;
        let query = [("page", page.to_string()), ("pageSize", self.page_size.to_string())];
        let body = match self.fetcher.get_json(&self.url, &query).await {
            Ok(body) => body,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };
        let records = match take_records(body, Some(&self.envelope), &self.url) {
            Ok(records) => records,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };
        debug!(page, count = records.len(), "page fetched");
        if records.len() < self.page_size {
            self.exhausted = true;
        }
        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(records))
    }
}
