//! The sync engine: Source -> Normalizer -> Sink for one game, one pass.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::model::{format_timestamp, Game};
use crate::normalization::describe_raw;
use crate::profile::{FailurePolicy, GameProfile};
use crate::providers::{source_for, CardSource, JsonFetcher};
use crate::storage::CardStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Stop after this many records have been processed.
    pub limit: Option<usize>,
    /// Delete rows not refreshed by this pass (only after a clean, complete pass).
    pub prune_stale: bool,
}

/// Tally for one pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub game: Game,
    pub table: String,
    pub backend: &'static str,
    pub synced: u64,
    pub failed: u64,
    pub normalization_failures: u64,
    pub storage_failures: u64,
    pub batches: u64,
    pub limited: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stale_removed: Option<u64>,
    /// Why the pass stopped early, if it did.
    pub aborted: Option<String>,
}

impl SyncReport {
    fn start(profile: &GameProfile, backend: &'static str) -> Self {
        let now = Utc::now();
        Self {
            game: profile.game,
            table: profile.table.clone(),
            backend,
            synced: 0,
            failed: 0,
            normalization_failures: 0,
            storage_failures: 0,
            batches: 0,
            limited: false,
            started_at: now,
            finished_at: now,
            stale_removed: None,
            aborted: None,
        }
    }

    pub fn processed(&self) -> u64 {
        self.synced + self.failed
    }

    /// Per-record failures do not fail the pass; aborts do.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
    }

    /// Ran to the end of the catalog with every record written.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && !self.limited && self.failed == 0
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "[cardsync] {}: synced={} failed={} (normalization={} storage={}) batches={} table={} backend={} elapsed_ms={}",
            self.game,
            self.synced,
            self.failed,
            self.normalization_failures,
            self.storage_failures,
            self.batches,
            self.table,
            self.backend,
            self.elapsed_ms(),
        );
        if self.limited {
            line.push_str(" limited=true");
        }
        if let Some(n) = self.stale_removed {
            line.push_str(&format!(" stale_removed={n}"));
        }
        if let Some(reason) = &self.aborted {
            line.push_str(&format!(" aborted=\"{reason}\""));
        }
        line
    }
}

/// Drives passes against one store.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn CardStore>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.store
    }

    /// Build the profile's source over `fetcher` and run a pass.
    pub async fn sync_game(
        &self,
        profile: &GameProfile,
        fetcher: Arc<dyn JsonFetcher>,
        options: SyncOptions,
    ) -> SyncReport {
        let mut source = source_for(profile, fetcher);
        self.run(profile, source.as_mut(), options).await
    }

    /// One full pass. Never panics on upstream or storage trouble; the report says what happened.
    #[instrument(skip_all, fields(game = %profile.game, table = %profile.table))]
    pub async fn run(
        &self,
        profile: &GameProfile,
        source: &mut dyn CardSource,
        options: SyncOptions,
    ) -> SyncReport {
        let mut report = SyncReport::start(profile, self.store.backend_name());
        info!(
            source = %source.describe(),
            backend = report.backend,
            policy = ?profile.failure_policy,
            limit = ?options.limit,
            "sync pass starting"
        );

        let limit_reached =
            |report: &SyncReport| options.limit.is_some_and(|limit| report.processed() >= limit as u64);

        'pass: loop {
            let batch = match source.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                // Nothing past the limit would have been written anyway.
                Err(e) if limit_reached(&report) => {
                    warn!(error = %e, "fetch failed after the limit was reached");
                    report.limited = true;
                    break;
                }
                Err(e) => {
                    error!(error = %e, synced = report.synced, "fetch failed; aborting pass");
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            report.batches += 1;
            debug!(batch = report.batches, records = batch.len(), "processing batch");

            for raw in &batch {
                // Only a record left unprocessed counts as a cut.
                if limit_reached(&report) {
                    report.limited = true;
                    break 'pass;
                }
                let failure = match (profile.normalizer)(raw) {
                    Err(e) => {
                        report.normalization_failures += 1;
                        warn!(record = %describe_raw(raw), error = %e, "skipping record that failed normalization");
                        Some(format!("normalization failed for {}: {e}", describe_raw(raw)))
                    }
                    Ok(card) => match self.store.upsert(&profile.table, &card).await {
                        Ok(_) => {
                            report.synced += 1;
                            None
                        }
                        Err(e) => {
                            report.storage_failures += 1;
                            warn!(id = %card.id, error = %e, "upsert failed");
                            Some(format!("upsert of {} failed: {e}", card.id))
                        }
                    },
                };
                if let Some(reason) = failure {
                    report.failed += 1;
                    if profile.failure_policy == FailurePolicy::Abort {
                        error!(%reason, "fail-fast policy; aborting pass");
                        report.aborted = Some(reason);
                        break 'pass;
                    }
                }
            }
        }

        if options.prune_stale {
            self.prune(&mut report).await;
        }

        report.finished_at = Utc::now();
        info!(
            synced = report.synced,
            failed = report.failed,
            batches = report.batches,
            aborted = report.aborted.is_some(),
            "sync pass finished"
        );
        report
    }

    async fn prune(&self, report: &mut SyncReport) {
        if !report.is_clean() {
            warn!(
                failed = report.failed,
                limited = report.limited,
                aborted = report.aborted.is_some(),
                "pass was not clean; skipping stale sweep"
            );
            return;
        }
        match self.store.sweep_stale(&report.table, report.started_at).await {
            Ok(removed) => {
                info!(removed, before = %format_timestamp(report.started_at), "stale rows swept");
                report.stale_removed = Some(removed);
            }
            Err(e) => {
                error!(error = %e, "stale sweep failed");
                report.aborted = Some(format!("stale sweep failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, StorageError};
    use crate::model::{CanonicalCard, CardId};
    use crate::providers::testing::{pokemon_page, ScriptedFetcher};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;

    struct VecSource(VecDeque<Result<Vec<Value>, FetchError>>);

    impl VecSource {
        fn new(batches: Vec<Result<Vec<Value>, FetchError>>) -> Self {
            Self(batches.into())
        }
    }

    #[async_trait]
    impl CardSource for VecSource {
        fn describe(&self) -> String {
            "fixture".into()
        }

        async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
            self.0.pop_front().transpose()
        }
    }

    /// Rejects writes for one id, delegates everything else.
    struct RejectingStore {
        inner: MemoryStore,
        reject: CardId,
    }

    #[async_trait]
    impl CardStore for RejectingStore {
        fn backend_name(&self) -> &'static str {
            "rejecting"
        }

        async fn upsert(&self, table: &str, card: &CanonicalCard) -> Result<DateTime<Utc>, StorageError> {
            if card.id == self.reject {
                return Err(StorageError::Rejected {
                    table: table.into(),
                    status: 409,
                    body: "constraint violation".into(),
                });
            }
            self.inner.upsert(table, card).await
        }

        async fn sweep_stale(&self, table: &str, before: DateTime<Utc>) -> Result<u64, StorageError> {
            self.inner.sweep_stale(table, before).await
        }

        async fn get_by_id(&self, table: &str, id: &CardId) -> Result<Option<Value>, StorageError> {
            self.inner.get_by_id(table, id).await
        }

        async fn search_by_name(&self, table: &str, fragment: &str, limit: usize) -> Result<Vec<Value>, StorageError> {
            self.inner.search_by_name(table, fragment, limit).await
        }

        async fn get_many(&self, table: &str, ids: &[CardId]) -> Result<Vec<Value>, StorageError> {
            self.inner.get_many(table, ids).await
        }
    }

    fn ygo_records(n: i64) -> Vec<Value> {
        (1..=n)
            .map(|i| json!({"id": i, "name": format!("Card {i}"), "type": "Normal Monster", "atk": i * 100}))
            .collect()
    }

    fn ygo_profile() -> GameProfile {
        GameProfile::defaults(Game::Yugioh)
    }

    fn without_timestamp(rows: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
        rows.into_iter()
            .map(|mut r| {
                r.remove("last_updated");
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn second_pass_over_same_data_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let orch = SyncOrchestrator::new(store.clone());
        let profile = ygo_profile();

        let first = orch
            .run(&profile, &mut VecSource::new(vec![Ok(ygo_records(5))]), SyncOptions::default())
            .await;
        let after_first = store.rows("yugioh_cards");
        let second = orch
            .run(&profile, &mut VecSource::new(vec![Ok(ygo_records(5))]), SyncOptions::default())
            .await;
        let after_second = store.rows("yugioh_cards");

        assert_eq!((first.synced, second.synced), (5, 5));
        assert_eq!(after_second.len(), 5);
        assert_eq!(without_timestamp(after_first.clone()), without_timestamp(after_second.clone()));
        for (a, b) in after_first.iter().zip(&after_second) {
            assert!(a["last_updated"].as_str() <= b["last_updated"].as_str());
        }
    }

    #[tokio::test]
    async fn bad_record_is_skipped_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let orch = SyncOrchestrator::new(store.clone());
        let mut records = ygo_records(10);
        records[4] = json!({"id": 5, "type": "Effect Monster"});

        let report = orch
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(records)]), SyncOptions::default())
            .await;

        assert_eq!(report.synced, 9);
        assert_eq!(report.failed, 1);
        assert_eq!(report.normalization_failures, 1);
        assert!(report.is_success());
        assert_eq!(store.len("yugioh_cards"), 9);
    }

    #[tokio::test]
    async fn rejected_write_is_skipped_and_counted() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            reject: CardId::Numeric(5),
        });
        let orch = SyncOrchestrator::new(store.clone());

        let report = orch
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(ygo_records(10))]), SyncOptions::default())
            .await;

        assert_eq!((report.synced, report.failed, report.storage_failures), (9, 1, 1));
        assert!(report.aborted.is_none());
        assert_eq!(store.inner.len("yugioh_cards"), 9);
    }

    #[tokio::test]
    async fn abort_policy_stops_at_first_failure() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            reject: CardId::Numeric(5),
        });
        let orch = SyncOrchestrator::new(store.clone());
        let profile = ygo_profile().with_failure_policy(FailurePolicy::Abort);

        let report = orch
            .run(&profile, &mut VecSource::new(vec![Ok(ygo_records(10))]), SyncOptions::default())
            .await;

        assert_eq!((report.synced, report.failed), (4, 1));
        assert!(!report.is_success());
        assert!(report.aborted.as_deref().unwrap_or_default().contains("409"));
        assert_eq!(store.inner.len("yugioh_cards"), 4);
    }

    #[tokio::test]
    async fn fetch_error_mid_pagination_keeps_earlier_pages() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(pokemon_page(0, 250)),
            Err(FetchError::Status {
                url: "https://api.pokemontcg.io/v2/cards".into(),
                status: 500,
                retry_after_secs: None,
            }),
        ]));
        let store = Arc::new(MemoryStore::new());
        let orch = SyncOrchestrator::new(store.clone());

        let report = orch
            .sync_game(&GameProfile::defaults(Game::Pokemon), fetcher, SyncOptions::default())
            .await;

        assert_eq!(report.synced, 250);
        assert_eq!(report.batches, 1);
        assert!(report.aborted.as_deref().unwrap_or_default().contains("500"));
        assert_eq!(store.len("pokemon_cards"), 250);
    }

    #[tokio::test]
    async fn paginated_pass_writes_every_page() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(pokemon_page(0, 250)),
            Ok(pokemon_page(250, 250)),
            Ok(pokemon_page(500, 137)),
        ]));
        let store = Arc::new(MemoryStore::new());
        let report = SyncOrchestrator::new(store.clone())
            .sync_game(&GameProfile::defaults(Game::Pokemon), fetcher, SyncOptions::default())
            .await;

        assert_eq!((report.synced, report.batches), (637, 3));
        assert!(report.is_clean());
        assert_eq!(store.len("pokemon_cards"), 637);
    }

    #[tokio::test]
    async fn limit_caps_processed_records() {
        let store = Arc::new(MemoryStore::new());
        let orch = SyncOrchestrator::new(store.clone());
        let options = SyncOptions {
            limit: Some(3),
            prune_stale: true,
        };

        let report = orch
            .run(
                &ygo_profile(),
                &mut VecSource::new(vec![Ok(ygo_records(2)), Ok(ygo_records(10))]),
                options,
            )
            .await;

        assert_eq!(report.processed(), 3);
        assert!(report.limited);
        assert_eq!(report.stale_removed, None);
    }

    #[tokio::test]
    async fn limit_equal_to_catalog_size_is_not_a_cut() {
        let store = Arc::new(MemoryStore::new());
        let mut row = Map::new();
        row.insert("id".into(), json!(999));
        row.insert("name".into(), json!("Delisted"));
        store.insert_raw("yugioh_cards", CardId::Numeric(999), row, Utc::now() - Duration::days(1));
        let options = SyncOptions {
            limit: Some(3),
            prune_stale: true,
        };

        let report = SyncOrchestrator::new(store.clone())
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(ygo_records(3))]), options)
            .await;

        assert_eq!(report.synced, 3);
        assert!(!report.limited);
        assert_eq!(report.stale_removed, Some(1));
        assert!(!report.summary_line().contains("limited=true"));
    }

    #[tokio::test]
    async fn fetch_error_after_the_limit_does_not_abort() {
        let store = Arc::new(MemoryStore::new());
        let options = SyncOptions {
            limit: Some(2),
            prune_stale: false,
        };
        let failure = FetchError::Timeout {
            url: "https://db.ygoprodeck.com/api/v7/cardinfo.php".into(),
        };

        let report = SyncOrchestrator::new(store)
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(ygo_records(2)), Err(failure)]), options)
            .await;

        assert_eq!(report.synced, 2);
        assert!(report.limited);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn prune_sweeps_rows_missing_from_a_clean_pass() {
        let store = Arc::new(MemoryStore::new());
        let mut row = Map::new();
        row.insert("id".into(), json!(999));
        row.insert("name".into(), json!("Delisted"));
        store.insert_raw("yugioh_cards", CardId::Numeric(999), row, Utc::now() - Duration::days(1));
        let orch = SyncOrchestrator::new(store.clone());
        let options = SyncOptions {
            limit: None,
            prune_stale: true,
        };

        let report = orch
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(ygo_records(3))]), options)
            .await;

        assert_eq!(report.stale_removed, Some(1));
        assert_eq!(store.len("yugioh_cards"), 3);
        assert!(report.summary_line().contains("stale_removed=1"));
    }

    #[tokio::test]
    async fn prune_is_skipped_after_failures() {
        let store = Arc::new(MemoryStore::new());
        let mut row = Map::new();
        row.insert("id".into(), json!(999));
        row.insert("name".into(), json!("Delisted"));
        store.insert_raw("yugioh_cards", CardId::Numeric(999), row, Utc::now() - Duration::days(1));
        let mut records = ygo_records(3);
        records[1] = json!("not a card");
        let options = SyncOptions {
            limit: None,
            prune_stale: true,
        };

        let report = SyncOrchestrator::new(store.clone())
            .run(&ygo_profile(), &mut VecSource::new(vec![Ok(records)]), options)
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.stale_removed, None);
        assert_eq!(store.len("yugioh_cards"), 3);
    }

    #[test]
    fn summary_line_reports_counts_and_abort() {
        let mut report = SyncReport::start(&ygo_profile(), "memory");
        report.synced = 12;
        report.failed = 2;
        report.storage_failures = 2;
        report.aborted = Some("boom".into());
        let line = report.summary_line();
        assert!(line.starts_with("[cardsync] yugioh: synced=12 failed=2"));
        assert!(line.contains("storage=2"));
        assert!(line.contains("aborted=\"boom\""));
    }
}
