//! Per-game configuration driving the shared sync engine.
//!
//! Each game is described declaratively (where its catalog lives, how to fetch it,
//! how to normalize it, and where it is stored) so a single orchestrator can run all
//! three.
use crate::model::Game;
use crate::normalization::{normalizer_for, Normalizer};
use crate::util::env::env_opt;

pub const SCRYFALL_BULK_URL: &str = "https://api.scryfall.com/bulk-data";
pub const SCRYFALL_CARD_URL: &str = "https://api.scryfall.com/cards/{id}";
pub const POKEMON_TCG_URL: &str = "https://api.pokemontcg.io/v2/cards";
pub const YGOPRODECK_URL: &str = "https://db.ygoprodeck.com/api/v7/cardinfo.php";
pub const POKEMON_PAGE_SIZE: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Index document lists dumps; follow the one whose `type` matches.
    BulkIndex { index_url: String, entry_type: String },
    /// One request returns the entire catalog, optionally wrapped in an envelope key.
    BulkEndpoint { url: String, envelope: Option<String> },
    /// 1-based `page`/`pageSize` query parameters, records under `envelope`.
    Paginated {
        url: String,
        page_size: usize,
        envelope: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPolicy {
    Anonymous,
    /// Send `header` when any of `env_keys` is set; run anonymously otherwise.
    OptionalApiKey {
        header: &'static str,
        env_keys: &'static [&'static str],
    },
}

/// What happens to the pass when a single record fails to normalize or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, count, keep going.
    #[default]
    Continue,
    /// Stop the pass at the first per-record failure.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleCardEndpoint {
    /// URL with an `{id}` placeholder.
    pub url_template: String,
    pub envelope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GameProfile {
    pub game: Game,
    pub strategy: FetchStrategy,
    pub normalizer: Normalizer,
    pub table: String,
    pub auth: AuthPolicy,
    pub failure_policy: FailurePolicy,
    pub single_card: Option<SingleCardEndpoint>,
}

impl GameProfile {
    /// Built-in profile pointing at the public upstreams.
    pub fn defaults(game: Game) -> Self {
        match game {
            Game::Magic => Self {
                game,
                strategy: FetchStrategy::BulkIndex {
                    index_url: SCRYFALL_BULK_URL.to_string(),
                    entry_type: "default_cards".to_string(),
                },
                normalizer: normalizer_for(game),
                table: "cards".to_string(),
                auth: AuthPolicy::Anonymous,
                failure_policy: FailurePolicy::Continue,
                single_card: Some(SingleCardEndpoint {
                    url_template: SCRYFALL_CARD_URL.to_string(),
                    envelope: None,
                }),
            },
            Game::Pokemon => Self {
                game,
                strategy: FetchStrategy::Paginated {
                    url: POKEMON_TCG_URL.to_string(),
                    page_size: POKEMON_PAGE_SIZE,
                    envelope: "data".to_string(),
                },
                normalizer: normalizer_for(game),
                table: "pokemon_cards".to_string(),
                auth: AuthPolicy::OptionalApiKey {
                    header: "x-api-key",
                    env_keys: &["POKEMON_TCG_API_KEY", "EXPO_PUBLIC_POKEMON_TCG_API_KEY"],
                },
                failure_policy: FailurePolicy::Continue,
                single_card: Some(SingleCardEndpoint {
                    url_template: format!("{POKEMON_TCG_URL}/{{id}}"),
                    envelope: Some("data".to_string()),
                }),
            },
            Game::Yugioh => Self {
                game,
                strategy: FetchStrategy::BulkEndpoint {
                    url: YGOPRODECK_URL.to_string(),
                    envelope: Some("data".to_string()),
                },
                normalizer: normalizer_for(game),
                table: "yugioh_cards".to_string(),
                auth: AuthPolicy::Anonymous,
                failure_policy: FailurePolicy::Continue,
                // YGOPRODeck is only consumed as a full dump.
                single_card: None,
            },
        }
    }

    /// Defaults with endpoint and table overrides from the environment.
    pub fn from_env(game: Game) -> Self {
        let mut profile = Self::defaults(game);
        let table_key = match game {
            Game::Magic => "MTG_TABLE",
            Game::Pokemon => "POKEMON_TABLE",
            Game::Yugioh => "YUGIOH_TABLE",
        };
        if let Some(table) = env_opt(table_key) {
            profile.table = table.trim().to_string();
        }
        match &mut profile.strategy {
            FetchStrategy::BulkIndex { index_url, .. } => {
                if let Some(v) = env_opt("SCRYFALL_BULK_URL") {
                    *index_url = v;
                }
            }
            FetchStrategy::Paginated { url, .. } => {
                if let Some(v) = env_opt("POKEMON_TCG_API_URL") {
                    let base = v.trim_end_matches('/').to_string();
                    if let Some(single) = profile.single_card.as_mut() {
                        single.url_template = format!("{base}/{{id}}");
                    }
                    *url = base;
                }
            }
            FetchStrategy::BulkEndpoint { url, .. } => {
                if let Some(v) = env_opt("YGOPRODECK_API_URL") {
                    *url = v;
                }
            }
        }
        if game == Game::Magic {
            if let (Some(v), Some(single)) = (env_opt("SCRYFALL_CARD_URL"), profile.single_card.as_mut()) {
                single.url_template = v;
            }
        }
        profile
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_profiles_match_upstreams() {
        let mtg = GameProfile::defaults(Game::Magic);
        assert_eq!(mtg.table, "cards");
        assert!(matches!(
            &mtg.strategy,
            FetchStrategy::BulkIndex { entry_type, .. } if entry_type == "default_cards"
        ));

        let pkm = GameProfile::defaults(Game::Pokemon);
        assert_eq!(pkm.table, "pokemon_cards");
        assert!(matches!(
            pkm.strategy,
            FetchStrategy::Paginated { page_size: 250, .. }
        ));
        assert!(matches!(pkm.auth, AuthPolicy::OptionalApiKey { .. }));

        let ygo = GameProfile::defaults(Game::Yugioh);
        assert_eq!(ygo.table, "yugioh_cards");
        assert!(ygo.single_card.is_none());
        assert_eq!(ygo.auth, AuthPolicy::Anonymous);
    }

    #[test]
    fn every_game_continues_past_record_failures_by_default() {
        for game in Game::ALL {
            assert_eq!(GameProfile::defaults(game).failure_policy, FailurePolicy::Continue);
        }
    }

    #[test]
    fn profile_normalizer_matches_game() {
        let ygo = GameProfile::defaults(Game::Yugioh);
        let card = (ygo.normalizer)(&json!({"id": 33396948, "name": "Exodia the Forbidden One"})).unwrap();
        assert_eq!(card.game(), Game::Yugioh);
    }

    #[test]
    fn builder_overrides() {
        let p = GameProfile::defaults(Game::Magic)
            .with_table("mtg_staging")
            .with_failure_policy(FailurePolicy::Abort);
        assert_eq!(p.table, "mtg_staging");
        assert_eq!(p.failure_policy, FailurePolicy::Abort);
    }
}
