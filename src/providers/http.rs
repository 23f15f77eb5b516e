use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::JsonFetcher;
use crate::error::FetchError;
use crate::profile::{AuthPolicy, GameProfile};
use crate::util::env::{env_first, env_parse};
use crate::util::retry::RetryPolicy;

const USER_AGENT: &str = concat!("cardsync/", env!("CARGO_PKG_VERSION"));

/// Transport knobs shared by every upstream client.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            // Bulk dumps run to hundreds of MB; keep the ceiling generous.
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(env_parse(
                "SYNC_HTTP_TIMEOUT_SECS",
                Self::default().timeout.as_secs(),
            )),
            retry: RetryPolicy::from_env(),
        }
    }
}

/// reqwest-backed fetcher with per-profile auth headers, timeout and retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: HttpSettings, headers: HeaderMap) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            retry: settings.retry,
        })
    }

    /// Client for one game, carrying its upstream API key when one is configured.
    pub fn for_profile(profile: &GameProfile, settings: HttpSettings) -> Result<Self, FetchError> {
        let api_key = match &profile.auth {
            AuthPolicy::OptionalApiKey { env_keys, .. } => env_first(env_keys),
            AuthPolicy::Anonymous => None,
        };
        Self::with_api_key(profile, settings, api_key)
    }

    /// Like `for_profile`, with the key supplied by the caller instead of the environment.
    pub fn with_api_key(
        profile: &GameProfile,
        settings: HttpSettings,
        api_key: Option<String>,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));
        if let AuthPolicy::OptionalApiKey { header, env_keys } = &profile.auth {
            match api_key {
                Some(key) => {
                    let name = HeaderName::from_static(*header);
                    let mut value = HeaderValue::from_str(key.trim()).map_err(|_| {
                        FetchError::Transport {
                            url: String::new(),
                            message: format!("{} contains characters not allowed in a header", env_keys[0]),
                        }
                    })?;
                    value.set_sensitive(true);
                    headers.insert(name, value);
                }
                None => warn!(
                    game = %profile.game,
                    keys = ?env_keys,
                    "no upstream API key configured; using anonymous rate limits"
                ),
            }
        }
        Self::new(settings, headers)
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after_secs,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        debug!(url, ?query, "GET");
        self.retry.run(url, || self.get_once(url, query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Game;
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_settings() -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
        }
    }

    fn pokemon_fetcher(api_key: Option<&str>) -> HttpFetcher {
        let profile = GameProfile::defaults(Game::Pokemon);
        HttpFetcher::with_api_key(&profile, quick_settings(), api_key.map(str::to_string)).unwrap()
    }

    #[test]
    fn builds_clients_for_every_profile() {
        for game in Game::ALL {
            let profile = GameProfile::defaults(game);
            assert!(HttpFetcher::for_profile(&profile, HttpSettings::default()).is_ok());
        }
    }

    #[test]
    fn settings_default_to_generous_timeout() {
        let s = HttpSettings::default();
        assert_eq!(s.timeout, Duration::from_secs(300));
        assert_eq!(s.retry.max_retries, 3);
    }

    #[test]
    fn api_key_with_control_characters_is_refused() {
        let profile = GameProfile::defaults(Game::Pokemon);
        let err = HttpFetcher::with_api_key(&profile, quick_settings(), Some("bad\nkey".into())).unwrap_err();
        assert!(err.to_string().contains("POKEMON_TCG_API_KEY"));
    }

    #[tokio::test]
    async fn sends_api_key_and_query_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/cards"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/v2/cards", server.uri());
        let body = pokemon_fetcher(Some(" secret-key "))
            .get_json(&url, &[("page", "1".to_string())])
            .await
            .unwrap();
        assert_eq!(body, serde_json::json!({"data": []}));

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        assert_eq!(headers.get("x-api-key").unwrap(), "secret-key");
        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert!(headers.get("user-agent").unwrap().to_str().unwrap().starts_with("cardsync/"));
    }

    #[tokio::test]
    async fn omits_api_key_when_none_is_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-api-key").is_none());
    }

    #[tokio::test]
    async fn not_found_maps_to_status_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let body = pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn persistent_server_errors_give_up_after_the_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn rate_limit_waits_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let started = Instant::now();
        pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rate_limit_status_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let err = pokemon_fetcher(None).get_once(&server.uri(), &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Status {
                status: 429,
                retry_after_secs: Some(0),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_json_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = pokemon_fetcher(None).get_json(&server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }), "{err:?}");
    }
}
