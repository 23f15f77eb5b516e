//! Error taxonomy for a sync pass.
//!
//! Fetch errors abort the source that raised them, normalization and storage
//! errors are per-record and handled according to the profile's failure policy.
use std::time::Duration;

use thiserror::Error;

/// Upstream request failed or produced something we cannot use.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: u16,
        /// `Retry-After` in seconds, when the upstream sent one.
        retry_after_secs: Option<u64>,
    },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("unexpected response shape from {url}: {detail}")]
    UnexpectedShape { url: String, detail: String },
    #[error("bulk index has no usable entry of type `{entry_type}`")]
    BulkEntryMissing { entry_type: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            FetchError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after_secs: None,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Raw record could not be mapped onto the canonical shape.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizationError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),
    #[error("record is malformed: {0}")]
    Malformed(String),
}

/// The backend refused or never received a write/read.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{table}: request rejected with HTTP {status}: {body}")]
    Rejected {
        table: String,
        status: u16,
        body: String,
    },
    #[error("storage request failed: {0}")]
    Transport(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not encode row: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid table name `{0}`")]
    InvalidTable(String),
}

/// Anything that can end or degrade a pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Errors that may succeed when the same request is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;

    /// Minimum wait the remote asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

fn transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => transient_status(*status),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            StorageError::Transport(_) => true,
            StorageError::Rejected { status, .. } => transient_status(*status),
            StorageError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let status = |s| FetchError::Status {
            url: "https://x".into(),
            status: s,
            retry_after_secs: None,
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!FetchError::BulkEntryMissing {
            entry_type: "default_cards".into()
        }
        .is_transient());
    }

    #[test]
    fn rejected_writes_only_retry_on_server_side_status() {
        let rejected = |s| StorageError::Rejected {
            table: "cards".into(),
            status: s,
            body: String::new(),
        };
        assert!(!rejected(409).is_transient());
        assert!(!rejected(401).is_transient());
        assert!(rejected(502).is_transient());
        assert!(StorageError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn only_status_errors_carry_retry_after() {
        let limited = FetchError::Status {
            url: "https://api.pokemontcg.io/v2/cards".into(),
            status: 429,
            retry_after_secs: Some(7),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(
            FetchError::Timeout { url: "https://x".into() }.retry_after(),
            None
        );
        assert_eq!(StorageError::Transport("reset".into()).retry_after(), None);
    }
}
