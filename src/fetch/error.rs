use std::time::Duration;

use thiserror::Error;

/// A single attempt failed below the HTTP layer (connect, TLS, timeout, body read).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("client setup failed: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// Fatal escalation of one fetch call. Aborts the whole run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gave up on {url}: waited {:.0}s in backoff, over the {:.0}s ceiling (last: {last})", waited.as_secs_f64(), ceiling.as_secs_f64())]
    WaitCeilingExceeded {
        url: String,
        waited: Duration,
        ceiling: Duration,
        last: String,
    },

    #[error("gave up on {url} after {attempts} retries (last: {last})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}
