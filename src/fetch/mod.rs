pub mod clock;
pub mod error;
pub mod retry;
pub mod transport;

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::extract::blocked;
use clock::{Clock, SystemClock};
use error::FetchError;
use retry::{parse_retry_after, RetryCause, RetryPolicy, RetryState};
use transport::Transport;

const EXCERPT_CHARS: usize = 300;

/// Lightweight fetch, or a render that waits for client-side content to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Light,
    Full,
}

/// Which pipeline stage asked for the page. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Root,
    Listing,
    Detail,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Purpose::Root => "root",
            Purpose::Listing => "listing",
            Purpose::Detail => "detail",
        })
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub render: RenderMode,
    pub purpose: Purpose,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, purpose: Purpose) -> Self {
        FetchRequest {
            url: url.into(),
            render: RenderMode::Light,
            purpose,
        }
    }

    pub fn render(mut self, render: RenderMode) -> Self {
        self.render = render;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-success, non-throttling status. Not retried.
    Status(u16),
    Empty,
    /// The page is an anti-bot interstitial instead of real content.
    Blocked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Status(code) => write!(f, "HTTP {code}"),
            FailureKind::Empty => f.write_str("empty page"),
            FailureKind::Blocked => f.write_str("blocked by anti-bot page"),
        }
    }
}

/// `Html` never carries blank text; that case becomes `Failure(Empty)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Html(String),
    Failure { kind: FailureKind, detail: String },
}

impl FetchOutcome {
    fn from_body(body: String) -> Self {
        if body.trim().is_empty() {
            return FetchOutcome::Failure {
                kind: FailureKind::Empty,
                detail: "response body was empty".to_string(),
            };
        }
        if let Some(phrase) = blocked::challenge_phrase(&body) {
            return FetchOutcome::Failure {
                kind: FailureKind::Blocked,
                detail: format!("page contains \"{phrase}\""),
            };
        }
        FetchOutcome::Html(body)
    }
}

/// Floor between consecutive calls plus a random extra wait.
#[derive(Debug, Clone)]
pub struct Politeness {
    pub min_gap: Duration,
    pub jitter: Duration,
}

/// Rate-limited, retrying page fetcher. Owns the last-call timestamp;
/// nothing else reads or writes it.
pub struct ThrottledFetcher<T, C = SystemClock> {
    transport: T,
    clock: C,
    policy: RetryPolicy,
    politeness: Politeness,
    last_call: Option<Instant>,
    rng: fastrand::Rng,
}

impl<T: Transport, C: Clock> ThrottledFetcher<T, C> {
    pub fn new(transport: T, clock: C, policy: RetryPolicy, politeness: Politeness) -> Self {
        ThrottledFetcher {
            transport,
            clock,
            policy,
            politeness,
            last_call: None,
            rng: fastrand::Rng::new(),
        }
    }

    #[cfg(test)]
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = rng;
        self
    }

    #[cfg(test)]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn wait_politely(&mut self) {
        if let Some(last) = self.last_call {
            let since = self.clock.now().saturating_duration_since(last);
            let gap = self.politeness.min_gap.saturating_sub(since);
            if !gap.is_zero() {
                debug!(gap_secs = gap.as_secs_f64(), "politeness gap");
                self.clock.sleep(gap);
            }
        }
        if !self.politeness.jitter.is_zero() {
            self.clock.sleep(self.politeness.jitter.mul_f64(self.rng.f64()));
        }
    }

    /// Fetch one page. Soft failures come back as `FetchOutcome::Failure`;
    /// `Err` means throttling or transport trouble outlasted the retry budget.
    pub fn fetch(&mut self, req: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let mut state = RetryState::new();
        info!(purpose = %req.purpose, url = %req.url, render = ?req.render, "fetch");

        loop {
            self.wait_politely();

            let (cause, last) = match self.transport.get(&req.url, req.render) {
                Err(e) => (RetryCause::Transport, e.to_string()),
                Ok(resp) => {
                    self.last_call = Some(self.clock.now());
                    match resp.status {
                        200 => return Ok(FetchOutcome::from_body(resp.body)),
                        429 => {
                            let retry_after = resp.header("retry-after").and_then(parse_retry_after);
                            (RetryCause::Throttled { retry_after }, "HTTP 429".to_string())
                        }
                        code => {
                            warn!(purpose = %req.purpose, url = %req.url, status = code, "terminal fetch failure");
                            return Ok(FetchOutcome::Failure {
                                kind: FailureKind::Status(code),
                                detail: excerpt(&resp.body),
                            });
                        }
                    }
                }
            };

            let wait = state.next_wait(&self.policy, cause, &mut self.rng, &req.url, &last)?;
            warn!(
                purpose = %req.purpose,
                url = %req.url,
                attempt = state.attempt(),
                wait_secs = wait.as_secs_f64(),
                waited_secs = state.waited().as_secs_f64(),
                "{last}; backing off"
            );
            self.clock.sleep(wait);
        }
    }
}

fn excerpt(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}
