use std::sync::Once;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, warn};

use super::error::TransportError;
use super::RenderMode;

const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// What came back from one network attempt, before any policy is applied.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The remote-fetch boundary: one blocking call, no retries, no throttling.
pub trait Transport {
    fn get(&self, url: &str, render: RenderMode) -> Result<RawResponse, TransportError>;
}

/// Scraping gateway that proxies the target page and can render JavaScript.
pub struct Gateway {
    pub endpoint: String,
    pub api_key: String,
}

pub struct HttpTransport {
    client: Client,
    gateway: Option<Gateway>,
}

static DIRECT_RENDER_WARNING: Once = Once::new();

impl HttpTransport {
    pub fn new(gateway: Option<Gateway>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(HttpTransport { client, gateway })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, render: RenderMode) -> Result<RawResponse, TransportError> {
        let request = match &self.gateway {
            Some(gw) => {
                let render_js = match render {
                    RenderMode::Light => "0",
                    RenderMode::Full => "1",
                };
                self.client.get(&gw.endpoint).query(&[
                    ("api_key", gw.api_key.as_str()),
                    ("url", url),
                    ("render_js", render_js),
                ])
            }
            None => {
                if render == RenderMode::Full {
                    DIRECT_RENDER_WARNING.call_once(|| {
                        warn!("No scraping gateway configured; full render requests fall back to plain fetches");
                    });
                }
                self.client.get(url)
            }
        };

        let resp = request.send()?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.text()?;
        debug!(url, status, bytes = body.len(), "response received");

        Ok(RawResponse { status, body, headers })
    }
}

#[cfg(test)]
pub mod fake {
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    use super::*;

    type Scripted = Result<RawResponse, TransportError>;

    /// Replays scripted responses per URL. The last scripted response for a
    /// URL repeats once the queue is down to one entry.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: RefCell<HashMap<String, VecDeque<Scripted>>>,
        pub calls: RefCell<Vec<(String, RenderMode)>>,
    }

    pub fn ok(body: &str) -> RawResponse {
        status(200, body)
    }

    pub fn status(code: u16, body: &str) -> RawResponse {
        RawResponse {
            status: code,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, url: &str, response: RawResponse) -> Self {
            self.push(url, Ok(response));
            self
        }

        pub fn on_error(self, url: &str, message: &str) -> Self {
            self.push(url, Err(TransportError::Network(message.to_string())));
            self
        }

        fn push(&self, url: &str, item: Scripted) {
            self.routes
                .borrow_mut()
                .entry(url.to_string())
                .or_default()
                .push_back(item);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    fn replay(item: &Scripted) -> Scripted {
        match item {
            Ok(r) => Ok(r.clone()),
            Err(TransportError::Network(m)) => Err(TransportError::Network(m.clone())),
            Err(TransportError::Setup(m)) => Err(TransportError::Setup(m.clone())),
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str, render: RenderMode) -> Result<RawResponse, TransportError> {
            self.calls.borrow_mut().push((url.to_string(), render));
            let mut routes = self.routes.borrow_mut();
            let Some(queue) = routes.get_mut(url) else {
                return Ok(status(404, "no route"));
            };
            if queue.len() > 1 {
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            match queue.front() {
                Some(item) => replay(item),
                None => Ok(status(404, "no route")),
            }
        }
    }
}
