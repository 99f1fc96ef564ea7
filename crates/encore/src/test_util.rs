//! Shared test fixtures: a scripted network and small constructors.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use tokio::sync::broadcast;
use tokio::time::Instant;
use url::Url;

use crate::diagnostics::Diagnostics;
use crate::error::WorkerError;
use crate::net::{Fetcher, Request, Response, SiteOrigin};

pub const ORIGIN: &str = "https://site.test/";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn origin() -> SiteOrigin {
    SiteOrigin::parse(ORIGIN).unwrap()
}

/// Absolute URL of a site-relative path
pub fn abs(path: &str) -> String {
    origin().resolve(path).unwrap().to_string()
}

pub fn diagnostics() -> Diagnostics {
    let (tx, _) = broadcast::channel(16);
    Diagnostics::new(false, tx)
}

#[derive(Debug, Clone)]
enum Script {
    Status(StatusCode, String),
    Redirect(String),
    Fail,
}

#[derive(Default)]
struct State {
    calls: Vec<(String, Instant)>,
    fail_first: HashMap<String, usize>,
}

/// A [`Fetcher`] answering from a script. Unknown URLs get a 404.
#[derive(Default)]
pub struct MockFetcher {
    scripts: HashMap<String, Script>,
    headers: HashMap<String, Vec<(HeaderName, HeaderValue)>>,
    delay: Duration,
    state: Mutex<State>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, path: &str, body: &str) -> Self {
        self.script(path, Script::Status(StatusCode::OK, body.to_owned()))
    }

    pub fn with_status(self, path: &str, status: StatusCode) -> Self {
        self.script(path, Script::Status(status, format!("status {status}")))
    }

    /// Respond as if redirected to `target`
    pub fn with_redirect(self, path: &str, target: &str) -> Self {
        self.script(path, Script::Redirect(target.to_owned()))
    }

    /// Every request for `path` fails at the network level
    pub fn with_failure(self, path: &str) -> Self {
        self.script(path, Script::Fail)
    }

    /// The first `count` requests for `path` fail, later ones follow the script
    pub fn failing_first(self, path: &str, count: usize) -> Self {
        self.state.lock().fail_first.insert(abs(path), count);
        self
    }

    /// Latency applied to every request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Extra response header for `path`
    pub fn with_header(mut self, path: &str, name: &'static str, value: &'static str) -> Self {
        self.headers
            .entry(abs(path))
            .or_default()
            .push((HeaderName::from_static(name), HeaderValue::from_static(value)));
        self
    }

    fn script(mut self, path: &str, script: Script) -> Self {
        self.scripts.insert(abs(path), script);
        self
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.call_times(path).len()
    }

    pub fn call_times(&self, path: &str) -> Vec<Instant> {
        let url = abs(path);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(called, _)| *called == url)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Requested URLs in call order
    pub fn call_log(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        let url = request.url.to_string();
        let fail_now = {
            let mut state = self.state.lock();
            state.calls.push((url.clone(), Instant::now()));
            match state.fail_first.get_mut(&url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if fail_now {
            return Err(WorkerError::Network(format!("scripted failure: {url}")));
        }

        let (final_url, status, body) = match self.scripts.get(&url) {
            Some(Script::Status(status, body)) => (request.url.clone(), *status, body.clone()),
            Some(Script::Redirect(target)) => {
                (Url::parse(target)?, StatusCode::OK, "redirected".to_owned())
            }
            Some(Script::Fail) => {
                return Err(WorkerError::Network(format!("scripted failure: {url}")));
            }
            None => (request.url.clone(), StatusCode::NOT_FOUND, "not found".to_owned()),
        };

        let mut response = Response::new(final_url, status, body);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        for (name, value) in self.headers.get(&url).into_iter().flatten() {
            response.headers.insert(name.clone(), value.clone());
        }
        Ok(response)
    }
}
