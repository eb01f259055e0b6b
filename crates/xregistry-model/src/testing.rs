//! Scripted transport for unit tests

use crate::client::ModelTransport;
use crate::error::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A canned answer for one URL
#[derive(Clone)]
pub struct Reply {
    outcome: Result<Option<Value>, FetchError>,
    delay: Duration,
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Self {
            outcome: Ok(Some(value)),
            delay: Duration::ZERO,
        }
    }

    pub fn empty() -> Self {
        Self {
            outcome: Ok(None),
            delay: Duration::ZERO,
        }
    }

    pub fn error(error: FetchError) -> Self {
        Self {
            outcome: Err(error),
            delay: Duration::ZERO,
        }
    }

    pub fn after_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}

/// Answers from a fixed table and counts requests per URL.
/// Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: HashMap<String, Reply>,
    hits: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn get_json(&self, url: &str) -> Result<Option<Value>, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let reply = self
            .replies
            .get(url)
            .cloned()
            .unwrap_or_else(|| Reply::error(FetchError::http(404, "Not Found")));

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.outcome
    }
}
