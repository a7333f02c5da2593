use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// String-keyed store that survives between runs.
pub trait KvStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key`. `None` keeps it until overwritten.
    fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<TimeDelta>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Upstash Redis over its REST interface.
pub struct UpstashCache {
    http: reqwest::Client,
    rest_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashCache {
    pub fn new(rest_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build cache HTTP client")?;
        Ok(Self {
            http,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Run one Redis command, e.g. `["SET", key, value, "EX", "60"]`.
    async fn command(&self, args: &[&str]) -> Result<Value> {
        let name = args.first().copied().unwrap_or_default();
        let resp = self
            .http
            .post(&self.rest_url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .with_context(|| format!("cache {name} request failed"))?;
        let status = resp.status();
        let reply: UpstashReply = resp
            .json()
            .await
            .with_context(|| format!("malformed cache {name} reply ({status})"))?;

        if let Some(err) = reply.error {
            bail!("cache {name} failed ({status}): {err}");
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

impl KvStore for UpstashCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => bail!("unexpected cache GET result for {key}: {other}"),
        }
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<TimeDelta>) -> Result<()> {
        match expiry {
            Some(ttl) => {
                let secs = ttl.num_seconds().max(1).to_string();
                self.command(&["SET", key, value, "EX", secs.as_str()]).await?;
            }
            None => {
                self.command(&["SET", key, value]).await?;
            }
        }
        debug!("cache SET {key}");
        Ok(())
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process store with the same expiry semantics as the real cache.
///
/// The clock can be frozen and moved forward so retention windows are testable.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    frozen_now: Mutex<Option<DateTime<Utc>>>,
    writes: Mutex<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose clock reads `now` until moved.
    pub fn frozen_at(now: DateTime<Utc>) -> Self {
        let cache = Self::default();
        cache.set_now(now);
        cache
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.frozen_now.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    pub fn advance(&self, by: TimeDelta) {
        let now = self.now();
        self.set_now(now + by);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.frozen_now
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(Utc::now)
    }

    /// Number of `set` calls made so far.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expiry of a live key: `None` if absent, `Some(None)` if it never expires.
    pub fn expiry_of(&self, key: &str) -> Option<Option<DateTime<Utc>>> {
        let now = self.now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .map(|e| e.expires_at)
    }
}

impl KvStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = entries
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now));
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<TimeDelta>) -> Result<()> {
        let expires_at = expiry.map(|ttl| self.now() + ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
