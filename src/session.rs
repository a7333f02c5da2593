use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::KvStore;

/// How long a persisted session bundle is kept.
pub const SESSION_RETENTION_DAYS: i64 = 30;

/// Cache key holding the session bundle for `username`.
pub fn session_key(username: &str) -> String {
    format!("cookie_{username}")
}

/// A cookie as persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Authentication state for the source API.
///
/// Returned by login, threaded through every request as `&mut Session`, and
/// exported to the cache at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    cookies: Vec<SessionCookie>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Upsert a cookie by name. An empty value clears it, which is how the API logs a session out.
    pub fn absorb(&mut self, name: &str, value: &str, domain: &str, path: &str) {
        self.cookies.retain(|c| c.name != name);
        if value.is_empty() {
            return;
        }
        self.cookies.push(SessionCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
        });
    }

    /// `Cookie` request header value, if there is anything to send.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        Some(pairs.join("; "))
    }

    pub fn export(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize session")
    }

    pub fn import(bundle: &str) -> Result<Self> {
        serde_json::from_str(bundle).context("failed to parse session bundle")
    }
}

/// Load the session persisted for `username`.
///
/// Missing or unreadable bundles yield an empty session; the first request
/// will then log in.
pub async fn restore<C: KvStore>(cache: &C, username: &str) -> Result<Session> {
    let key = session_key(username);
    let Some(bundle) = cache.get(&key).await? else {
        info!("No saved session for {username}");
        return Ok(Session::default());
    };
    match Session::import(&bundle) {
        Ok(session) => {
            debug!("Restored {} session cookie(s)", session.cookies.len());
            Ok(session)
        }
        Err(e) => {
            warn!("Ignoring saved session for {username}: {e:#}");
            Ok(Session::default())
        }
    }
}

/// Write `session` back for the next run.
pub async fn persist<C: KvStore>(
    cache: &C,
    username: &str,
    session: &Session,
    retention: TimeDelta,
) -> Result<()> {
    cache
        .set(&session_key(username), &session.export()?, Some(retention))
        .await
        .with_context(|| format!("failed to persist session for {username}"))?;
    debug!("Persisted {} session cookie(s)", session.cookies.len());
    Ok(())
}
