use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{COOKIE, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::auth::{CodeProvider, Credentials, ReauthBudget, SecondFactor};
use crate::error::ApiError;
use crate::session::Session;
use crate::types::{Instance, World, WorldSearch};
use crate::{API_BASE, API_COOKIE_DOMAIN};

/// Snapshots the notifier jobs poll for.
pub trait SourceApi {
    fn group_instances(
        &self,
        session: &mut Session,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<Instance>, ApiError>> + Send;

    fn search_worlds(
        &self,
        session: &mut Session,
        query: &WorldSearch,
    ) -> impl Future<Output = Result<Vec<World>, ApiError>> + Send;
}

/// Reply of `GET /auth/user`: the current user, or a demand for a second factor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUserReply {
    #[serde(default)]
    requires_two_factor_auth: Vec<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    #[serde(default)]
    verified: bool,
}

/// VRChat REST client. Holds no session state of its own.
pub struct VrchatClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    codes: Box<dyn CodeProvider>,
}

impl VrchatClient {
    pub fn new(
        credentials: Credentials,
        user_agent: &str,
        codes: Box<dyn CodeProvider>,
    ) -> anyhow::Result<Self> {
        Self::with_base_url(API_BASE, credentials, user_agent, codes)
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Credentials,
        user_agent: &str,
        codes: Box<dyn CodeProvider>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build VRChat HTTP client")?;
        Ok(Self::from_parts(base_url, http, credentials, codes))
    }

    fn from_parts(
        base_url: &str,
        http: reqwest::Client,
        credentials: Credentials,
        codes: Box<dyn CodeProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            codes,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in with basic auth, completing TOTP verification when asked.
    ///
    /// Returns a fresh session; the caller replaces its old one with it.
    pub async fn login(&self) -> Result<Session, ApiError> {
        info!("Logging in as {}", self.credentials.username);
        let mut session = Session::default();

        let resp = self
            .http
            .get(self.url("/auth/user"))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        absorb_cookies(&mut session, &resp);
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let reply: CurrentUserReply = decode(resp).await?;

        match SecondFactor::from_methods(&reply.requires_two_factor_auth) {
            SecondFactor::NotRequired => {}
            SecondFactor::Totp => {
                let code = self.codes.code()?;
                self.verify_second_factor(&mut session, &code).await?;
            }
            SecondFactor::Unsupported(methods) => {
                return Err(ApiError::UnsupportedSecondFactor(methods));
            }
        }

        if let Some(name) = reply.display_name {
            info!("Logged in as {name}");
        }
        Ok(session)
    }

    /// Submit a TOTP code for a session that is waiting on its second factor.
    pub async fn verify_second_factor(
        &self,
        session: &mut Session,
        code: &str,
    ) -> Result<(), ApiError> {
        let resp = self
            .with_session(
                self.http.post(self.url("/auth/twofactorauth/totp/verify")),
                session,
            )
            .json(&json!({ "code": code }))
            .send()
            .await?;
        absorb_cookies(session, &resp);
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let reply: VerifyReply = decode(resp).await?;
        if !reply.verified {
            return Err(ApiError::SecondFactorRejected);
        }
        debug!("Second factor verified");
        Ok(())
    }

    /// The logged-in user as raw JSON; doubles as a session check.
    pub async fn current_user(&self, session: &mut Session) -> Result<Value, ApiError> {
        self.request(session, Method::GET, "/auth/user", &[]).await
    }

    pub async fn get_group_instances(
        &self,
        session: &mut Session,
        group_id: &str,
    ) -> Result<Vec<Instance>, ApiError> {
        let path = format!("/groups/{group_id}/instances");
        self.request(session, Method::GET, &path, &[]).await
    }

    /// Group instances exactly as the API returned them.
    pub async fn get_group_instances_raw(
        &self,
        session: &mut Session,
        group_id: &str,
    ) -> Result<Value, ApiError> {
        let path = format!("/groups/{group_id}/instances");
        self.request(session, Method::GET, &path, &[]).await
    }

    pub async fn search_world(
        &self,
        session: &mut Session,
        query: &WorldSearch,
    ) -> Result<Vec<World>, ApiError> {
        self.request(session, Method::GET, "/worlds", &query.to_query())
            .await
    }

    /// World search results exactly as the API returned them.
    pub async fn search_world_raw(
        &self,
        session: &mut Session,
        query: &WorldSearch,
    ) -> Result<Value, ApiError> {
        self.request(session, Method::GET, "/worlds", &query.to_query())
            .await
    }

    pub async fn get_group_announcement(
        &self,
        session: &mut Session,
        group_id: &str,
    ) -> Result<Value, ApiError> {
        let path = format!("/groups/{group_id}/announcement");
        self.request(session, Method::GET, &path, &[]).await
    }

    pub async fn get_group_posts(
        &self,
        session: &mut Session,
        group_id: &str,
        n: Option<u32>,
        offset: Option<u32>,
        public_only: Option<bool>,
    ) -> Result<Value, ApiError> {
        let path = format!("/groups/{group_id}/posts");
        let mut query = Vec::new();
        if let Some(n) = n {
            query.push(("n", n.to_string()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(public_only) = public_only {
            query.push(("publicOnly", public_only.to_string()));
        }
        self.request(session, Method::GET, &path, &query).await
    }

    /// Send an authenticated request, logging in again at most once on 401.
    async fn request<T: DeserializeOwned>(
        &self,
        session: &mut Session,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut budget = ReauthBudget::default();
        loop {
            let builder = self
                .http
                .request(method.clone(), self.url(path))
                .query(query);
            let resp = self.with_session(builder, session).send().await?;
            absorb_cookies(session, &resp);

            if resp.status() == StatusCode::UNAUTHORIZED {
                budget.spend()?;
                warn!("{method} {path} was unauthorized, logging in again");
                *session = self.login().await?;
                continue;
            }
            return decode(resp).await;
        }
    }

    fn with_session(
        &self,
        builder: reqwest::RequestBuilder,
        session: &Session,
    ) -> reqwest::RequestBuilder {
        let Some(header) = session.cookie_header() else {
            return builder;
        };
        match HeaderValue::from_str(&header) {
            Ok(value) => builder.header(COOKIE, value),
            Err(e) => {
                warn!("Session cookies are not a valid header, sending none: {e}");
                builder
            }
        }
    }
}

impl SourceApi for VrchatClient {
    async fn group_instances(
        &self,
        session: &mut Session,
        group_id: &str,
    ) -> Result<Vec<Instance>, ApiError> {
        self.get_group_instances(session, group_id).await
    }

    async fn search_worlds(
        &self,
        session: &mut Session,
        query: &WorldSearch,
    ) -> Result<Vec<World>, ApiError> {
        self.search_world(session, query).await
    }
}

/// Fold `Set-Cookie` headers of a response into the session.
fn absorb_cookies(session: &mut Session, resp: &Response) {
    for cookie in resp.cookies() {
        session.absorb(
            cookie.name(),
            cookie.value(),
            cookie.domain().unwrap_or(API_COOKIE_DOMAIN),
            cookie.path().unwrap_or("/"),
        );
    }
}

/// Parse a successful reply, or turn the status and body into an error.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status { status, body });
    }
    Ok(serde_json::from_str(&body)?)
}
