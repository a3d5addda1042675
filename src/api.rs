//! REST client for the remote profile endpoints.
//!
//! All three endpoints are bearer-token authenticated and exchange a flat
//! platform-to-handle mapping (`GET` wraps it in the user object under
//! `social_profiles`).
//!
//! ERROR HANDLING
//! ==============
//! Transport failures, non-success statuses and undecodable bodies are kept
//! apart in [`RemoteError`] so the profile store can tell "server down" from
//! "server said no" when it degrades to local-only behavior.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::HttpTimeouts;
use crate::profile::ProfileRecord;
use crate::session::Account;

pub const PROFILE_PATH: &str = "/api/users/profile";
pub const SOCIAL_PROFILES_PATH: &str = "/api/users/social-profiles";

/// Errors produced by remote profile calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
    /// The request never produced a response (DNS, refused, timeout).
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    /// The server answered with a non-success status.
    #[error("remote rejected request with status {status}")]
    Rejected { status: u16, detail: Option<String> },
    /// The server answered successfully with a body we cannot use.
    #[error("remote payload malformed: {0}")]
    Malformed(String),
}

/// Everything `GET /api/users/profile` tells us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteProfile {
    pub account: Account,
    /// `None` when the user has never stored social profiles remotely.
    pub social_profiles: Option<ProfileRecord>,
}

/// Remote side of the dual-write profile store.
#[async_trait]
pub trait ProfileRemote: Send + Sync {
    async fn fetch_profile(&self, token: &str) -> Result<RemoteProfile, RemoteError>;

    async fn put_social_profiles(&self, token: &str, record: &ProfileRecord) -> Result<(), RemoteError>;

    async fn delete_social_profiles(&self, token: &str) -> Result<(), RemoteError>;
}

/// [`ProfileRemote`] over HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpProfileRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileRemote {
    /// Build a client for `base_url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ClientBuild`] if the TLS backend fails to initialize.
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| RemoteError::ClientBuild(e.to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn endpoint(&self, path: &str) -> String {
        endpoint_url(&self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected { status: status.as_u16(), detail: error_detail(&body) })
    }
}

#[async_trait]
impl ProfileRemote for HttpProfileRemote {
    async fn fetch_profile(&self, token: &str) -> Result<RemoteProfile, RemoteError> {
        let url = self.endpoint(PROFILE_PATH);
        debug!(%url, "fetching remote profile");
        let response = self.send(self.client.get(&url).bearer_auth(token)).await?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        parse_remote_profile(body)
    }

    async fn put_social_profiles(&self, token: &str, record: &ProfileRecord) -> Result<(), RemoteError> {
        let url = self.endpoint(SOCIAL_PROFILES_PATH);
        debug!(%url, fields = record.len(), "pushing social profiles");
        self.send(self.client.put(&url).bearer_auth(token).json(record))
            .await
            .map(|_| ())
    }

    async fn delete_social_profiles(&self, token: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(SOCIAL_PROFILES_PATH);
        debug!(%url, "deleting social profiles");
        self.send(self.client.delete(&url).bearer_auth(token))
            .await
            .map(|_| ())
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

/// Pull a human-readable `detail` out of an error body, if it has one.
fn error_detail(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// Decode the user payload returned by `GET /api/users/profile`.
///
/// # Errors
///
/// Returns [`RemoteError::Malformed`] when the payload is not a user object or
/// `social_profiles` is neither absent, null, nor a string/null mapping.
pub fn parse_remote_profile(body: Value) -> Result<RemoteProfile, RemoteError> {
    let Value::Object(mut fields) = body else {
        return Err(RemoteError::Malformed("profile payload is not an object".to_owned()));
    };

    let social_profiles = match fields.remove("social_profiles") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => {
            let mut record = ProfileRecord::new();
            for (platform, value) in map {
                match value {
                    Value::String(handle) => record.set(platform, handle),
                    Value::Null => record.set(platform, String::new()),
                    other => {
                        return Err(RemoteError::Malformed(format!(
                            "social profile `{platform}` is not a string: {other}"
                        )));
                    }
                }
            }
            Some(record)
        }
        Some(other) => {
            return Err(RemoteError::Malformed(format!("social_profiles is not an object: {other}")));
        }
    };

    let account = serde_json::from_value::<Account>(Value::Object(fields))
        .map_err(|e| RemoteError::Malformed(e.to_string()))?;

    Ok(RemoteProfile { account, social_profiles })
}
