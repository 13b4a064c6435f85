//! HTTP client for the remote profile store.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use strata_sync::{ProfileRemote, RemoteError};
use strata_types::Profile;

#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpProfileRemote {
    client: Client,
    base_url: String,
}

impl HttpProfileRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            message: error_message(status.as_u16(), &body),
        })
    }
}

/// The JSON `error` field when present, else a generic message.
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| format!("profile sync failed: {status}"))
}

impl ProfileRemote for HttpProfileRemote {
    async fn fetch(&self, address: &str) -> Result<Option<Profile>, RemoteError> {
        let url = format!(
            "{}/profile?address={}",
            self.base_url,
            urlencoding::encode(address)
        );
        debug!(url = %url, "Fetching remote profile");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let envelope: ProfileEnvelope = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(envelope.profile)
    }

    async fn publish(&self, profile: &Profile) -> Result<(), RemoteError> {
        let url = format!("{}/profile", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(profile)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}
