use crate::payload::Submission;
use mstatus_core::{PluginError, PluginResult};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

pub const DEFAULT_URL: &str = "https://api.listenbrainz.org/1/submit-listens";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin wrapper around the submit-listens endpoint.
#[derive(Debug, Clone)]
pub struct ListenBrainzClient {
    client: Client,
    url: Url,
    token: String,
}

impl ListenBrainzClient {
    pub fn new(url: Url, token: impl Into<String>) -> PluginResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PluginError::Network {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url,
            token: token.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn submit(&self, submission: &Submission) -> PluginResult<()> {
        let res = self
            .client
            .post(self.url.clone())
            .header("Authorization", format!("Token {}", self.token))
            .json(submission)
            .send()
            .await
            .map_err(|e| PluginError::Network {
                message: e.to_string(),
            })?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PluginError::Authentication {
                message: "invalid user token".into(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(PluginError::Network {
                message: "rate limited".into(),
            }),
            s => Err(PluginError::Protocol {
                message: format!("API error: {s} {}", body.trim()),
            }),
        }
    }
}
