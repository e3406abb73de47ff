//! Swift account probe
//!
//! Issues `HEAD {endpoint}/v1/AUTH_{project}` and reads the `X-Account-Bytes-Used`
//! header of the response.

use async_trait::async_trait;
use consometer_common::{FetchError, Project};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, instrument};

use super::fetcher::UsageProbe;

/// Status codes accepted for an account HEAD
const OK_CODES: [StatusCode; 2] = [StatusCode::NO_CONTENT, StatusCode::OK];

/// Header carrying the account usage in bytes
const BYTES_USED_HEADER: &str = "x-account-bytes-used";

/// Reads account usage from one Swift endpoint with a Keystone token
pub struct SwiftProbe {
    client: Client,
    endpoint: String,
    token: String,
}

impl SwiftProbe {
    pub fn new(client: Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// URL of the project's Swift account
    pub fn account_url(&self, project_id: &str) -> String {
        format!("{}/v1/AUTH_{}", self.endpoint.trim_end_matches('/'), project_id)
    }
}

#[async_trait]
impl UsageProbe for SwiftProbe {
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    async fn bytes_used(&self, project: &Project) -> Result<String, FetchError> {
        let url = self.account_url(&project.id);
        let response = self
            .client
            .request(Method::HEAD, &url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !OK_CODES.contains(&status) {
            return Err(FetchError::UnexpectedStatus(status.as_u16()));
        }

        // A missing header yields an empty volume; the reducer leaves it out of the total
        let volume = response
            .headers()
            .get(BYTES_USED_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(url = %url, volume = %volume, "Account HEAD succeeded");
        Ok(volume)
    }
}
