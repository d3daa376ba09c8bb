//! Outbound Instagram Graph API client.
//!
//! The engine's contract with the platform is narrow: look up account info,
//! post a comment reply, send a direct message. Reply/DM results are
//! normalized to a boolean; transport errors and non-success statuses are
//! logged here and reported as `false`, so callers never see a distinct
//! exception path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Profile summary returned by the platform for an access credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub media_count: Option<i64>,
    #[serde(default)]
    pub followers_count: Option<i64>,
    #[serde(default)]
    pub follows_count: Option<i64>,
}

/// Outbound platform operations the engine depends on.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetches the profile behind an access token, or `None` on any failure.
    async fn get_account_info(&self, access_token: &str) -> Option<AccountInfo>;

    /// Posts a public reply under a comment. Returns `true` on success.
    async fn post_reply(&self, access_token: &str, comment_id: &str, message: &str) -> bool;

    /// Sends a direct message to a user. Returns `true` on success.
    async fn send_direct_message(
        &self,
        access_token: &str,
        recipient_id: &str,
        message: &str,
    ) -> bool;
}

/// Graph API implementation of [`PlatformClient`].
pub struct GraphApiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl GraphApiClient {
    /// Create a client against a Graph API base URL (no trailing slash) and
    /// version segment such as `v21.0`. The `http_client` carries the bounded
    /// request timeout.
    pub fn new(http_client: reqwest::Client, base_url: String, api_version: String) -> Self {
        Self {
            http_client,
            base_url,
            api_version,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }
}

#[async_trait]
impl PlatformClient for GraphApiClient {
    async fn get_account_info(&self, access_token: &str) -> Option<AccountInfo> {
        let url = self.url("me");
        let response = self
            .http_client
            .get(&url)
            .query(&[
                (
                    "fields",
                    "id,username,account_type,media_count,followers_count,follows_count",
                ),
                ("access_token", access_token),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Account info request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Account info request rejected");
            return None;
        }

        match response.json::<AccountInfo>().await {
            Ok(info) => Some(info),
            Err(e) => {
                error!(error = %e, "Failed to decode account info response");
                None
            }
        }
    }

    async fn post_reply(&self, access_token: &str, comment_id: &str, message: &str) -> bool {
        let url = self.url(&format!("{comment_id}/replies"));
        let response = self
            .http_client
            .post(&url)
            .form(&[("message", message), ("access_token", access_token)])
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!(comment_id = %comment_id, "Comment reply posted");
                true
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!(comment_id = %comment_id, status, body = %body, "Comment reply rejected");
                false
            }
            Err(e) => {
                error!(comment_id = %comment_id, error = %e, "Comment reply request failed");
                false
            }
        }
    }

    async fn send_direct_message(
        &self,
        access_token: &str,
        recipient_id: &str,
        message: &str,
    ) -> bool {
        let url = self.url("me/messages");
        let payload = json!({
            "recipient": { "id": recipient_id },
            "message": { "text": message },
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("access_token", access_token)])
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!(recipient_id = %recipient_id, "Direct message sent");
                true
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!(recipient_id = %recipient_id, status, body = %body, "Direct message rejected");
                false
            }
            Err(e) => {
                debug!(recipient_id = %recipient_id, error = %e, "Direct message request failed");
                false
            }
        }
    }
}
