//! Twitch Helix stream status

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::application::errors::BotError;
use crate::domain::traits::StreamStatus;

/// Helix API base URL
pub const API_BASE: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<Stream>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    started_at: DateTime<Utc>,
}

/// Looks up live streams through the Helix `streams` endpoint
pub struct HelixStatus {
    client: Client,
    api_url: String,
    client_id: String,
    token: Option<String>,
}

impl HelixStatus {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: API_BASE.to_string(),
            client_id: client_id.into(),
            token: None,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// App or user access token sent as `Bearer`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl StreamStatus for HelixStatus {
    async fn live_since(&self, channel: &str) -> Result<Option<DateTime<Utc>>, BotError> {
        let login = channel.trim_start_matches('#');
        let url = format!("{}/streams", self.api_url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("user_login", login)])
            .header("Client-Id", &self.client_id);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BotError::Api(response.status().to_string()));
        }

        let data: StreamsResponse = response
            .json()
            .await
            .map_err(|e| BotError::Api(e.to_string()))?;

        Ok(data.data.first().map(|stream| stream.started_at))
    }
}
