//! GitHub gist publisher for command lists

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::application::errors::BotError;
use crate::domain::traits::{GistPublisher, PublishedFile};

/// GitHub API base URL
pub const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Serialize)]
struct GistFile<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct GistRequest<'a> {
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    public: Option<bool>,
    files: HashMap<&'a str, GistFile<'a>>,
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    html_url: Option<String>,
    message: Option<String>,
}

/// Publishes command lists as GitHub gists
pub struct GistClient {
    client: Client,
    api_url: String,
    token: String,
    public: bool,
}

impl GistClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: API_BASE.to_string(),
            token: token.into(),
            public: true,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    fn request<'a>(files: &'a [PublishedFile], description: &'a str, public: Option<bool>) -> GistRequest<'a> {
        GistRequest {
            description,
            public,
            files: files
                .iter()
                .map(|(name, content)| (name.as_str(), GistFile { content }))
                .collect(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, body: &GistRequest<'_>) -> Result<GistResponse, BotError> {
        let response = request
            .header("Authorization", format!("token {}", self.token))
            .header("User-Agent", concat!("chanbot/", env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/vnd.github.v3+json")
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        let data: GistResponse = response
            .json()
            .await
            .map_err(|e| BotError::Api(format!("Invalid gist response: {}", e)))?;

        if !status.is_success() {
            let message = data.message.unwrap_or_else(|| status.to_string());
            return Err(BotError::Api(format!("GitHub API error: {}", message)));
        }
        Ok(data)
    }
}

#[async_trait]
impl GistPublisher for GistClient {
    async fn publish(&self, files: &[PublishedFile], description: &str) -> Result<String, BotError> {
        let url = format!("{}/gists", self.api_url);
        let body = Self::request(files, description, Some(self.public));

        let data = self.send(self.client.post(&url), &body).await?;
        data.html_url
            .ok_or_else(|| BotError::Api("Gist response has no html_url".to_string()))
    }

    async fn update(&self, files: &[PublishedFile], url: &str, description: &str) -> Result<(), BotError> {
        let url = format!("{}/gists/{}", self.api_url, gist_id(url));
        let body = Self::request(files, description, None);

        self.send(self.client.patch(&url), &body).await?;
        Ok(())
    }
}

/// Id of a gist given as a full URL or a bare id
pub fn gist_id(url_or_id: &str) -> &str {
    url_or_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url_or_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gist_id_from_url_or_id() {
        assert_eq!(gist_id("https://gist.github.com/a2a510376da5ffcb93f9"), "a2a510376da5ffcb93f9");
        assert_eq!(gist_id("https://gist.github.com/user/a2a5/"), "a2a5");
        assert_eq!(gist_id("a2a510376da5ffcb93f9"), "a2a510376da5ffcb93f9");
    }

    #[test]
    fn request_body_shape() {
        let files = vec![("commands-for-chan.md".to_string(), "# list".to_string())];

        let body = serde_json::to_value(GistClient::request(&files, "desc", Some(true))).unwrap();
        assert_eq!(body["description"], "desc");
        assert_eq!(body["public"], true);
        assert_eq!(body["files"]["commands-for-chan.md"]["content"], "# list");

        let patch = serde_json::to_value(GistClient::request(&files, "desc", None)).unwrap();
        assert!(patch.get("public").is_none());
    }

    #[tokio::test]
    async fn publish_posts_and_returns_url() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // The JSON body ends with the closing braces of files
            while !String::from_utf8_lossy(&request).ends_with("}}}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let body = r#"{"html_url":"https://gist.github.com/abc"}"#;
            let response = format!(
                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        let client = GistClient::new("secret").with_api_url(format!("http://{}/", addr));
        let files = vec![("a.md".to_string(), "content".to_string())];
        let url = client.publish(&files, "desc").await.unwrap();

        let request = server.await.unwrap();
        assert_eq!(url, "https://gist.github.com/abc");
        assert!(request.starts_with("POST /gists "));
        assert!(request.to_lowercase().contains("authorization: token secret"));
    }
}
