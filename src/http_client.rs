use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::StreamError;
use crate::models::ChatStreamRequest;

/// Header carrying the client-generated request id
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Media type the chat endpoint must answer with
pub const EVENT_STREAM: &str = "text/event-stream";

/// HTTP client for the streaming chat endpoint.
///
/// Opens the connection and hands back the raw response; reading the body is left to
/// the caller. No retries: a failed turn is restarted by the caller as a whole.
#[derive(Clone)]
pub struct AgentHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Streaming chat endpoint
    endpoint: String,

    /// Bearer credential, if any
    api_token: Option<String>,
}

impl AgentHttpClient {
    /// Create a new HTTP client
    ///
    /// A `request_timeout` of 0 leaves the request without a total timeout, which is what
    /// long-running streams need.
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(connect_timeout));
        if request_timeout > 0 {
            builder = builder.timeout(Duration::from_secs(request_timeout));
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            config.api_token.clone(),
            config.http_connect_timeout,
            config.http_request_timeout,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one chat turn and return the response as soon as headers arrive.
    ///
    /// Non-success statuses are returned as-is; only failures to send are errors here.
    pub async fn send_chat(&self, request: &ChatStreamRequest) -> Result<Response, StreamError> {
        let request_id = Uuid::new_v4().to_string();

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, EVENT_STREAM)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, &request_id)
            .json(request);
        if let Some(ref token) = self.api_token {
            builder = builder.bearer_auth(token);
        }

        tracing::info!(
            request_id = %request_id,
            url = %self.endpoint,
            agent_type = %request.agent_type,
            "Opening chat stream"
        );

        let response = builder.send().await.map_err(|e| {
            tracing::error!(request_id = %request_id, "Failed to send chat request: {}", e);
            StreamError::Request(e)
        })?;

        tracing::debug!(
            request_id = %request_id,
            status = %response.status(),
            "Received HTTP response"
        );

        Ok(response)
    }
}

impl std::fmt::Debug for AgentHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHttpClient")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
