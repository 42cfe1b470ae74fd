use anyhow::{Context, Result};
use clap::Parser;

use crate::models::{ChatStreamRequest, RunConfig};

/// Agent Stream - send one message and reconstruct the streamed reply
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Message to send
    pub message: String,

    /// Streaming chat endpoint URL
    #[arg(short = 'u', long, env = "AGENT_STREAM_URL")]
    pub endpoint: Option<String>,

    /// Bearer token attached to the request
    #[arg(short = 't', long, env = "AGENT_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Agent type selector
    #[arg(short = 'a', long, env = "AGENT_TYPE", default_value = "assistant")]
    pub agent_type: String,

    /// Continue an existing conversation
    #[arg(short = 'c', long, env = "AGENT_CONVERSATION_ID")]
    pub conversation_id: Option<String>,

    /// Model override for this run
    #[arg(short = 'm', long, env = "AGENT_MODEL")]
    pub model: Option<String>,

    /// Extra instructions for this run
    #[arg(long)]
    pub instructions: Option<String>,

    /// Sampling temperature for this run
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Output token limit for this run
    #[arg(long)]
    pub max_output_tokens: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds (0 = no timeout)
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "0")]
    pub request_timeout: u64,

    /// Report byte-stream read failures as an error chunk instead of ending silently
    #[arg(long, env = "SURFACE_READ_ERRORS")]
    pub surface_read_errors: bool,

    /// Print every chunk as a JSON line instead of the reconstructed text
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Endpoint
    pub endpoint: String,
    pub api_token: Option<String>,

    // Request
    pub message: String,
    pub agent_type: String,
    pub conversation_id: Option<String>,
    pub run_config: RunConfig,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Stream handling
    pub surface_read_errors: bool,

    // Output
    pub log_level: String,
    pub json_output: bool,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let endpoint = args
            .endpoint
            .or_else(|| std::env::var("AGENT_STREAM_URL").ok())
            .context("AGENT_STREAM_URL is required (use -u or set AGENT_STREAM_URL env var)")?;

        Ok(Config {
            endpoint,
            api_token: args.api_token.filter(|t| !t.trim().is_empty()),
            message: args.message,
            agent_type: args.agent_type,
            conversation_id: args.conversation_id,
            run_config: RunConfig {
                model: args.model,
                instructions: args.instructions,
                temperature: args.temperature,
                max_output_tokens: args.max_output_tokens,
                metadata: Default::default(),
            },
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.request_timeout,
            surface_read_errors: args.surface_read_errors,
            log_level: args.log_level,
            json_output: args.json,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.endpoint)
            .with_context(|| format!("AGENT_STREAM_URL is not a valid URL: {}", self.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("AGENT_STREAM_URL must be http or https: {}", self.endpoint);
        }

        if self.message.trim().is_empty() {
            anyhow::bail!("Message cannot be empty");
        }

        if self.agent_type.trim().is_empty() {
            anyhow::bail!("Agent type cannot be empty");
        }

        if let Some(temperature) = self.run_config.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                anyhow::bail!("Temperature must be between 0 and 2, got {}", temperature);
            }
        }

        Ok(())
    }

    /// Request body for the configured turn
    pub fn request(&self) -> ChatStreamRequest {
        let mut request = ChatStreamRequest::new(self.message.clone(), self.agent_type.clone())
            .with_run_config(self.run_config.clone());
        if let Some(ref id) = self.conversation_id {
            request = request.with_conversation_id(id.clone());
        }
        request
    }
}
