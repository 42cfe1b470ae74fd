use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==================================================================================================
// Chat stream request
// ==================================================================================================

/// JSON body of the streaming chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    pub agent_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_config: Option<RunConfig>,
}

/// Optional per-run knobs forwarded to the backend untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RunConfig {
    pub fn is_empty(&self) -> bool {
        *self == RunConfig::default()
    }
}

impl ChatStreamRequest {
    pub fn new(message: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            agent_type: agent_type.into(),
            run_config: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Attach run configuration; an all-default config is not sent.
    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = if run_config.is_empty() {
            None
        } else {
            Some(run_config)
        };
        self
    }
}
