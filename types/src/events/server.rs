use crate::audio::Blob;
use crate::content::Content;
use crate::tools::FunctionCall;

/// `setupComplete` message, an empty object.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

/// `serverContent` message
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    model_turn: Option<Content>,

    /// The model finished its turn
    #[serde(default)]
    turn_complete: bool,

    /// The user started speaking while the model was still talking
    #[serde(default)]
    interrupted: bool,

    #[serde(default)]
    generation_complete: bool,
}

impl ServerContent {
    pub fn model_turn(&self) -> Option<&Content> {
        self.model_turn.as_ref()
    }

    pub fn turn_complete(&self) -> bool {
        self.turn_complete
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn generation_complete(&self) -> bool {
        self.generation_complete
    }

    /// Audio blobs of the model turn, in order.
    pub fn audio(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts())
            .filter_map(|part| part.inline_data())
            .filter(|blob| blob.is_audio())
    }
}

/// `toolCall` message
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

impl ToolCall {
    pub fn function_calls(&self) -> &[FunctionCall] {
        &self.function_calls
    }
}

/// `toolCallCancellation` message
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

impl ToolCallCancellation {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// `goAway` message, the server will disconnect soon.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// ex: "10s"
    #[serde(skip_serializing_if = "Option::is_none")]
    time_left: Option<String>,
}

impl GoAway {
    pub fn time_left(&self) -> Option<&str> {
        self.time_left.as_deref()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    response_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl UsageMetadata {
    pub fn prompt_token_count(&self) -> u32 {
        self.prompt_token_count
    }

    pub fn response_token_count(&self) -> u32 {
        self.response_token_count
    }

    pub fn total_token_count(&self) -> u32 {
        self.total_token_count
    }
}
