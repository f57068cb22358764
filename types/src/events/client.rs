use crate::audio::Blob;
use crate::tools::FunctionResponse;

/// `realtimeInput` message
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Streamed media, ex: microphone PCM
    media_chunks: Vec<Blob>,
}

impl RealtimeInput {
    pub fn audio(blob: Blob) -> Self {
        Self {
            media_chunks: vec![blob],
        }
    }

    pub fn media_chunks(&self) -> &[Blob] {
        &self.media_chunks
    }
}

/// `toolResponse` message
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    pub fn new(function_responses: Vec<FunctionResponse>) -> Self {
        Self { function_responses }
    }

    pub fn function_responses(&self) -> &[FunctionResponse] {
        &self.function_responses
    }
}
