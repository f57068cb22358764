pub mod client;
pub mod server;

use client::*;
use server::*;

use crate::session::Setup;

/// Messages sent from the client. Each serializes as a single-key object,
/// ex: `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Messages sent by the server. At most one of the payload fields is set,
/// `usage_metadata` may accompany any of them.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup_complete: Option<SetupComplete>,

    #[serde(skip_serializing_if = "Option::is_none")]
    server_content: Option<ServerContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call: Option<ToolCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_cancellation: Option<ToolCallCancellation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    go_away: Option<GoAway>,

    #[serde(skip_serializing_if = "Option::is_none")]
    usage_metadata: Option<UsageMetadata>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn server_content(&self) -> Option<&ServerContent> {
        self.server_content.as_ref()
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        self.tool_call.as_ref()
    }

    pub fn tool_call_cancellation(&self) -> Option<&ToolCallCancellation> {
        self.tool_call_cancellation.as_ref()
    }

    pub fn go_away(&self) -> Option<&GoAway> {
        self.go_away.as_ref()
    }

    pub fn usage_metadata(&self) -> Option<&UsageMetadata> {
        self.usage_metadata.as_ref()
    }
}
