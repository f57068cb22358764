//! The bidirectional channel to the remote engine, as seen by a session.
//!
//! [`crate::GeminiConnector`] is the production implementation; tests
//! script their own.

use std::sync::Arc;

use async_trait::async_trait;
use gemini_live_types::Setup;
use gemini_live_utils::audio::{InboundChunk, OutboundChunk};

use crate::error::Result;
use crate::tools::{ToolCallRequest, ToolCallResponse};

/// Everything the engine can say to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ToolCall(ToolCallRequest),
    Audio(InboundChunk),
    /// Barge-in: the user started talking over the engine.
    Interrupted,
    Closed,
    Error(String),
}

pub type InboundTx = tokio::sync::mpsc::UnboundedSender<InboundEvent>;
pub type InboundRx = tokio::sync::mpsc::UnboundedReceiver<InboundEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget, no acknowledgement.
    async fn send_audio(&self, chunk: OutboundChunk) -> Result<()>;

    /// Fire-and-forget, no acknowledgement.
    async fn send_tool_response(&self, response: ToolCallResponse) -> Result<()>;

    /// Idempotent and best-effort.
    async fn close(&self) -> Result<()>;
}

/// An open transport plus its inbound message stream.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub messages: InboundRx,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolves once the engine has acknowledged `setup`.
    async fn connect(&self, setup: &Setup) -> Result<Connection>;
}
