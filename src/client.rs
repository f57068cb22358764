use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use gemini_live_types::audio::{Blob, OUTPUT_SAMPLE_RATE};
use gemini_live_types::events::client::{RealtimeInput, ToolResponse};
use gemini_live_types::tools::FunctionResponse;
use gemini_live_types::{ClientMessage, ServerMessage, Setup};
use gemini_live_utils::audio::{InboundChunk, OutboundChunk};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{Error, Result};
use crate::tools::{ToolCallRequest, ToolCallResponse};
use crate::transport::{Connection, Connector, InboundEvent, InboundRx, InboundTx, Transport};

mod config;
mod consts;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats;

type ClientTx = tokio::sync::mpsc::Sender<Message>;
type SharedStats = Arc<Mutex<Stats>>;

/// One open Live API socket.
///
/// Outbound messages go through a bounded queue drained by a writer task; a
/// reader task translates server messages into [`InboundEvent`]s.
pub struct Client {
    c_tx: ClientTx,
    stats: SharedStats,
    closed: AtomicBool,
    send_handle: Mutex<Option<JoinHandle<()>>>,
    recv_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    fn new(c_tx: ClientTx, stats: SharedStats, send_handle: JoinHandle<()>, recv_handle: JoinHandle<()>) -> Self {
        Self {
            c_tx,
            stats,
            closed: AtomicBool::new(false),
            send_handle: Mutex::new(Some(send_handle)),
            recv_handle: Mutex::new(Some(recv_handle)),
        }
    }

    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn try_send_message(&self, message: &ClientMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Send("connection closed".to_string()));
        }
        let text = serde_json::to_string(message).map_err(|e| Error::Send(e.to_string()))?;
        match self.c_tx.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Send("outbound queue is full".to_string())),
            Err(TrySendError::Closed(_)) => Err(Error::Send("connection closed".to_string())),
        }
    }
}

#[async_trait]
impl Transport for Client {
    async fn send_audio(&self, chunk: OutboundChunk) -> Result<()> {
        let blob = Blob::pcm(chunk.sample_rate(), chunk.to_base64());
        self.try_send_message(&ClientMessage::RealtimeInput(RealtimeInput::audio(blob)))?;
        lock(&self.stats).record_sent(chunk.data().len());
        Ok(())
    }

    async fn send_tool_response(&self, response: ToolCallResponse) -> Result<()> {
        let response = FunctionResponse::new(
            response.id,
            response.name,
            serde_json::json!({ "result": response.result }),
        );
        tracing::debug!(id = response.id(), "sending tool response");
        self.try_send_message(&ClientMessage::ToolResponse(ToolResponse::new(vec![response])))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("closing connection");
        let result = match self.c_tx.try_send(Message::Close(None)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Transport("outbound queue is full".to_string())),
            Err(TrySendError::Closed(_)) => Err(Error::Transport("writer already stopped".to_string())),
        };

        let send_handle = lock(&self.send_handle).take();
        if let Some(mut handle) = send_handle {
            match tokio::time::timeout(consts::CLOSE_FLUSH_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("writer task ended abnormally: {}", e),
                Err(_) => {
                    tracing::warn!("writer did not flush in time, dropping it");
                    handle.abort();
                }
            }
        }
        if let Some(handle) = lock(&self.recv_handle).take() {
            handle.abort();
        }
        result
    }
}

impl Drop for Client {
    // An unclosed writer drains and exits on its own once `c_tx` is gone.
    fn drop(&mut self) {
        if let Ok(Some(handle)) = self.recv_handle.get_mut().map(Option::take) {
            handle.abort();
        }
        if self.is_closed() {
            if let Ok(Some(handle)) = self.send_handle.get_mut().map(Option::take) {
                handle.abort();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connects to the Live API with `config`, sends `setup` and waits for the
/// server to acknowledge it.
pub async fn connect_with_config(config: &Config, setup: &Setup) -> Result<(Client, InboundRx)> {
    open(config, setup, Arc::new(Mutex::new(Stats::new()))).await
}

/// [`connect_with_config`] with the default config.
pub async fn connect(setup: &Setup) -> Result<(Client, InboundRx)> {
    connect_with_config(&Config::new(), setup).await
}

async fn open(config: &Config, setup: &Setup, stats: SharedStats) -> Result<(Client, InboundRx)> {
    let request = utils::build_request(config).map_err(|e| Error::Connection(e.to_string()))?;

    let handshake = async {
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let text = serde_json::to_string(&ClientMessage::Setup(setup.clone()))
            .map_err(|e| Error::Connection(e.to_string()))?;
        write
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        tracing::debug!(model = setup.model(), "setup sent");

        wait_for_setup_complete(&mut read).await?;
        Ok::<_, Error>((write, read))
    };
    let (mut write, mut read) = tokio::time::timeout(config.connect_timeout(), handshake)
        .await
        .map_err(|_| Error::Connection("timed out waiting for setupComplete".to_string()))??;
    tracing::info!("connected to live api");

    let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Message>(config.capacity());
    let (s_tx, s_rx) = tokio::sync::mpsc::unbounded_channel();

    let send_handle = tokio::spawn(async move {
        while let Some(message) = c_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = write.send(message).await {
                tracing::error!("failed to send message: {}", e);
                if closing {
                    break;
                }
                continue;
            }
            if closing {
                break;
            }
        }
        if let Err(e) = write.close().await {
            tracing::debug!("socket already closed: {}", e);
        }
    });

    let recv_stats = stats.clone();
    let recv_handle = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let message = match message {
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    let _ = s_tx.send(InboundEvent::Error(e.to_string()));
                    return;
                }
                Ok(message) => message,
            };
            if let Message::Close(reason) = &message {
                tracing::info!("connection closed: {:?}", reason);
                break;
            }
            let Some(text) = utils::json_payload(&message) else {
                if let Message::Binary(bin) = &message {
                    tracing::warn!(len = bin.len(), "unexpected binary message");
                }
                continue;
            };
            let Some(server_message) = parse(text) else {
                continue;
            };
            if !forward(&server_message, &s_tx, &recv_stats) {
                return;
            }
        }
        let _ = s_tx.send(InboundEvent::Closed);
    });

    Ok((Client::new(c_tx, stats, send_handle, recv_handle), s_rx))
}

async fn wait_for_setup_complete<S>(read: &mut S) -> Result<()>
where
    S: Stream<Item = tungstenite::Result<Message>> + Unpin,
{
    while let Some(message) = read.next().await {
        let message = message.map_err(|e| Error::Connection(e.to_string()))?;
        if let Message::Close(frame) = &message {
            return Err(Error::Connection(format!("closed before setupComplete: {:?}", frame)));
        }
        match utils::json_payload(&message).and_then(parse) {
            Some(server_message) if server_message.is_setup_complete() => return Ok(()),
            Some(_) => tracing::debug!("ignoring message before setupComplete"),
            None => {}
        }
    }
    Err(Error::Connection("stream ended before setupComplete".to_string()))
}

fn parse(text: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::error!("failed to deserialize message: {}, text=> {:?}", e, text);
            None
        }
    }
}

/// Returns false once the session stopped listening.
fn forward(message: &ServerMessage, s_tx: &InboundTx, stats: &SharedStats) -> bool {
    if let Some(usage) = message.usage_metadata() {
        lock(stats).update_usage(
            usage.total_token_count(),
            usage.prompt_token_count(),
            usage.response_token_count(),
        );
        tracing::debug!(
            "total_tokens: {}, prompt_tokens: {}, response_tokens: {}",
            usage.total_token_count(),
            usage.prompt_token_count(),
            usage.response_token_count()
        );
    }

    for event in translate(message) {
        match &event {
            InboundEvent::Audio(chunk) => lock(stats).record_received(chunk.data().len()),
            InboundEvent::ToolCall(_) => lock(stats).record_tool_call(),
            _ => {}
        }
        if s_tx.send(event).is_err() {
            return false;
        }
    }
    true
}

/// Everything in `message` a session has to act on, in delivery order.
pub(crate) fn translate(message: &ServerMessage) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if let Some(content) = message.server_content() {
        for blob in content.audio() {
            let rate = blob.sample_rate().unwrap_or(OUTPUT_SAMPLE_RATE);
            match InboundChunk::from_base64(blob.data(), rate, 1) {
                Ok(chunk) => events.push(InboundEvent::Audio(chunk)),
                Err(e) => tracing::warn!("skipping undecodable audio part: {}", e),
            }
        }
        if content.interrupted() {
            tracing::debug!("model interrupted");
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete() {
            tracing::debug!("turn complete");
        }
    }

    if let Some(tool_call) = message.tool_call() {
        for call in tool_call.function_calls() {
            tracing::info!(id = call.id(), name = call.name(), "tool call");
            events.push(InboundEvent::ToolCall(ToolCallRequest {
                id: call.id().to_string(),
                name: call.name().to_string(),
                arguments: call.args().clone(),
            }));
        }
    }

    if let Some(cancellation) = message.tool_call_cancellation() {
        tracing::info!(ids = ?cancellation.ids(), "tool calls cancelled");
    }

    if let Some(go_away) = message.go_away() {
        tracing::warn!(time_left = go_away.time_left().unwrap_or("unknown"), "server is going away");
    }

    events
}

/// Opens a fresh [`Client`] per session.
pub struct GeminiConnector {
    config: Config,
    stats: SharedStats,
}

impl GeminiConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    /// Totals over every connection opened so far.
    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }
}

impl Default for GeminiConnector {
    fn default() -> Self {
        Self::new(Config::new())
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self, setup: &Setup) -> Result<Connection> {
        let (client, messages) = open(&self.config, setup, self.stats.clone()).await?;
        Ok(Connection {
            transport: Arc::new(client),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> ServerMessage {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn audio_parts_become_chunks_before_interruption() {
        let events = translate(&message(serde_json::json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAABAA=="}},
                    {"text": "thinking"},
                    {"inlineData": {"mimeType": "audio/pcm", "data": "AgA="}}
                ]},
                "interrupted": true
            }
        })));

        assert_eq!(events.len(), 3);
        let InboundEvent::Audio(first) = &events[0] else {
            panic!("expected audio, got {:?}", events[0]);
        };
        assert_eq!(first.data(), &[0, 0, 1, 0]);
        assert_eq!(first.sample_rate(), 24000);
        let InboundEvent::Audio(second) = &events[1] else {
            panic!("expected audio, got {:?}", events[1]);
        };
        assert_eq!(second.sample_rate(), OUTPUT_SAMPLE_RATE);
        assert_eq!(events[2], InboundEvent::Interrupted);
    }

    #[test]
    fn undecodable_audio_is_skipped() {
        let events = translate(&message(serde_json::json!({
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "***"}},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}
            ]}}
        })));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn function_calls_keep_their_ids() {
        let events = translate(&message(serde_json::json!({
            "toolCall": {"functionCalls": [
                {"id": "fc-1", "name": "get_live_data", "args": {}},
                {"id": "fc-2", "name": "get_live_data", "args": {"verbose": true}}
            ]}
        })));
        assert_eq!(
            events,
            vec![
                InboundEvent::ToolCall(ToolCallRequest {
                    id: "fc-1".to_string(),
                    name: "get_live_data".to_string(),
                    arguments: serde_json::json!({}),
                }),
                InboundEvent::ToolCall(ToolCallRequest {
                    id: "fc-2".to_string(),
                    name: "get_live_data".to_string(),
                    arguments: serde_json::json!({"verbose": true}),
                }),
            ]
        );
    }

    #[test]
    fn bookkeeping_messages_produce_no_events() {
        for json in [
            serde_json::json!({"setupComplete": {}}),
            serde_json::json!({"serverContent": {"turnComplete": true}}),
            serde_json::json!({"toolCallCancellation": {"ids": ["fc-1"]}}),
            serde_json::json!({"goAway": {"timeLeft": "10s"}}),
        ] {
            assert!(translate(&message(json)).is_empty());
        }
    }

    #[test]
    fn forwarding_updates_stats() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(Stats::new()));
        let keep_going = forward(
            &message(serde_json::json!({
                "serverContent": {"modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAABAA=="}}
                ]}},
                "usageMetadata": {"promptTokenCount": 10, "responseTokenCount": 5, "totalTokenCount": 15}
            })),
            &tx,
            &stats,
        );
        assert!(keep_going);
        assert!(matches!(rx.try_recv(), Ok(InboundEvent::Audio(_))));

        let stats = lock(&stats).clone();
        assert_eq!(stats.chunks_received(), 1);
        assert_eq!(stats.bytes_received(), 4);
        assert_eq!(stats.total_tokens(), 15);
        assert_eq!(stats.prompt_tokens(), 10);
        assert_eq!(stats.response_tokens(), 5);
    }

    #[test]
    fn forwarding_stops_once_the_session_is_gone() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let stats = Arc::new(Mutex::new(Stats::new()));
        let message = message(serde_json::json!({"serverContent": {"interrupted": true}}));
        assert!(!forward(&message, &tx, &stats));
    }

    #[tokio::test]
    async fn setup_complete_may_arrive_as_binary() {
        let mut read = futures_util::stream::iter(vec![
            Ok(Message::Ping(vec![])),
            Ok(Message::Binary(br#"{"usageMetadata":{}}"#.to_vec())),
            Ok(Message::Binary(br#"{"setupComplete":{}}"#.to_vec())),
        ]);
        assert!(wait_for_setup_complete(&mut read).await.is_ok());
    }

    #[tokio::test]
    async fn close_before_setup_complete_is_a_connection_error() {
        let mut read = futures_util::stream::iter(vec![Ok(Message::Close(None))]);
        assert!(matches!(
            wait_for_setup_complete(&mut read).await,
            Err(Error::Connection(_))
        ));

        let mut read = futures_util::stream::iter(Vec::<tungstenite::Result<Message>>::new());
        assert!(matches!(
            wait_for_setup_complete(&mut read).await,
            Err(Error::Connection(_))
        ));
    }

    /// A client whose outbound queue is already full and whose writer never
    /// finishes. `guard` resolves once the writer task is dropped.
    fn stuck_client() -> (Client, tokio::sync::oneshot::Receiver<()>) {
        let (c_tx, c_rx) = tokio::sync::mpsc::channel(1);
        c_tx.try_send(Message::Ping(vec![])).unwrap();
        let (guard_tx, guard) = tokio::sync::oneshot::channel::<()>();
        let send_handle = tokio::spawn(async move {
            let _held = (guard_tx, c_rx);
            std::future::pending::<()>().await;
        });
        let recv_handle = tokio::spawn(std::future::pending::<()>());
        let stats = Arc::new(Mutex::new(Stats::new()));
        (Client::new(c_tx, stats, send_handle, recv_handle), guard)
    }

    #[tokio::test]
    async fn tool_responses_fail_fast_on_a_full_queue() {
        let (client, _guard) = stuck_client();
        let response = ToolCallResponse {
            id: "fc-1".to_string(),
            name: "get_live_data".to_string(),
            result: serde_json::json!({"steps": 1}),
        };
        let sent = tokio::time::timeout(std::time::Duration::from_millis(100), client.send_tool_response(response))
            .await
            .expect("send_tool_response waited on the queue");
        assert!(matches!(sent, Err(Error::Send(_))));
    }

    #[tokio::test]
    async fn close_drops_a_writer_that_cannot_flush() {
        let (client, guard) = stuck_client();
        let closed = tokio::time::timeout(consts::CLOSE_FLUSH_TIMEOUT * 3, client.close())
            .await
            .expect("close waited on the writer");
        assert!(matches!(closed, Err(Error::Transport(_))));
        assert!(client.is_closed());
        // The writer was aborted, so its end of the guard is gone.
        assert!(guard.await.is_err());

        assert!(client.close().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let config = Config::builder()
            .with_base_url("ws://127.0.0.1:1/live")
            .with_api_key("test")
            .with_connect_timeout(std::time::Duration::from_secs(2))
            .build();
        let setup = Setup::new().build();
        assert!(matches!(
            connect_with_config(&config, &setup).await,
            Err(Error::Connection(_))
        ));
    }
}
