//! One live voice session, end to end.
//!
//! [`SessionController::open`] acquires the microphone and speaker, connects
//! the transport and then runs two tasks:
//!
//! * capture-to-send: frames from the microphone are encoded and sent in
//!   capture order. A failed send drops that frame only.
//! * receive-to-playback: the single owner of all session state. It decodes
//!   inbound audio into the [`PlaybackScheduler`], answers tool calls,
//!   handles barge-in and tears everything down when the session ends.
//!
//! [`SessionHandle::close`] is the one cancellation entry point.

use std::sync::Arc;
use std::time::Duration;

use gemini_live_types::audio::Voice;
use gemini_live_types::Setup;
use gemini_live_utils::audio::{self, InboundChunk};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::capture::{CaptureSource, FrameRx, CAPTURE_FRAME_SIZE};
use crate::devices::AudioDevices;
use crate::error::{DeviceKind, Error, Result};
use crate::playback::{PlaybackScheduler, SourceEndedRx};
use crate::tools::{LiveSnapshotProvider, ToolCallDispatcher, ToolCallRequest};
use crate::transport::{Connection, Connector, InboundEvent, InboundRx, Transport};

pub const DEFAULT_INSTRUCTIONS: &str = "
You are the SmartFridge AI Voice Assistant.
You have access to a tool 'get_live_data' to see the user's current health stats and fridge items.
Always call this tool if the user asks \"how many steps\", \"how many calories\", or \"what is in my fridge\".
Be motivating, concise, and helpful.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Nothing queued on the speaker.
    Listening,
    /// Engine audio is playing.
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active(Activity),
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Samples per captured frame.
    pub frame_size: usize,
    /// Frames buffered between the microphone and the sender.
    pub frame_capacity: usize,
    /// Upper bound on waiting for the transport to close during teardown.
    pub close_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            frame_size: CAPTURE_FRAME_SIZE,
            frame_capacity: 32,
            close_timeout: Duration::from_secs(2),
        }
    }
}

pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Opens sessions. Every call to [`SessionController::open`] creates a new,
/// independent session.
pub struct SessionController {
    connector: Arc<dyn Connector>,
    devices: Arc<dyn AudioDevices>,
    provider: Arc<dyn LiveSnapshotProvider>,
    setup: Setup,
    options: SessionOptions,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
        provider: Arc<dyn LiveSnapshotProvider>,
    ) -> Self {
        Self {
            connector,
            devices,
            provider,
            setup: default_setup(),
            options: SessionOptions::default(),
        }
    }

    pub fn with_setup(mut self, setup: Setup) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Acquires both devices, connects, and starts streaming.
    ///
    /// Errors here leave no device held. Errors after the session is up are
    /// reported through `on_error`.
    pub async fn open<F>(&self, on_error: F) -> Result<SessionHandle>
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        state_tx.send_replace(SessionState::Connecting);
        tracing::info!("opening live session");

        let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(self.options.frame_capacity);
        let capture = match self.devices.open_capture(self.options.frame_size, frame_tx).await {
            Ok(device) => CaptureSource::new(device, frame_rx),
            Err(e) => return Err(fail(&state_tx, e)),
        };

        let (ended_tx, ended_rx) = tokio::sync::mpsc::unbounded_channel();
        let playback = match self.devices.open_output(ended_tx).await {
            Ok(device) => PlaybackScheduler::new(device),
            Err(e) => {
                drop(capture);
                return Err(fail(&state_tx, e));
            }
        };

        let Connection {
            transport,
            messages,
        } = match self.connector.connect(&self.setup).await {
            Ok(connection) => connection,
            Err(e) => {
                drop(capture);
                drop(playback);
                return Err(fail(&state_tx, e));
            }
        };

        let mut runner = SessionRunner {
            state: state_tx,
            capture,
            playback,
            dispatcher: ToolCallDispatcher::new(self.provider.clone()),
            transport,
            messages,
            ended: ended_rx,
            sender: None,
            responders: JoinSet::new(),
            close_timeout: self.options.close_timeout,
        };

        let started = runner.capture.start().and_then(|frames| {
            frames.ok_or_else(|| Error::acquisition(DeviceKind::Input, "capture already started"))
        });
        let frames = match started {
            Ok(frames) => frames,
            Err(e) => {
                runner.teardown().await;
                return Err(fail(&runner.state, e));
            }
        };
        runner.sender = Some(tokio::spawn(send_frames(frames, runner.transport.clone())));
        runner.state.send_replace(SessionState::Active(Activity::Listening));
        tracing::info!("live session active");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let on_error: ErrorCallback = Arc::new(on_error);
        let task = tokio::spawn(runner.run(cancel_rx, on_error));

        Ok(SessionHandle {
            state: state_rx,
            cancel: cancel_tx,
            task: Mutex::new(Some(task)),
        })
    }
}

/// The setup used unless [`SessionController::with_setup`] overrides it.
pub fn default_setup() -> Setup {
    Setup::new()
        .with_voice(Voice::Zephyr)
        .with_instructions(DEFAULT_INSTRUCTIONS)
        .with_tools(ToolCallDispatcher::tools())
        .build()
}

fn fail(state: &watch::Sender<SessionState>, error: Error) -> Error {
    tracing::error!("failed to open live session: {}", error);
    state.send_replace(SessionState::Failed);
    error
}

/// Capture-to-send loop. Ends when the microphone goes away.
async fn send_frames(mut frames: FrameRx, transport: Arc<dyn Transport>) {
    while let Some(frame) = frames.recv().await {
        let chunk = match audio::encode(&frame) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("dropping capture frame: {}", Error::Encode(e));
                continue;
            }
        };
        if let Err(e) = transport.send_audio(chunk).await {
            tracing::debug!("dropping capture frame: {}", e);
        }
    }
    tracing::debug!("capture stream ended");
}

enum Outcome {
    Closed,
    Failed(Error),
}

struct SessionRunner {
    state: watch::Sender<SessionState>,
    capture: CaptureSource,
    playback: PlaybackScheduler,
    dispatcher: ToolCallDispatcher,
    transport: Arc<dyn Transport>,
    messages: InboundRx,
    ended: SourceEndedRx,
    sender: Option<JoinHandle<()>>,
    /// In-flight tool responses. The loop never waits on the transport.
    responders: JoinSet<()>,
    close_timeout: Duration,
}

impl SessionRunner {
    async fn run(mut self, mut cancel: watch::Receiver<bool>, on_error: ErrorCallback) {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    tracing::info!("live session closed by caller");
                    break Outcome::Closed;
                }
                event = self.messages.recv() => match event {
                    Some(InboundEvent::ToolCall(request)) => self.handle_tool_call(request),
                    Some(InboundEvent::Audio(chunk)) => self.handle_audio(chunk),
                    Some(InboundEvent::Interrupted) => self.playback.interrupt(),
                    Some(InboundEvent::Closed) | None => {
                        tracing::info!("live session closed by remote");
                        break Outcome::Closed;
                    }
                    Some(InboundEvent::Error(reason)) => {
                        break Outcome::Failed(Error::Transport(reason));
                    }
                },
                Some(id) = self.ended.recv() => self.playback.source_ended(id),
                Some(_) = self.responders.join_next(), if !self.responders.is_empty() => {}
            }
            self.publish_activity();
        };

        match outcome {
            Outcome::Closed => {
                self.state.send_replace(SessionState::Closing);
                self.teardown().await;
                self.state.send_replace(SessionState::Closed);
                tracing::info!("live session closed");
            }
            Outcome::Failed(error) => {
                tracing::error!("live session failed: {}", error);
                self.state.send_replace(SessionState::Failed);
                self.teardown().await;
                on_error(error);
            }
        }
    }

    fn handle_tool_call(&mut self, request: ToolCallRequest) {
        let Some(response) = self.dispatcher.dispatch(&request) else {
            return;
        };
        let transport = self.transport.clone();
        self.responders.spawn(async move {
            if let Err(e) = transport.send_tool_response(response).await {
                tracing::warn!(id = %request.id, "failed to send tool response: {}", e);
            }
        });
    }

    fn handle_audio(&mut self, chunk: InboundChunk) {
        let Some((rate, channels)) = self.playback.output_format() else {
            return;
        };
        let buffer = match audio::decode(&chunk, rate, channels) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("dropping inbound chunk: {}", Error::Decode(e));
                return;
            }
        };
        if let Err(e) = self.playback.schedule(buffer) {
            tracing::warn!("dropping inbound chunk: {}", e);
        }
    }

    fn publish_activity(&self) {
        let activity = if self.playback.is_speaking() {
            Activity::Speaking
        } else {
            Activity::Listening
        };
        self.state.send_if_modified(|state| match state {
            SessionState::Active(current) if *current != activity => {
                *current = activity;
                true
            }
            _ => false,
        });
    }

    /// Releases everything. Each step runs regardless of earlier failures and
    /// the devices go first so a stuck transport cannot keep them open.
    async fn teardown(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }
        self.responders.abort_all();
        self.capture.stop();
        self.playback.interrupt();
        self.playback.shutdown();
        match tokio::time::timeout(self.close_timeout, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("failed to close transport: {}", e),
            Err(_) => tracing::warn!("timed out closing transport"),
        }
        self.messages.close();
    }
}

/// Caller-side control of one open session.
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == SessionState::Active(Activity::Speaking)
    }

    /// Watch state transitions, including Speaking/Listening changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the session has ended on its own or been closed and its
    /// teardown has finished.
    pub async fn closed(&self) -> SessionState {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
        self.join().await;
        self.state()
    }

    /// Ends the session and waits for teardown. Further calls are no-ops.
    pub async fn close(&self) {
        self.cancel.send_replace(true);
        self.join().await;
    }

    async fn join(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                tracing::warn!("session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}
