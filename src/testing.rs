//! Fake devices and transport for exercising sessions without hardware or
//! network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gemini_live_types::Setup;
use gemini_live_utils::audio::{DecodedBuffer, OutboundChunk};

use crate::capture::{CaptureDevice, FrameTx};
use crate::devices::AudioDevices;
use crate::error::{DeviceKind, Error, Result};
use crate::playback::{OutputDevice, SourceEndedTx, SourceId};
use crate::tools::ToolCallResponse;
use crate::transport::{Connection, Connector, InboundEvent, InboundTx, Transport};

#[derive(Default)]
struct Counters {
    capture_opened: AtomicUsize,
    capture_started: AtomicUsize,
    capture_released: AtomicUsize,
    output_opened: AtomicUsize,
    output_released: AtomicUsize,
}

#[derive(Clone, Default)]
pub(crate) struct DeviceCounters {
    inner: Arc<Counters>,
}

impl DeviceCounters {
    pub fn capture_opened(&self) -> usize {
        self.inner.capture_opened.load(Ordering::SeqCst)
    }

    pub fn capture_started(&self) -> usize {
        self.inner.capture_started.load(Ordering::SeqCst)
    }

    pub fn capture_released(&self) -> usize {
        self.inner.capture_released.load(Ordering::SeqCst)
    }

    pub fn output_opened(&self) -> usize {
        self.inner.output_opened.load(Ordering::SeqCst)
    }

    pub fn output_released(&self) -> usize {
        self.inner.output_released.load(Ordering::SeqCst)
    }

    /// Devices currently open.
    pub fn held(&self) -> usize {
        self.capture_opened() + self.output_opened() - self.capture_released() - self.output_released()
    }
}

pub(crate) struct FakeCapture {
    counters: DeviceCounters,
    frames: Option<FrameTx>,
}

impl FakeCapture {
    pub fn new(counters: DeviceCounters) -> Self {
        counters.inner.capture_opened.fetch_add(1, Ordering::SeqCst);
        Self {
            counters,
            frames: None,
        }
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&mut self) -> Result<()> {
        self.counters.inner.capture_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.frames = None;
        self.counters.inner.capture_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct OutputState {
    now: f64,
    scheduled: Vec<(SourceId, f64, f64)>,
    stopped: Vec<SourceId>,
    refuse_next: bool,
    closed: bool,
}

/// Output device with a hand-driven clock.
#[derive(Clone)]
pub(crate) struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
    counters: DeviceCounters,
    ended: SourceEndedTx,
}

impl FakeOutput {
    pub const SAMPLE_RATE: u32 = 24000;

    pub fn new(counters: DeviceCounters, ended: SourceEndedTx) -> Self {
        counters.inner.output_opened.fetch_add(1, Ordering::SeqCst);
        Self {
            state: Arc::new(Mutex::new(OutputState::default())),
            counters,
            ended,
        }
    }

    pub fn set_time(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    pub fn refuse_next(&self) {
        self.state.lock().unwrap().refuse_next = true;
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// `(id, start_at, duration)` of every accepted buffer.
    pub fn scheduled(&self) -> Vec<(SourceId, f64, f64)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    /// Plays the clock forward to `now`, reporting every source that ended.
    pub fn advance_to(&self, now: f64) {
        let mut state = self.state.lock().unwrap();
        state.now = now;
        let stopped = state.stopped.clone();
        for (id, start, duration) in state.scheduled.iter() {
            if start + duration <= now + 1e-9 && !stopped.contains(id) {
                let _ = self.ended.send(*id);
            }
        }
        state.scheduled.retain(|(_, start, duration)| start + duration > now + 1e-9);
    }
}

impl OutputDevice for FakeOutput {
    fn sample_rate(&self) -> u32 {
        Self::SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        1
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::PlaybackStart("device closed".to_string()));
        }
        if state.refuse_next {
            state.refuse_next = false;
            return Err(Error::PlaybackStart("refused".to_string()));
        }
        state.scheduled.push((id, start_at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) -> Result<()> {
        self.state.lock().unwrap().stopped.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        self.counters.inner.output_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeDevices {
    pub counters: DeviceCounters,
    pub fail_capture: bool,
    pub fail_output: bool,
    pub(crate) frames: Arc<Mutex<Option<FrameTx>>>,
    pub(crate) output: Arc<Mutex<Option<FakeOutput>>>,
}

impl FakeDevices {
    /// Sender feeding the opened microphone's frame channel.
    pub fn frames(&self) -> FrameTx {
        self.frames.lock().unwrap().clone().expect("capture not opened")
    }

    pub fn output(&self) -> FakeOutput {
        self.output.lock().unwrap().clone().expect("output not opened")
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn open_capture(&self, _frame_size: usize, frames: FrameTx) -> Result<Box<dyn CaptureDevice>> {
        if self.fail_capture {
            return Err(Error::acquisition(DeviceKind::Input, "microphone busy"));
        }
        *self.frames.lock().unwrap() = Some(frames.clone());
        let mut capture = FakeCapture::new(self.counters.clone());
        capture.frames = Some(frames);
        Ok(Box::new(capture))
    }

    async fn open_output(&self, ended: SourceEndedTx) -> Result<Box<dyn OutputDevice>> {
        if self.fail_output {
            return Err(Error::acquisition(DeviceKind::Output, "no speaker"));
        }
        let output = FakeOutput::new(self.counters.clone(), ended);
        *self.output.lock().unwrap() = Some(output.clone());
        Ok(Box::new(output))
    }
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub audio: Mutex<Vec<OutboundChunk>>,
    pub responses: Mutex<Vec<ToolCallResponse>>,
    pub send_attempts: AtomicUsize,
    pub response_attempts: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub fail_sends: AtomicBool,
    pub fail_close: bool,
    /// Tool responses never complete.
    pub stall_tool_responses: bool,
    /// `close` never completes.
    pub stall_close: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_audio(&self, chunk: OutboundChunk) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Send("link down".to_string()));
        }
        self.audio.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn send_tool_response(&self, response: ToolCallResponse) -> Result<()> {
        self.response_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall_tool_responses {
            std::future::pending::<()>().await;
        }
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        if self.fail_close {
            return Err(Error::Transport("close failed".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    pub fail: bool,
    pub transport: Arc<FakeTransport>,
    pub(crate) inbound: Arc<Mutex<Option<InboundTx>>>,
    pub(crate) setups: Arc<Mutex<Vec<Setup>>>,
}

impl FakeConnector {
    pub fn with_transport(transport: FakeTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            ..Default::default()
        }
    }

    /// Pushes an event into the open connection.
    pub fn push(&self, event: InboundEvent) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn setups(&self) -> Vec<Setup> {
        self.setups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, setup: &Setup) -> Result<Connection> {
        if self.fail {
            return Err(Error::Connection("engine unreachable".to_string()));
        }
        self.setups.lock().unwrap().push(setup.clone());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        *self.inbound.lock().unwrap() = Some(tx);
        Ok(Connection {
            transport: self.transport.clone(),
            messages: rx,
        })
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition not reached in time");
}
