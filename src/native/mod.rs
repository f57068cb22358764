//! Microphone and speaker through cpal.
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as the device is held.

use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;

use crate::capture::{CaptureDevice, FrameTx};
use crate::devices::AudioDevices;
use crate::error::{DeviceKind, Error, Result};
use crate::playback::{OutputDevice, SourceEndedTx};

mod input;
mod output;

pub use input::NativeCapture;
pub use output::NativeOutput;

/// The host's audio devices, by name or the platform default.
#[derive(Debug, Clone, Default)]
pub struct NativeAudio {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl NativeAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_device(mut self, name: &str) -> Self {
        self.input_device = Some(name.to_string());
        self
    }

    pub fn with_output_device(mut self, name: &str) -> Self {
        self.output_device = Some(name.to_string());
        self
    }
}

#[async_trait]
impl AudioDevices for NativeAudio {
    async fn open_capture(&self, frame_size: usize, frames: FrameTx) -> Result<Box<dyn CaptureDevice>> {
        let capture = NativeCapture::open(self.input_device.clone(), frame_size, frames).await?;
        Ok(Box::new(capture))
    }

    async fn open_output(&self, ended: SourceEndedTx) -> Result<Box<dyn OutputDevice>> {
        let output = NativeOutput::open(self.output_device.clone(), ended).await?;
        Ok(Box::new(output))
    }
}

/// Keeps one cpal stream alive on a dedicated thread until stopped.
struct StreamThread {
    kind: DeviceKind,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Runs `build` on a new thread and waits until the stream is up.
    async fn spawn<T, F>(kind: DeviceKind, build: F) -> Result<(Self, T)>
    where
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
        T: Send + 'static,
    {
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name(format!("gemini-live-{}", kind))
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, value)) => {
                        if ready_tx.send(Ok(value)).is_err() {
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on stop or when the owner goes away.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::acquisition(kind, e))?;

        let mut stream_thread = Self {
            kind,
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        match ready_rx.await {
            Ok(Ok(value)) => Ok((stream_thread, value)),
            Ok(Err(e)) => {
                stream_thread.stop();
                Err(e)
            }
            Err(_) => {
                stream_thread.stop();
                Err(Error::acquisition(kind, "audio thread exited before the stream was ready"))
            }
        }
    }

    fn stop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("{} audio thread panicked", self.kind);
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}
