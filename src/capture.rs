use gemini_live_utils::audio::{self, CodecError, CAPTURE_SAMPLE_RATE, RESAMPLE_CHUNK_SIZE};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use rubato::{FastFixedIn, Resampler};
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;

/// Samples per captured frame.
pub const CAPTURE_FRAME_SIZE: usize = 4096;

pub type FrameTx = tokio::sync::mpsc::Sender<Vec<f32>>;
pub type FrameRx = tokio::sync::mpsc::Receiver<Vec<f32>>;

/// An opened microphone.
pub trait CaptureDevice: Send {
    /// Begin delivering frames.
    fn start(&mut self) -> Result<()>;

    /// Stop delivering frames and give the device back to the platform.
    fn release(&mut self) -> Result<()>;
}

/// Owns the microphone for one session. Frames are pushed by the device
/// into a channel; [`CaptureSource::start`] hands out the receiving end.
pub struct CaptureSource {
    device: Option<Box<dyn CaptureDevice>>,
    frames: Option<FrameRx>,
}

impl CaptureSource {
    pub fn new(device: Box<dyn CaptureDevice>, frames: FrameRx) -> Self {
        Self {
            device: Some(device),
            frames: Some(frames),
        }
    }

    /// Starts the device and returns the frame stream. Only the first call
    /// yields a receiver.
    pub fn start(&mut self) -> Result<Option<FrameRx>> {
        let Some(frames) = self.frames.take() else {
            return Ok(None);
        };
        if let Some(device) = self.device.as_mut() {
            device.start()?;
            tracing::debug!("capture started");
        }
        Ok(Some(frames))
    }

    /// Releases the device. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.release() {
                tracing::warn!("failed to release capture device: {}", e);
            } else {
                tracing::debug!("capture device released");
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cuts a continuous sample stream into fixed-size frames.
pub struct Framer {
    buffer: HeapRb<f32>,
    frame_size: usize,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            buffer: HeapRb::new(frame_size.max(1) * 2),
            frame_size: frame_size.max(1),
        }
    }

    /// Buffers `samples` and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        loop {
            let pushed = self.buffer.push_slice(rest);
            rest = &rest[pushed..];
            while self.buffer.occupied_len() >= self.frame_size {
                let mut frame = vec![0.0; self.frame_size];
                self.buffer.pop_slice(&mut frame);
                frames.push(frame);
            }
            if rest.is_empty() {
                break;
            }
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.buffer.occupied_len()
    }
}

/// Turns raw device callbacks (any rate, any channel count) into 16 kHz
/// mono frames on the frame channel. Runs on the audio thread.
pub struct InputPipeline {
    channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    framer: Framer,
    frames: FrameTx,
}

impl InputPipeline {
    pub fn new(
        channels: usize,
        sample_rate: u32,
        frame_size: usize,
        frames: FrameTx,
    ) -> Result<Self, CodecError> {
        let resampler = if sample_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(audio::create_resampler(
                sample_rate as f64,
                CAPTURE_SAMPLE_RATE as f64,
                RESAMPLE_CHUNK_SIZE,
                1,
            )?)
        };
        Ok(Self {
            channels: channels.max(1),
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK_SIZE * 2),
            framer: Framer::new(frame_size),
            frames,
        })
    }

    pub fn process(&mut self, data: &[f32]) {
        let mono = audio::downmix_to_mono(data, self.channels);
        let samples = match self.resampler.as_mut() {
            None => mono,
            Some(resampler) => {
                self.pending.extend_from_slice(&mono);
                let mut resampled = Vec::new();
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(out) => {
                            if let Some(out) = out.first() {
                                resampled.extend_from_slice(out);
                            }
                        }
                        Err(e) => tracing::warn!("failed to resample capture audio: {}", e),
                    }
                }
                resampled
            }
        };

        for frame in self.framer.push(&samples) {
            match self.frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => tracing::warn!("capture frame dropped, sender is behind"),
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
}
