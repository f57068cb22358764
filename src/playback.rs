use std::collections::BTreeMap;

use gemini_live_utils::audio::DecodedBuffer;

use crate::error::{Error, Result};

pub type SourceId = u64;

pub type SourceEndedTx = tokio::sync::mpsc::UnboundedSender<SourceId>;
pub type SourceEndedRx = tokio::sync::mpsc::UnboundedReceiver<SourceId>;

/// An opened speaker with its own clock.
pub trait OutputDevice: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Seconds elapsed on the device clock.
    fn current_time(&self) -> f64;

    /// Enqueue `buffer` to start at `start_at` on the device clock. When it
    /// finishes playing, `id` is reported on the device's ended channel.
    fn schedule(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) -> Result<()>;

    /// Silence one source immediately.
    fn stop(&mut self, id: SourceId) -> Result<()>;

    /// Release the device.
    fn close(&mut self) -> Result<()>;
}

/// One buffer enqueued on the output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Plays decoded buffers back to back against the device clock.
///
/// Each buffer starts at `max(next_playback_time, now)` and pushes
/// `next_playback_time` forward by its duration, so bursts of buffers line
/// up without gaps or overlaps while a late buffer never starts in the past.
pub struct PlaybackScheduler {
    device: Option<Box<dyn OutputDevice>>,
    next_playback_time: f64,
    active: BTreeMap<SourceId, ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device: Some(device),
            next_playback_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Rate and channel count buffers must be decoded to.
    pub fn output_format(&self) -> Option<(u32, u16)> {
        self.device
            .as_ref()
            .map(|device| (device.sample_rate(), device.channels()))
    }

    pub fn schedule(&mut self, buffer: DecodedBuffer) -> Result<ScheduledSource> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| Error::PlaybackStart("output device is closed".to_string()))?;

        let start_at = self.next_playback_time.max(device.current_time());
        let duration = buffer.duration();
        let id = self.next_id;
        self.next_id += 1;

        device.schedule(id, buffer, start_at)?;

        let source = ScheduledSource {
            id,
            start_at,
            duration,
        };
        self.next_playback_time = source.end_at();
        self.active.insert(id, source);
        tracing::debug!(id, start_at, duration, "scheduled audio");
        Ok(source)
    }

    /// Completion callback: forget a source the device finished playing.
    pub fn source_ended(&mut self, id: SourceId) {
        if self.active.remove(&id).is_some() && self.active.is_empty() {
            tracing::debug!("playback drained");
        }
    }

    /// Barge-in: silence everything now and drop the backlog.
    pub fn interrupt(&mut self) {
        if let Some(device) = self.device.as_mut() {
            for id in self.active.keys() {
                if let Err(e) = device.stop(*id) {
                    tracing::debug!(id, "failed to stop source: {}", e);
                }
            }
        }
        if !self.active.is_empty() {
            tracing::info!(sources = self.active.len(), "playback interrupted");
        }
        self.active.clear();
        // The device clock is picked up again by the next buffer.
        self.next_playback_time = 0.0;
    }

    /// Stops playback and releases the device. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                tracing::warn!("failed to close output device: {}", e);
            } else {
                tracing::debug!("output device released");
            }
        }
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.active.values()
    }

    pub fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
