use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleFormat;
use gemini_live_utils::audio::DecodedBuffer;
use gemini_live_utils::device;

use crate::error::{DeviceKind, Error, Result};
use crate::native::StreamThread;
use crate::playback::{OutputDevice, SourceEndedTx, SourceId};

struct Source {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Mixes scheduled buffers onto a frame clock advanced by the output
/// callback.
pub(crate) struct Timeline {
    sample_rate: u32,
    channels: usize,
    frames_rendered: u64,
    sources: Vec<Source>,
    ended: SourceEndedTx,
}

impl Timeline {
    pub fn new(sample_rate: u32, channels: u16, ended: SourceEndedTx) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1) as usize,
            frames_rendered: 0,
            sources: Vec::new(),
            ended,
        }
    }

    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Buffers starting in the past start at the next rendered frame.
    pub fn schedule(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) -> Result<()> {
        if buffer.channels() as usize != self.channels || buffer.sample_rate() != self.sample_rate {
            return Err(Error::PlaybackStart(format!(
                "buffer is {}ch@{}hz, device is {}ch@{}hz",
                buffer.channels(),
                buffer.sample_rate(),
                self.channels,
                self.sample_rate
            )));
        }
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.sources.push(Source {
            id,
            start_frame: start_frame.max(self.frames_rendered),
            samples: buffer.into_samples(),
        });
        Ok(())
    }

    /// Stopped sources are not reported as ended.
    pub fn stop(&mut self, id: SourceId) {
        self.sources.retain(|source| source.id != id);
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Fills one interleaved callback buffer and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let channels = self.channels;
        let start = self.frames_rendered;
        let end = start + (out.len() / channels) as u64;
        let ended = &self.ended;

        self.sources.retain(|source| {
            let source_end = source.start_frame + (source.samples.len() / channels) as u64;
            let from = source.start_frame.max(start);
            let to = source_end.min(end);
            for frame in from..to {
                let o = (frame - start) as usize * channels;
                let s = (frame - source.start_frame) as usize * channels;
                for c in 0..channels {
                    out[o + c] += source.samples[s + c];
                }
            }
            if source_end <= end {
                let _ = ended.send(source.id);
                false
            } else {
                true
            }
        });

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.frames_rendered = end;
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The speaker, playing at its default rate and channel count.
pub struct NativeOutput {
    sample_rate: u32,
    channels: u16,
    timeline: Arc<Mutex<Timeline>>,
    thread: StreamThread,
}

impl NativeOutput {
    pub(crate) async fn open(device_name: Option<String>, ended: SourceEndedTx) -> Result<Self> {
        let (thread, (sample_rate, channels, timeline)) =
            StreamThread::spawn(DeviceKind::Output, move || build_stream(device_name.as_deref(), ended)).await?;
        Ok(Self {
            sample_rate,
            channels,
            timeline,
            thread,
        })
    }
}

impl OutputDevice for NativeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_time(&self) -> f64 {
        lock(&self.timeline).now()
    }

    fn schedule(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) -> Result<()> {
        lock(&self.timeline).schedule(id, buffer, start_at)
    }

    fn stop(&mut self, id: SourceId) -> Result<()> {
        lock(&self.timeline).stop(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.timeline).clear();
        self.thread.stop();
        Ok(())
    }
}

fn acquisition(reason: impl std::fmt::Display) -> Error {
    Error::acquisition(DeviceKind::Output, reason)
}

type Opened = (u32, u16, Arc<Mutex<Timeline>>);

fn build_stream(device_name: Option<&str>, ended: SourceEndedTx) -> Result<(cpal::Stream, Opened)> {
    let output = device::get_or_default_output(device_name).map_err(acquisition)?;
    let name = output.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = output.default_output_config().map_err(acquisition)?;
    let config = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate, channels, ended)));
    let mixer = timeline.clone();
    let err_fn = |err: cpal::StreamError| tracing::error!("an error occurred on output stream: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => output.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| lock(&mixer).render(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            output.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    lock(&mixer).render(&mut scratch);
                    for (sample, value) in data.iter_mut().zip(scratch.iter()) {
                        *sample = (value * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => return Err(acquisition(format!("unsupported sample format {:?}", other))),
    }
    .map_err(acquisition)?;
    stream.play().map_err(acquisition)?;

    tracing::info!(device = %name, channels, sample_rate, "speaker opened");
    Ok((stream, (sample_rate, channels, timeline)))
}
