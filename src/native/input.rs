use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleFormat;
use gemini_live_utils::audio;
use gemini_live_utils::device;

use crate::capture::{CaptureDevice, FrameTx, InputPipeline};
use crate::error::{DeviceKind, Error, Result};
use crate::native::StreamThread;

/// The microphone. The stream runs from `open`, but frames are only
/// forwarded between `start` and `release`.
pub struct NativeCapture {
    started: Arc<AtomicBool>,
    thread: StreamThread,
}

impl NativeCapture {
    pub(crate) async fn open(device_name: Option<String>, frame_size: usize, frames: FrameTx) -> Result<Self> {
        let started = Arc::new(AtomicBool::new(false));
        let gate = started.clone();
        let (thread, ()) = StreamThread::spawn(DeviceKind::Input, move || {
            build_stream(device_name.as_deref(), frame_size, frames, gate)
        })
        .await?;
        Ok(Self { started, thread })
    }
}

impl CaptureDevice for NativeCapture {
    fn start(&mut self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.thread.stop();
        Ok(())
    }
}

fn acquisition(reason: impl std::fmt::Display) -> Error {
    Error::acquisition(DeviceKind::Input, reason)
}

fn build_stream(
    device_name: Option<&str>,
    frame_size: usize,
    frames: FrameTx,
    gate: Arc<AtomicBool>,
) -> Result<(cpal::Stream, ())> {
    let input = device::get_or_default_input(device_name).map_err(acquisition)?;
    let name = input.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = input.default_input_config().map_err(acquisition)?;
    let config = supported.config();

    let mut pipeline =
        InputPipeline::new(config.channels as usize, config.sample_rate.0, frame_size, frames).map_err(acquisition)?;
    let err_fn = |err: cpal::StreamError| tracing::error!("an error occurred on input stream: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => input.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if gate.load(Ordering::Relaxed) {
                    pipeline.process(data);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => input.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if gate.load(Ordering::Relaxed) {
                    pipeline.process(&audio::convert_i16_to_f32(data));
                }
            },
            err_fn,
            None,
        ),
        other => return Err(acquisition(format!("unsupported sample format {:?}", other))),
    }
    .map_err(acquisition)?;
    stream.play().map_err(acquisition)?;

    tracing::info!(
        device = %name,
        channels = config.channels,
        sample_rate = config.sample_rate.0,
        "microphone opened"
    );
    Ok((stream, ()))
}
