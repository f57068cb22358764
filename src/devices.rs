use async_trait::async_trait;

use crate::capture::{CaptureDevice, FrameTx};
use crate::error::Result;
use crate::playback::{OutputDevice, SourceEndedTx};

/// Opens the microphone and speaker for one session.
///
/// Both calls may suspend while the platform brings the device up. A
/// returned device is held until its `release`/`close` is called or it is
/// dropped.
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// The device pushes mono frames of `frame_size` samples at 16 kHz
    /// into `frames`, once started.
    async fn open_capture(&self, frame_size: usize, frames: FrameTx) -> Result<Box<dyn CaptureDevice>>;

    /// The device reports every finished source on `ended`.
    async fn open_output(&self, ended: SourceEndedTx) -> Result<Box<dyn OutputDevice>>;
}
