use std::fmt;

use gemini_live_utils::audio::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Input => f.write_str("input"),
            DeviceKind::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device could not be opened. Fatal to the open attempt.
    #[error("failed to acquire {device} device: {reason}")]
    Acquisition { device: DeviceKind, reason: String },

    /// The engine is unreachable or rejected the setup.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("failed to encode capture frame: {0}")]
    Encode(#[source] CodecError),

    #[error("failed to decode inbound audio: {0}")]
    Decode(#[source] CodecError),

    /// The output device refused a buffer.
    #[error("playback could not start: {0}")]
    PlaybackStart(String),

    #[error("failed to send: {0}")]
    Send(String),

    /// The inbound stream reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    pub fn acquisition(device: DeviceKind, reason: impl fmt::Display) -> Self {
        Error::Acquisition {
            device,
            reason: reason.to_string(),
        }
    }

    /// Whether the session keeps running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Encode(_) | Error::Decode(_) | Error::PlaybackStart(_) | Error::Send(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
