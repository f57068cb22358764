mod consts;

pub use consts::*;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Inline media payload, used for both realtime input and model audio.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. "audio/pcm;rate=16000"
    mime_type: String,

    /// Base64 encoded bytes
    data: Base64EncodedAudioBytes,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: Base64EncodedAudioBytes) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Raw 16-bit little-endian PCM at `sample_rate`.
    pub fn pcm(sample_rate: u32, data: Base64EncodedAudioBytes) -> Self {
        Self::new(pcm_mime_type(sample_rate), data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// The `rate=` parameter of the mime type, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        parse_rate(&self.mime_type)
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_TYPE, sample_rate)
}

fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}
