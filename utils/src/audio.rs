use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Rate of every captured frame sent to the engine.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Input frames per resampler pass.
pub const RESAMPLE_CHUNK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot encode an empty frame")]
    EmptyFrame,
    #[error("audio payload is empty")]
    EmptyPayload,
    #[error("PCM16 payload has an odd length of {0} bytes")]
    OddLength(usize),
    #[error("{samples} samples do not split into {channels} channels")]
    PartialFrame { samples: usize, channels: u16 },
    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// A captured frame after encoding: mono 16-bit little-endian PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundChunk {
    data: Vec<u8>,
    sample_rate: u32,
}

impl OutboundChunk {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        1
    }

    pub fn to_base64(&self) -> String {
        encode_base64(&self.data)
    }
}

/// Audio received from the engine, still in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundChunk {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

impl InboundChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    pub fn from_base64(fragment: &str, sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        Ok(Self::new(decode_base64(fragment)?, sample_rate, channels))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Interleaved f32 samples ready for an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Silence of the given length, handy for clocks and tests.
    pub fn silence(duration: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Encodes a mono capture frame (samples in [-1, 1]) to 16-bit PCM.
pub fn encode(frame: &[f32]) -> Result<OutboundChunk, CodecError> {
    if frame.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    Ok(OutboundChunk {
        data: frame.to_binary(),
        sample_rate: CAPTURE_SAMPLE_RATE,
    })
}

/// Decodes a PCM16 chunk into a buffer at the target rate and channel count.
pub fn decode(
    chunk: &InboundChunk,
    target_rate: u32,
    target_channels: u16,
) -> Result<DecodedBuffer, CodecError> {
    let data = chunk.data();
    if data.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    if data.len() % 2 != 0 {
        return Err(CodecError::OddLength(data.len()));
    }
    if chunk.channels() == 0 {
        return Err(CodecError::InvalidChannels(chunk.channels()));
    }
    if target_channels == 0 {
        return Err(CodecError::InvalidChannels(target_channels));
    }
    if chunk.sample_rate() == 0 {
        return Err(CodecError::InvalidSampleRate(chunk.sample_rate()));
    }
    if target_rate == 0 {
        return Err(CodecError::InvalidSampleRate(target_rate));
    }

    let samples = convert_i16_to_f32(&pcm16_from_bytes(data));
    let planes = deinterleave(&samples, chunk.channels())?;
    let planes = resample(&planes, chunk.sample_rate(), target_rate)?;
    let planes = remap_channels(planes, target_channels);

    Ok(DecodedBuffer::new(interleave(&planes), target_rate, target_channels))
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
    channels: usize,
) -> Result<FastFixedIn<f32>, CodecError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        channels,
    )
    .map_err(|e| CodecError::Resample(e.to_string()))
}

/// Resamples whole planes, compensating for the resampler's delay so the
/// output holds exactly `len * to / from` frames.
pub fn resample(planes: &[Vec<f32>], from: u32, to: u32) -> Result<Vec<Vec<f32>>, CodecError> {
    if from == to || planes.is_empty() {
        return Ok(planes.to_vec());
    }

    let frames = planes[0].len();
    let expected = (frames as f64 * to as f64 / from as f64).round() as usize;
    let mut resampler = create_resampler(from as f64, to as f64, RESAMPLE_CHUNK_SIZE, planes.len())?;
    let delay = resampler.output_delay();
    let input_limit = frames + (delay as f64 * from as f64 / to as f64).ceil() as usize + 2 * RESAMPLE_CHUNK_SIZE;

    let mut out = vec![Vec::with_capacity(expected + delay); planes.len()];
    let mut position = 0;
    while out[0].len() < expected + delay && position < input_limit {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| padded_window(plane, position, needed))
            .collect();
        position += needed;

        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        for (plane, samples) in out.iter_mut().zip(processed) {
            plane.extend(samples);
        }
    }

    for plane in out.iter_mut() {
        plane.drain(..delay.min(plane.len()));
        plane.resize(expected, 0.0);
    }
    Ok(out)
}

/// `len` samples starting at `start`, zero padded past the end.
fn padded_window(samples: &[f32], start: usize, len: usize) -> Vec<f32> {
    let mut window = samples
        .get(start..(start + len).min(samples.len()))
        .map(|s| s.to_vec())
        .unwrap_or_default();
    window.resize(len, 0.0);
    window
}

fn deinterleave(samples: &[f32], channels: u16) -> Result<Vec<Vec<f32>>, CodecError> {
    let channels_usize = channels as usize;
    if samples.len() % channels_usize != 0 {
        return Err(CodecError::PartialFrame {
            samples: samples.len(),
            channels,
        });
    }
    let mut planes = vec![Vec::with_capacity(samples.len() / channels_usize); channels_usize];
    for frame in samples.chunks_exact(channels_usize) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }
    Ok(planes)
}

/// Mono is duplicated, many-to-mono is averaged, otherwise channels wrap.
fn remap_channels(planes: Vec<Vec<f32>>, target_channels: u16) -> Vec<Vec<f32>> {
    let target = target_channels as usize;
    if planes.len() == target {
        return planes;
    }
    if target == 1 {
        let frames = planes.first().map(Vec::len).unwrap_or(0);
        let count = planes.len() as f32;
        let mono = (0..frames)
            .map(|i| planes.iter().map(|plane| plane[i]).sum::<f32>() / count)
            .collect();
        return vec![mono];
    }
    (0..target)
        .map(|c| planes[c % planes.len()].clone())
        .collect()
}

fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            samples.push(plane[i]);
        }
    }
    samples
}

/// Averages interleaved frames down to a single channel.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(fragment: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(fragment)?)
}

fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.to_binary()
    }

    #[test]
    fn capture_frame_encodes_to_two_bytes_per_sample() {
        let frame = vec![0.25_f32; 4096];
        let chunk = encode(&frame).unwrap();
        assert_eq!(chunk.data().len(), 8192);
        assert_eq!(chunk.sample_rate(), 16000);
        assert_eq!(chunk.channels(), 1);
        assert_eq!(&chunk.data()[..2], &8192_i16.to_le_bytes());
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let chunk = encode(&[1.0, -1.0, 2.0, -2.0]).unwrap();
        let samples = pcm16_from_bytes(chunk.data());
        assert_eq!(samples, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn encode_rejects_empty_frame() {
        assert!(matches!(encode(&[]), Err(CodecError::EmptyFrame)));
    }

    #[test]
    fn one_second_at_24k_decodes_to_one_second() {
        let chunk = InboundChunk::new(pcm_bytes(&vec![1000; 24000]), 24000, 1);
        let buffer = decode(&chunk, 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 24000);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
        assert!((buffer.samples()[0] - 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn decode_resamples_and_duplicates_channels() {
        let chunk = InboundChunk::new(pcm_bytes(&vec![0; 24000]), 24000, 1);
        let buffer = decode(&chunk, 48000, 2).unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.frames(), 48000);
        assert_eq!(buffer.samples().len(), 96000);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn decode_downmixes_stereo_to_mono() {
        let chunk = InboundChunk::new(pcm_bytes(&[1000, 3000, -2000, 0]), 24000, 2);
        let buffer = decode(&chunk, 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 2);
        assert!((buffer.samples()[0] - 2000.0 / 32768.0).abs() < 1e-6);
        assert!((buffer.samples()[1] + 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let odd = InboundChunk::new(vec![1, 2, 3], 24000, 1);
        assert!(matches!(decode(&odd, 24000, 1), Err(CodecError::OddLength(3))));

        let empty = InboundChunk::new(vec![], 24000, 1);
        assert!(matches!(decode(&empty, 24000, 1), Err(CodecError::EmptyPayload)));

        let partial = InboundChunk::new(pcm_bytes(&[1, 2, 3]), 24000, 2);
        assert!(matches!(
            decode(&partial, 24000, 2),
            Err(CodecError::PartialFrame { samples: 3, channels: 2 })
        ));
    }

    #[test]
    fn base64_round_trip_feeds_inbound_chunk() {
        let encoded = encode(&[0.5, -0.5]).unwrap().to_base64();
        let chunk = InboundChunk::from_base64(&encoded, 16000, 1).unwrap();
        assert_eq!(chunk.data().len(), 4);
        assert!(InboundChunk::from_base64("not base64!", 24000, 1).is_err());
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix_to_mono(&[0.25, 0.75, -1.0, 1.0], 2), vec![0.5, 0.0]);
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }
}
