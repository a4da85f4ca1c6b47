//! Encoder capability driven by the pipeline.
//!
//! The bitstream encoder is opaque to this crate. Each codec family (VP8,
//! H.264, hardware encoders, ...) plugs in by implementing [`VideoEncoder`];
//! the pipeline and controller only ever talk to the trait.

use crate::config::CodecConfig;
use crate::temporal_layers::LayerAllocation;
use bytes::Bytes;
use shared::error::{Error, Result};
use std::time::Instant;

/// Whether an encoded frame may reference earlier frames.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Self-contained frame a receiver can start decoding from.
    Key,
    #[default]
    Delta,
}

/// Raw input frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Arrival instant, taken from the caller's monotonic clock.
    pub arrival: Instant,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl VideoFrame {
    /// Frame without pixel data, used where only cadence matters.
    pub fn empty(arrival: Instant, width: u32, height: u32) -> Self {
        Self {
            arrival,
            width,
            height,
            data: Bytes::new(),
        }
    }
}

/// One encoded output unit handed to the packetizer.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub stream_index: usize,
    pub frame_type: FrameType,
    pub temporal_layer: u8,
    /// Arrival instant of the raw frame this image was encoded from.
    pub arrival: Instant,
    pub payload: Bytes,
}

impl EncodedImage {
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Rate targets delivered to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderRates {
    pub bitrate_kbps: u32,
    pub framerate_fps: u32,
    /// Per temporal layer split of `bitrate_kbps` and `framerate_fps`.
    pub allocation: LayerAllocation,
}

/// Encoder capability.
///
/// Implementations must accept rate calls carrying values they already
/// use, even though the controller suppresses most of them.
pub trait VideoEncoder {
    /// (Re)initialise for a newly registered codec with its starting rates.
    fn init_encode(&mut self, config: &CodecConfig, rates: &EncoderRates) -> Result<()>;

    /// Encode one raw frame into every configured stream.
    ///
    /// `frame_types` has one entry per stream. The returned images replace a
    /// completion callback: each is forwarded untouched to the packetizer.
    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: &[FrameType],
        temporal_layer: u8,
    ) -> Result<Vec<EncodedImage>>;

    fn set_rates(&mut self, rates: &EncoderRates) -> Result<()>;

    /// `loss_fraction` is in 1/256 units.
    fn set_channel_parameters(&mut self, loss_fraction: u8, rtt_ms: u32) -> Result<()>;

    /// Encoders that capture frames themselves never see [`encode`](Self::encode);
    /// keyframe requests reach them through [`request_frame`](Self::request_frame),
    /// which such encoders must implement.
    fn internal_source(&self) -> bool {
        false
    }

    /// Ask an internal-source encoder to produce a frame of the given types now.
    ///
    /// Returning `Ok` consumes the pending keyframe requests. The default
    /// rejects the call so that an encoder claiming [`internal_source`](Self::internal_source)
    /// without implementing this keeps its requests pending.
    fn request_frame(&mut self, _frame_types: &[FrameType]) -> Result<Vec<EncodedImage>> {
        Err(Error::ErrEncoderRejected(format!(
            "{} does not support frame requests",
            self.implementation_name()
        )))
    }

    fn implementation_name(&self) -> &str {
        "unknown"
    }
}

/// Map a failure reported by an encoder onto [`Error::ErrEncoderRejected`].
pub(crate) fn encoder_rejected(err: Error) -> Error {
    match err {
        Error::ErrEncoderRejected(_) => err,
        other => Error::ErrEncoderRejected(other.to_string()),
    }
}
