//! Encoder double shared by the unit tests.

use crate::config::CodecConfig;
use crate::encoder::{EncodedImage, EncoderRates, FrameType, VideoEncoder, VideoFrame};
use bytes::Bytes;
use shared::error::{Error, Result};
use std::time::Instant;

/// Records every call and optionally fails them.
#[derive(Debug, Default)]
pub(crate) struct RecordingEncoder {
    pub(crate) init_calls: Vec<EncoderRates>,
    pub(crate) rate_calls: Vec<EncoderRates>,
    pub(crate) channel_calls: Vec<(u8, u32)>,
    pub(crate) encode_calls: Vec<(Vec<FrameType>, u8)>,
    pub(crate) request_calls: Vec<Vec<FrameType>>,
    pub(crate) internal_source: bool,
    pub(crate) fail_init: bool,
    pub(crate) fail_encode: bool,
    pub(crate) fail_rates: bool,
    pub(crate) fail_channel: bool,
}

impl RecordingEncoder {
    pub(crate) fn with_internal_source() -> Self {
        Self {
            internal_source: true,
            ..Default::default()
        }
    }

    pub(crate) fn last_frame_types(&self) -> Option<&[FrameType]> {
        self.encode_calls.last().map(|(types, _)| types.as_slice())
    }

    fn images(
        frame_types: &[FrameType],
        temporal_layer: u8,
        arrival: Instant,
    ) -> Vec<EncodedImage> {
        frame_types
            .iter()
            .enumerate()
            .map(|(stream_index, frame_type)| EncodedImage {
                stream_index,
                frame_type: *frame_type,
                temporal_layer,
                arrival,
                payload: Bytes::from_static(&[0u8; 16]),
            })
            .collect()
    }
}

impl VideoEncoder for RecordingEncoder {
    fn init_encode(&mut self, _config: &CodecConfig, rates: &EncoderRates) -> Result<()> {
        if self.fail_init {
            return Err(Error::Other("init failed".to_owned()));
        }
        self.init_calls.push(rates.clone());
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: &[FrameType],
        temporal_layer: u8,
    ) -> Result<Vec<EncodedImage>> {
        self.encode_calls.push((frame_types.to_vec(), temporal_layer));
        if self.fail_encode {
            return Err(Error::Other("encode failed".to_owned()));
        }
        Ok(Self::images(frame_types, temporal_layer, frame.arrival))
    }

    fn set_rates(&mut self, rates: &EncoderRates) -> Result<()> {
        self.rate_calls.push(rates.clone());
        if self.fail_rates {
            return Err(Error::ErrEncoderRejected("rates".to_owned()));
        }
        Ok(())
    }

    fn set_channel_parameters(&mut self, loss_fraction: u8, rtt_ms: u32) -> Result<()> {
        self.channel_calls.push((loss_fraction, rtt_ms));
        if self.fail_channel {
            return Err(Error::Other("channel".to_owned()));
        }
        Ok(())
    }

    fn internal_source(&self) -> bool {
        self.internal_source
    }

    fn request_frame(&mut self, frame_types: &[FrameType]) -> Result<Vec<EncodedImage>> {
        self.request_calls.push(frame_types.to_vec());
        if self.fail_encode {
            return Err(Error::Other("request failed".to_owned()));
        }
        Ok(Self::images(frame_types, 0, Instant::now()))
    }

    fn implementation_name(&self) -> &str {
        "recording"
    }
}
