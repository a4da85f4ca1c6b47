//! RTC Video Coding - Sans-IO send-side control plane for real-time video encoders.
//!
//! This crate sits between a raw frame source and a bitstream encoder. For
//! every incoming frame it decides which temporal layer the frame belongs to
//! and which simulcast streams must produce a keyframe, and it keeps the
//! encoder's rate targets in line with network feedback and the measured
//! input framerate. The encoder itself is a pluggable [`VideoEncoder`].
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`EncodePipeline`] | Orchestrator; exposes explicit methods and a [`sansio::Protocol`] implementation |
//! | [`ChannelAdaptationController`] | Turns channel feedback and cadence into encoder rate calls, suppressing redundant ones |
//! | [`FrameCadenceTracker`] | Sliding-window input framerate estimate |
//! | [`IntraRequestScheduler`] | Per-stream pending keyframe requests |
//! | [`FixedAllocation`] | Static per-layer bitrate split |
//! | [`RealTimeAllocation`] | Folds temporal layers as the input framerate drops |
//!
//! # Flow
//!
//! ```text
//! VideoFrame ──► EncodePipeline ──► VideoEncoder::encode ──► poll_write() ──► packetizer
//!                  │        ▲
//!                  │        └── set_channel_parameters / process(now)
//!                  └── IntraRequestScheduler, TemporalLayerStrategy
//! ```
//!
//! Time is never read from a clock: frames carry their arrival [`Instant`](std::time::Instant)
//! and periodic work runs from `handle_timeout(now)`.
//!
//! # Example
//!
//! ```ignore
//! use rtc_video_coding::{CodecConfig, EncodePipelineBuilder, VideoFrame};
//! use sansio::Protocol;
//!
//! let mut pipeline = EncodePipelineBuilder::new().build(my_encoder);
//! pipeline.register_send_codec(CodecConfig {
//!     number_of_temporal_layers: 3,
//!     ..Default::default()
//! })?;
//!
//! pipeline.handle_write(VideoFrame::empty(now, 352, 288))?;
//! while let Some(image) = pipeline.poll_write() {
//!     packetizer.send(image);
//! }
//!
//! pipeline.set_channel_parameters(500_000, 0, 120)?;
//! if pipeline.poll_timeout().is_some_and(|eto| eto <= now) {
//!     pipeline.handle_timeout(now)?;
//! }
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod cadence;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod intra;
pub mod pipeline;
pub mod temporal_layers;

#[cfg(test)]
mod test_utils;

pub use cadence::FrameCadenceTracker;
pub use config::{CodecConfig, LayerRateTable, LayerStrategyKind, StreamConfig};
pub use controller::{ChannelAdaptationController, ChannelParameters};
pub use encoder::{EncodedImage, EncoderRates, FrameType, VideoEncoder, VideoFrame};
pub use intra::IntraRequestScheduler;
pub use pipeline::{ControlEvent, EncodePipeline, EncodePipelineBuilder};
pub use temporal_layers::{
    FixedAllocation, LayerAllocation, RealTimeAllocation, TemporalLayerStrategy, new_strategy,
};
