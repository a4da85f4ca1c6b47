//! Channel adaptation: turns network feedback and input cadence into encoder
//! rate updates.
//!
//! Reconfiguring an encoder's rate control is expensive and can itself
//! disturb quality, so the controller remembers the last rates and channel
//! parameters the encoder accepted and never repeats an identical call.

use crate::cadence::FrameCadenceTracker;
use crate::config::CodecConfig;
use crate::encoder::{EncoderRates, VideoEncoder, encoder_rejected};
use crate::temporal_layers::{LayerAllocation, TemporalLayerStrategy};
use log::{debug, info, trace, warn};
use shared::error::{Error, Result};
use std::time::Instant;

/// Network feedback snapshot.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ChannelParameters {
    pub target_bitrate_bps: u32,
    /// Packet loss in 1/256 units.
    pub loss_fraction: u8,
    pub rtt_ms: u32,
}

/// Owns channel feedback, the cadence estimate and the call suppression
/// caches of one pipeline.
#[derive(Debug, Default)]
pub struct ChannelAdaptationController {
    cadence: FrameCadenceTracker,

    layer_count: u8,
    min_bitrate_kbps: u32,
    max_bitrate_kbps: u32,

    channel: Option<ChannelParameters>,
    target_bitrate_kbps: u32,
    framerate_fps: u32,
    /// `None` until a codec is registered.
    allocation: Option<LayerAllocation>,

    last_sent_rates: Option<(u32, u32)>,
    last_sent_channel: Option<(u8, u32)>,
}

impl ChannelAdaptationController {
    pub fn new(cadence: FrameCadenceTracker) -> Self {
        Self {
            cadence,
            ..Default::default()
        }
    }

    pub fn record_frame(&mut self, arrival: Instant) {
        self.cadence.record_frame(arrival);
    }

    /// Whether a codec has been registered and rates are known.
    pub fn has_rates(&self) -> bool {
        self.allocation.is_some()
    }

    /// Start over with a newly registered codec.
    ///
    /// The encoder is (re)initialised with the start bitrate and the codec's
    /// max framerate, which also become the suppression baseline. Nothing is
    /// changed if the strategy or the encoder refuses the configuration.
    pub fn on_streams_reconfigured(
        &mut self,
        config: &CodecConfig,
        strategy: &mut dyn TemporalLayerStrategy,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<()> {
        let bitrate_kbps = config.start_bitrate_kbps;
        let framerate_fps = config.max_framerate;
        let allocation = strategy.compute_allocation(
            bitrate_kbps,
            f64::from(framerate_fps),
            config.number_of_temporal_layers,
        )?;
        let rates = EncoderRates {
            bitrate_kbps,
            framerate_fps,
            allocation,
        };
        encoder
            .init_encode(config, &rates)
            .map_err(encoder_rejected)?;

        info!(
            "{} initialised at {} kbps, {} fps, {} temporal layers",
            encoder.implementation_name(),
            bitrate_kbps,
            framerate_fps,
            config.number_of_temporal_layers
        );

        self.layer_count = config.number_of_temporal_layers;
        self.min_bitrate_kbps = config.min_bitrate_kbps;
        self.max_bitrate_kbps = config.max_bitrate_kbps;
        self.target_bitrate_kbps = bitrate_kbps;
        self.framerate_fps = framerate_fps;
        self.allocation = Some(rates.allocation);
        self.last_sent_rates = Some((bitrate_kbps, framerate_fps));
        self.last_sent_channel = None;
        Ok(())
    }

    /// Apply new network feedback.
    ///
    /// The allocation is recomputed with the last known framerate; the
    /// encoder only hears about values that differ from what it last
    /// accepted.
    pub fn on_channel_parameters(
        &mut self,
        params: ChannelParameters,
        strategy: &mut dyn TemporalLayerStrategy,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<()> {
        if !self.has_rates() {
            return Err(Error::ErrCodecNotRegistered);
        }

        self.channel = Some(params);
        self.target_bitrate_kbps = self.clamp_bitrate(params.target_bitrate_bps / 1000);

        let rates_result = self.update_rates(strategy, encoder);
        let channel_result = self.update_channel(params, encoder);
        rates_result.and(channel_result)
    }

    /// Periodic tick: refresh the framerate estimate and push it to the
    /// encoder when it changed. Ticks without a usable estimate are skipped.
    pub fn on_tick(
        &mut self,
        now: Instant,
        strategy: &mut dyn TemporalLayerStrategy,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<()> {
        if !self.has_rates() {
            return Ok(());
        }

        let framerate_fps = match self.cadence.estimate_fps(now) {
            Ok(estimate) => (estimate.round() as u32).max(1),
            Err(err) => {
                trace!("skipping tick: {err}");
                return Ok(());
            }
        };
        if framerate_fps == self.framerate_fps {
            return Ok(());
        }

        trace!("input framerate {} -> {} fps", self.framerate_fps, framerate_fps);
        self.framerate_fps = framerate_fps;
        self.update_rates(strategy, encoder)
    }

    pub fn channel_parameters(&self) -> Option<ChannelParameters> {
        self.channel
    }

    pub fn target_bitrate_kbps(&self) -> u32 {
        self.target_bitrate_kbps
    }

    /// Last published input framerate.
    pub fn framerate_fps(&self) -> u32 {
        self.framerate_fps
    }

    pub fn allocation(&self) -> Option<&LayerAllocation> {
        self.allocation.as_ref()
    }

    fn clamp_bitrate(&self, bitrate_kbps: u32) -> u32 {
        let floor = self.min_bitrate_kbps.max(1);
        bitrate_kbps.clamp(floor, self.max_bitrate_kbps.max(floor))
    }

    fn update_rates(
        &mut self,
        strategy: &mut dyn TemporalLayerStrategy,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<()> {
        let allocation = strategy.compute_allocation(
            self.target_bitrate_kbps,
            f64::from(self.framerate_fps),
            self.layer_count,
        )?;
        self.allocation = Some(allocation.clone());

        let rates = (self.target_bitrate_kbps, self.framerate_fps);
        if self.last_sent_rates == Some(rates) {
            trace!("set_rates({} kbps, {} fps) suppressed", rates.0, rates.1);
            return Ok(());
        }

        let update = EncoderRates {
            bitrate_kbps: rates.0,
            framerate_fps: rates.1,
            allocation,
        };
        if let Err(err) = encoder.set_rates(&update) {
            warn!("set_rates({} kbps, {} fps) rejected: {err}", rates.0, rates.1);
            return Err(encoder_rejected(err));
        }

        debug!("set_rates({} kbps, {} fps)", rates.0, rates.1);
        self.last_sent_rates = Some(rates);
        Ok(())
    }

    fn update_channel(
        &mut self,
        params: ChannelParameters,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<()> {
        let channel = (params.loss_fraction, params.rtt_ms);
        if self.last_sent_channel == Some(channel) {
            trace!("set_channel_parameters suppressed");
            return Ok(());
        }

        if let Err(err) = encoder.set_channel_parameters(channel.0, channel.1) {
            warn!("set_channel_parameters({}, {} ms) rejected: {err}", channel.0, channel.1);
            return Err(encoder_rejected(err));
        }

        debug!("set_channel_parameters({}, {} ms)", channel.0, channel.1);
        self.last_sent_channel = Some(channel);
        Ok(())
    }
}
