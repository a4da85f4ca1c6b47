//! Temporal layer strategies.
//!
//! A strategy splits a total bitrate and framerate over up to three temporal
//! layers and decides which layer each frame belongs to. Decoding layers
//! `0..=k` yields a valid stream at `framerate_fps[k]`, so allocations are
//! cumulative: the top layer always carries the full rate.
//!
//! | Strategy | Bitrate split | Framerate split |
//! |----------|---------------|-----------------|
//! | [`FixedAllocation`] | configured [`LayerRateTable`](crate::LayerRateTable) | `1/4, 1/2, 1` of the total |
//! | [`RealTimeAllocation`] | `0.4, 0.6, 1.0`, folded as the input slows down | same, folded with the bitrate |
//!
//! Layer assignment cycles through a fixed pattern whose length depends on
//! the number of layers in use:
//!
//! ```text
//! 1 layer:  0 0 0 0 ...
//! 2 layers: 0 1 0 1 ...
//! 3 layers: 0 2 1 2 0 2 1 2 ...
//! ```

pub(crate) mod fixed;
pub(crate) mod realtime;

pub use fixed::FixedAllocation;
pub use realtime::RealTimeAllocation;

use crate::config::{LayerRateTable, LayerStrategyKind, MAX_TEMPORAL_LAYERS};
use shared::error::{Error, Result};

/// Cumulative bitrate and framerate per temporal layer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LayerAllocation {
    pub bitrate_kbps: Vec<u32>,
    pub framerate_fps: Vec<f64>,
}

impl LayerAllocation {
    pub fn layer_count(&self) -> usize {
        self.bitrate_kbps.len()
    }

    pub fn total_bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps.last().copied().unwrap_or_default()
    }

    pub fn total_framerate_fps(&self) -> f64 {
        self.framerate_fps.last().copied().unwrap_or_default()
    }
}

/// Policy deciding the per-layer budget and the layer of every frame.
pub trait TemporalLayerStrategy {
    fn kind(&self) -> LayerStrategyKind;

    /// Split `total_bitrate_kbps` and `total_framerate_fps` over
    /// `layer_count` layers. The strategy adopts `layer_count` for
    /// subsequent [`assign_layer`](Self::assign_layer) calls.
    fn compute_allocation(
        &mut self,
        total_bitrate_kbps: u32,
        total_framerate_fps: f64,
        layer_count: u8,
    ) -> Result<LayerAllocation>;

    /// Layer of the frame at `position` in the current pattern.
    fn assign_layer(&self, position: usize) -> u8;

    /// Length of the current assignment pattern.
    fn cycle_length(&self) -> usize;
}

/// Instantiate the strategy selected by a codec configuration.
pub fn new_strategy(
    kind: LayerStrategyKind,
    layer_count: u8,
    table: LayerRateTable,
) -> Box<dyn TemporalLayerStrategy> {
    match kind {
        LayerStrategyKind::Fixed => Box::new(FixedAllocation::new(layer_count, table)),
        LayerStrategyKind::RealTime => Box::new(RealTimeAllocation::new(layer_count)),
    }
}

const PATTERN_1: [u8; 1] = [0];
const PATTERN_2: [u8; 2] = [0, 1];
const PATTERN_3: [u8; 4] = [0, 2, 1, 2];

pub(crate) fn pattern(layer_count: u8) -> &'static [u8] {
    match layer_count {
        0 | 1 => &PATTERN_1,
        2 => &PATTERN_2,
        _ => &PATTERN_3,
    }
}

pub(crate) fn framerate_fractions(layer_count: u8) -> &'static [f64] {
    match layer_count {
        0 | 1 => &[1.0],
        2 => &[0.5, 1.0],
        _ => &[0.25, 0.5, 1.0],
    }
}

pub(crate) fn check_request(total_bitrate_kbps: u32, layer_count: u8) -> Result<()> {
    if layer_count == 0 || layer_count > MAX_TEMPORAL_LAYERS {
        return Err(Error::ErrInvalidConfiguration(format!(
            "number of temporal layers {layer_count} outside [1, {MAX_TEMPORAL_LAYERS}]"
        )));
    }
    if total_bitrate_kbps == 0 {
        return Err(Error::ErrInvalidConfiguration(
            "total bitrate must be non-zero".to_owned(),
        ));
    }
    Ok(())
}

/// Allocation over `layer_count` layers where only the lowest `active`
/// layers are distinct; layers at or above `active - 1` carry the totals.
pub(crate) fn fold_allocation(
    total_bitrate_kbps: u32,
    total_framerate_fps: f64,
    layer_count: u8,
    active: u8,
    rate_fractions: &[f64],
) -> LayerAllocation {
    let fps_fractions = framerate_fractions(active);
    let top = usize::from(active.max(1)) - 1;

    let mut allocation = LayerAllocation::default();
    for layer in 0..usize::from(layer_count) {
        if layer < top {
            let rate = rate_fractions.get(layer).copied().unwrap_or(1.0);
            let fps = fps_fractions.get(layer).copied().unwrap_or(1.0);
            allocation
                .bitrate_kbps
                .push((f64::from(total_bitrate_kbps) * rate).round() as u32);
            allocation.framerate_fps.push(total_framerate_fps * fps);
        } else {
            allocation.bitrate_kbps.push(total_bitrate_kbps);
            allocation.framerate_fps.push(total_framerate_fps);
        }
    }
    allocation
}
