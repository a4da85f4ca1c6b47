//! Real-time temporal layer allocation.
//!
//! Temporal scalability only pays off when there are enough frames to split.
//! This strategy folds the lowest layers into the ones above them as the
//! input framerate drops, so it never promises a per-layer framerate the
//! source cannot deliver. Thresholds carry hysteresis: a layer is dropped
//! below one framerate and only restored above a higher one.

use super::{LayerAllocation, TemporalLayerStrategy, check_request, fold_allocation, pattern};
use crate::config::LayerStrategyKind;
use log::debug;
use shared::error::Result;

const RATE_FRACTIONS: [&[f64]; 3] = [&[1.0], &[0.6, 1.0], &[0.4, 0.6, 1.0]];

/// Three layers at or above this input framerate.
const THREE_LAYER_FPS: f64 = 24.0;
/// Keep three layers down to this framerate once they are in use.
const THREE_LAYER_HOLD_FPS: f64 = 20.0;
/// Two layers at or above this input framerate.
const TWO_LAYER_FPS: f64 = 10.0;
/// Keep two layers while strictly above this framerate once in use.
const TWO_LAYER_HOLD_FPS: f64 = 8.0;

/// Number of layers the input framerate supports, given the number in use.
pub(crate) fn layers_for_framerate(current: u8, framerate_fps: f64) -> u8 {
    if framerate_fps >= THREE_LAYER_FPS {
        return 3;
    }
    if framerate_fps >= THREE_LAYER_HOLD_FPS && current >= 3 {
        return 3;
    }
    if framerate_fps >= TWO_LAYER_FPS {
        return 2;
    }
    if framerate_fps > TWO_LAYER_HOLD_FPS && current >= 2 {
        return 2;
    }
    1
}

/// Framerate-adaptive allocation.
#[derive(Debug)]
pub struct RealTimeAllocation {
    active_layers: u8,
}

impl RealTimeAllocation {
    pub fn new(layer_count: u8) -> Self {
        Self { active_layers: layer_count }
    }

    /// Layers currently distinct from the top layer.
    pub fn active_layers(&self) -> u8 {
        self.active_layers
    }
}

impl TemporalLayerStrategy for RealTimeAllocation {
    fn kind(&self) -> LayerStrategyKind {
        LayerStrategyKind::RealTime
    }

    fn compute_allocation(
        &mut self,
        total_bitrate_kbps: u32,
        total_framerate_fps: f64,
        layer_count: u8,
    ) -> Result<LayerAllocation> {
        check_request(total_bitrate_kbps, layer_count)?;

        let active = layers_for_framerate(self.active_layers, total_framerate_fps).min(layer_count);
        if active != self.active_layers {
            debug!(
                "temporal layers {} -> {} at {:.1} fps",
                self.active_layers, active, total_framerate_fps
            );
            self.active_layers = active;
        }

        let fractions = RATE_FRACTIONS[usize::from(active) - 1];
        Ok(fold_allocation(
            total_bitrate_kbps,
            total_framerate_fps,
            layer_count,
            active,
            fractions,
        ))
    }

    fn assign_layer(&self, position: usize) -> u8 {
        let pattern = pattern(self.active_layers);
        pattern[position % pattern.len()]
    }

    fn cycle_length(&self) -> usize {
        pattern(self.active_layers).len()
    }
}
