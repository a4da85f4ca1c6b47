//! Fixed temporal layer allocation.

use super::{LayerAllocation, TemporalLayerStrategy, check_request, fold_allocation, pattern};
use crate::config::{LayerRateTable, LayerStrategyKind};
use shared::error::{Error, Result};

/// Splits the bitrate by a static table and the framerate by fixed
/// fractions, whatever the input cadence.
#[derive(Debug)]
pub struct FixedAllocation {
    layer_count: u8,
    table: LayerRateTable,
}

impl FixedAllocation {
    pub fn new(layer_count: u8, table: LayerRateTable) -> Self {
        Self { layer_count, table }
    }
}

impl TemporalLayerStrategy for FixedAllocation {
    fn kind(&self) -> LayerStrategyKind {
        LayerStrategyKind::Fixed
    }

    fn compute_allocation(
        &mut self,
        total_bitrate_kbps: u32,
        total_framerate_fps: f64,
        layer_count: u8,
    ) -> Result<LayerAllocation> {
        check_request(total_bitrate_kbps, layer_count)?;
        let fractions = self.table.row(layer_count).ok_or_else(|| {
            Error::ErrInvalidConfiguration(format!(
                "layer rate table has no row for {layer_count} layers"
            ))
        })?;

        self.layer_count = layer_count;
        Ok(fold_allocation(
            total_bitrate_kbps,
            total_framerate_fps,
            layer_count,
            layer_count,
            fractions,
        ))
    }

    fn assign_layer(&self, position: usize) -> u8 {
        let pattern = pattern(self.layer_count);
        pattern[position % pattern.len()]
    }

    fn cycle_length(&self) -> usize {
        pattern(self.layer_count).len()
    }
}
