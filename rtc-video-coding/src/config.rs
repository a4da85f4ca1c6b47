//! Send codec configuration.
//!
//! A [`CodecConfig`] is handed to
//! [`EncodePipeline::register_send_codec`](crate::EncodePipeline::register_send_codec)
//! and stays immutable until the codec is registered again. All types derive
//! `serde` so embedders can load them from their own configuration files.

use serde::{Deserialize, Serialize};
use shared::error::{Error, Result};

/// Largest number of temporal layers a strategy can split a stream into.
pub const MAX_TEMPORAL_LAYERS: u8 = 3;

/// Which temporal layer strategy the pipeline instantiates on registration.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStrategyKind {
    /// Static bitrate table, framerate split independent of input cadence.
    #[default]
    Fixed,
    /// Folds layers together when the input cadence cannot sustain them.
    RealTime,
}

/// Cumulative bitrate fraction per temporal layer, one row per layer count.
///
/// `rows[n - 1][i]` is the share of the total bitrate carried by layers
/// `0..=i` when the stream is split into `n` layers. Every row must be
/// non-decreasing and end at `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRateTable {
    rows: Vec<Vec<f64>>,
}

impl Default for LayerRateTable {
    fn default() -> Self {
        Self {
            rows: vec![vec![1.0], vec![0.6, 1.0], vec![0.4, 0.6, 1.0]],
        }
    }
}

impl LayerRateTable {
    /// Create a table from explicit rows, validating every row.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let table = Self { rows };
        table.validate()?;
        Ok(table)
    }

    /// Cumulative fractions for `layer_count` layers.
    pub fn row(&self, layer_count: u8) -> Option<&[f64]> {
        let index = usize::from(layer_count).checked_sub(1)?;
        self.rows.get(index).map(Vec::as_slice)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rows.is_empty() || self.rows.len() > usize::from(MAX_TEMPORAL_LAYERS) {
            return Err(Error::ErrInvalidConfiguration(format!(
                "layer rate table must have between 1 and {MAX_TEMPORAL_LAYERS} rows"
            )));
        }
        for (n, row) in self.rows.iter().enumerate() {
            if row.len() != n + 1 {
                return Err(Error::ErrInvalidConfiguration(format!(
                    "layer rate table row {n} must have {} entries",
                    n + 1
                )));
            }
            let ordered = row.windows(2).all(|w| w[0] <= w[1]);
            let in_range = row.iter().all(|f| *f > 0.0 && *f <= 1.0);
            if !ordered || !in_range || row.last() != Some(&1.0) {
                return Err(Error::ErrInvalidConfiguration(format!(
                    "layer rate table row {n} must be non-decreasing in (0, 1] and end at 1.0"
                )));
            }
        }
        Ok(())
    }
}

/// One simulcast stream. Its index in [`CodecConfig::streams`] is the
/// stream's identity for keyframe requests and encoded output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub max_bitrate_kbps: u32,
    pub number_of_temporal_layers: u8,
    pub qp_max: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 352,
            height: 288,
            max_bitrate_kbps: 2000,
            number_of_temporal_layers: 1,
            qp_max: 56,
        }
    }
}

/// Send codec settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub width: u32,
    pub height: u32,
    pub start_bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    /// Framerate handed to the encoder before any cadence estimate exists.
    pub max_framerate: u32,
    pub number_of_temporal_layers: u8,
    pub qp_max: u32,
    pub layer_strategy: LayerStrategyKind,
    /// Overrides the fixed strategy's default table.
    pub layer_rate_table: Option<LayerRateTable>,
    /// Simulcast streams. Empty means a single implicit stream.
    pub streams: Vec<StreamConfig>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            width: 352,
            height: 288,
            start_bitrate_kbps: 300,
            min_bitrate_kbps: 30,
            max_bitrate_kbps: 2000,
            max_framerate: 30,
            number_of_temporal_layers: 1,
            qp_max: 56,
            layer_strategy: LayerStrategyKind::default(),
            layer_rate_table: None,
            streams: vec![],
        }
    }
}

impl CodecConfig {
    /// Number of independently encoded streams per input frame.
    pub fn stream_count(&self) -> usize {
        self.streams.len().max(1)
    }

    /// Table used by the fixed strategy.
    pub fn rate_table(&self) -> LayerRateTable {
        self.layer_rate_table.clone().unwrap_or_default()
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let layers = self.number_of_temporal_layers;
        if layers == 0 || layers > MAX_TEMPORAL_LAYERS {
            return Err(Error::ErrInvalidConfiguration(format!(
                "number of temporal layers {layers} outside [1, {MAX_TEMPORAL_LAYERS}]"
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::ErrInvalidConfiguration(
                "codec dimensions must be non-zero".to_owned(),
            ));
        }
        if self.max_framerate == 0 {
            return Err(Error::ErrInvalidConfiguration(
                "max framerate must be non-zero".to_owned(),
            ));
        }
        if self.start_bitrate_kbps == 0 {
            return Err(Error::ErrInvalidConfiguration(
                "start bitrate must be non-zero".to_owned(),
            ));
        }
        if self.min_bitrate_kbps > self.max_bitrate_kbps {
            return Err(Error::ErrInvalidConfiguration(format!(
                "min bitrate {} kbps above max bitrate {} kbps",
                self.min_bitrate_kbps, self.max_bitrate_kbps
            )));
        }
        if self.start_bitrate_kbps < self.min_bitrate_kbps
            || self.start_bitrate_kbps > self.max_bitrate_kbps
        {
            return Err(Error::ErrInvalidConfiguration(format!(
                "start bitrate {} kbps outside [{}, {}]",
                self.start_bitrate_kbps, self.min_bitrate_kbps, self.max_bitrate_kbps
            )));
        }
        for (index, stream) in self.streams.iter().enumerate() {
            if stream.width == 0 || stream.height == 0 {
                return Err(Error::ErrInvalidConfiguration(format!(
                    "stream {index} has zero dimensions"
                )));
            }
            if stream.number_of_temporal_layers != layers {
                return Err(Error::ErrInvalidConfiguration(format!(
                    "stream {index} has {} temporal layers, codec has {layers}",
                    stream.number_of_temporal_layers
                )));
            }
        }
        if let Some(table) = &self.layer_rate_table {
            table.validate()?;
            if table.row(layers).is_none() {
                return Err(Error::ErrInvalidConfiguration(format!(
                    "layer rate table has no row for {layers} layers"
                )));
            }
        }
        Ok(())
    }
}
