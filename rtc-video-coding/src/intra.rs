//! Per-stream keyframe requests.

use crate::encoder::FrameType;
use shared::error::{Error, Result};
use std::collections::BTreeSet;

/// Tracks which simulcast streams owe a keyframe.
///
/// Requests are delivered at most once: the pending flag of a stream is
/// cleared the moment a frame type vector carrying its `Key` is built.
#[derive(Debug, Default)]
pub struct IntraRequestScheduler {
    stream_count: usize,
    pending: BTreeSet<usize>,
}

impl IntraRequestScheduler {
    pub fn new(stream_count: usize) -> Self {
        Self {
            stream_count,
            pending: BTreeSet::new(),
        }
    }

    /// Mark `stream_index` as owing a keyframe. Repeating a request that is
    /// already pending has no further effect.
    pub fn request_intra_frame(&mut self, stream_index: i32) -> Result<()> {
        let index = usize::try_from(stream_index)
            .ok()
            .filter(|index| *index < self.stream_count)
            .ok_or(Error::ErrInvalidStreamIndex(stream_index))?;

        self.pending.insert(index);
        Ok(())
    }

    /// Frame types for the next outgoing frame, one per stream. Pending
    /// requests are drained.
    pub fn build_frame_types(&mut self) -> Vec<FrameType> {
        (0..self.stream_count)
            .map(|index| {
                if self.pending.remove(&index) {
                    FrameType::Key
                } else {
                    FrameType::Delta
                }
            })
            .collect()
    }

    /// Re-arm the keyframe requests carried by a vector that never reached
    /// the bitstream.
    pub fn restore(&mut self, frame_types: &[FrameType]) {
        let stream_count = self.stream_count;
        self.pending.extend(
            frame_types
                .iter()
                .enumerate()
                .filter(|(index, frame_type)| {
                    **frame_type == FrameType::Key && *index < stream_count
                })
                .map(|(index, _)| index),
        );
    }

    pub fn is_pending(&self, stream_index: usize) -> bool {
        self.pending.contains(&stream_index)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }
}
