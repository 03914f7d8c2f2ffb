use std::path::PathBuf;

use crate::foundation::error::{SupercutError, SupercutResult};
use crate::layer::model::LayerId;

/// Placement of one track on the program timeline, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentTiming {
    pub start: f64,
    pub duration: f64,
}

impl SegmentTiming {
    /// Exclusive end.
    pub fn end(self) -> f64 {
        self.start + self.duration
    }
}

/// Lay tracks back to back starting at `start_offset`.
///
/// Segment `i` starts where segment `i - 1` ends and lasts exactly as long as track `i`, so the
/// segments partition `[start_offset, start_offset + sum(durations))`.
pub fn compute_segments(
    durations: &[f64],
    start_offset: f64,
) -> SupercutResult<Vec<SegmentTiming>> {
    if !start_offset.is_finite() || start_offset < 0.0 {
        return Err(SupercutError::validation(format!(
            "start offset must be finite and >= 0, got {start_offset}"
        )));
    }
    if let Some((idx, d)) = durations
        .iter()
        .enumerate()
        .find(|(_, d)| !d.is_finite() || **d <= 0.0)
    {
        return Err(SupercutError::validation(format!(
            "track {idx} has invalid duration {d} (must be finite and > 0)"
        )));
    }

    let mut cursor = start_offset;
    Ok(durations
        .iter()
        .map(|&duration| {
            let seg = SegmentTiming {
                start: cursor,
                duration,
            };
            cursor += duration;
            seg
        })
        .collect())
}

/// One per-track occurrence of a time-synced layer.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlaySegment {
    pub track_index: usize,
    pub start: f64,
    pub duration: f64,
    /// Image shown during the segment; `None` until the rasterizer produced it.
    pub image: Option<PathBuf>,
}

impl OverlaySegment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Ordered segments of one time-synced layer within one job.
#[derive(Clone, Debug, PartialEq)]
pub struct Timeline {
    pub layer: LayerId,
    pub segments: Vec<OverlaySegment>,
}

impl Timeline {
    /// Pair timings with per-track images. Missing images stay `None`.
    pub fn from_timings(
        layer: LayerId,
        timings: &[SegmentTiming],
        images: &[Option<PathBuf>],
    ) -> Self {
        let segments = timings
            .iter()
            .enumerate()
            .map(|(track_index, t)| OverlaySegment {
                track_index,
                start: t.start,
                duration: t.duration,
                image: images.get(track_index).cloned().flatten(),
            })
            .collect();
        Self { layer, segments }
    }

    /// `[start, end)` covered by the segments, `None` when there are none.
    pub fn span(&self) -> Option<(f64, f64)> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        Some((first.start, last.end()))
    }
}
