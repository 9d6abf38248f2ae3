//! Speech segments produced by synthesis and the store that collects them.
//!
//! Synthesis workers finish in any order, so the store accepts segments
//! unordered and only hands them out, sorted by requested start, once it is
//! frozen. Freezing consumes the store, so nothing can be appended after
//! scheduling has started.

use std::path::PathBuf;

/// One synthesized subtitle line.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Rendered speech clip
    pub clip: PathBuf,
    /// Start time requested by the subtitle (seconds)
    pub requested_start: f64,
    /// Duration measured from the clip (seconds)
    pub duration: f64,
    /// Line was marked up as emphasis (italics) and gets the gentler ducking profile
    pub is_emphasis: bool,
}

impl SpeechSegment {
    pub fn new(clip: PathBuf, requested_start: f64, duration: f64, is_emphasis: bool) -> Self {
        Self {
            clip,
            requested_start,
            duration,
            is_emphasis,
        }
    }
}

/// A speech segment with its conflict-free start on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSegment {
    pub segment: SpeechSegment,
    pub placed_start: f64,
}

impl PlacedSegment {
    pub fn end(&self) -> f64 {
        self.placed_start + self.segment.duration
    }

    /// How far the segment was pushed past its requested start.
    pub fn drift(&self) -> f64 {
        self.placed_start - self.segment.requested_start
    }

    pub fn ducking_interval(&self) -> DuckingInterval {
        DuckingInterval {
            start: self.placed_start,
            end: self.end(),
            is_emphasis: self.segment.is_emphasis,
        }
    }
}

/// Window during which the background is turned down for speech.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuckingInterval {
    pub start: f64,
    pub end: f64,
    pub is_emphasis: bool,
}

#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Vec<SpeechSegment>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: SpeechSegment) {
        self.segments.push(segment);
    }

    pub fn extend(&mut self, segments: impl IntoIterator<Item = SpeechSegment>) {
        self.segments.extend(segments);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Close the store and return its segments ordered by requested start.
    /// The sort is stable so lines sharing a start keep their arrival order.
    pub fn freeze(self) -> Vec<SpeechSegment> {
        let mut segments = self.segments;
        segments.sort_by(|a, b| a.requested_start.total_cmp(&b.requested_start));
        segments
    }
}
