use super::segments::{PlacedSegment, SpeechSegment};

/// Assign every segment a start that never precedes the end of the previous
/// one. Segments are only ever pushed later, never earlier, and never
/// dropped, however far they drift.
///
/// `segments` must be ordered by `requested_start` (see `SegmentStore::freeze`).
pub fn place(segments: &[SpeechSegment]) -> Vec<PlacedSegment> {
    debug_assert!(
        segments
            .windows(2)
            .all(|pair| pair[0].requested_start <= pair[1].requested_start),
        "segments must be sorted by requested start"
    );

    let (placed, _) = segments.iter().fold(
        (Vec::with_capacity(segments.len()), 0.0_f64),
        |(mut placed, last_end), segment| {
            let placed_start = last_end.max(segment.requested_start);
            placed.push(PlacedSegment {
                segment: segment.clone(),
                placed_start,
            });
            (placed, placed_start + segment.duration)
        },
    );
    placed
}

/// Summary of how much conflict resolution moved things around.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlacementStats {
    pub segments: usize,
    pub pushed: usize,
    pub max_drift: f64,
    pub timeline_end: f64,
}

impl PlacementStats {
    pub fn from_placements(placed: &[PlacedSegment]) -> Self {
        placed.iter().fold(
            Self {
                segments: placed.len(),
                ..Self::default()
            },
            |mut stats, p| {
                let drift = p.drift();
                if drift > 0.0 {
                    stats.pushed += 1;
                }
                stats.max_drift = stats.max_drift.max(drift);
                stats.timeline_end = stats.timeline_end.max(p.end());
                stats
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn segments(timings: &[(f64, f64)]) -> Vec<SpeechSegment> {
        timings.iter()
            .enumerate()
            .map(|(i, (start, dur))| {
                SpeechSegment::new(PathBuf::from(format!("clip_{i}.wav")), *start, *dur, false)
            })
            .collect()
    }

    fn starts(placed: &[PlacedSegment]) -> Vec<f64> {
        placed.iter().map(|p| p.placed_start).collect()
    }

    #[test]
    fn overlapping_segments_are_pushed_later() {
        let placed = place(&segments(&[(0.0, 2.0), (1.0, 3.0), (3.0, 1.0)]));
        assert_eq!(starts(&placed), vec![0.0, 2.0, 5.0]);
    }

    #[test]
    fn empty_input_places_nothing() {
        assert!(place(&[]).is_empty());
    }

    #[test]
    fn gaps_are_preserved() {
        let placed = place(&segments(&[(1.0, 1.0), (10.0, 2.0)]));
        assert_eq!(starts(&placed), vec![1.0, 10.0]);
    }

    #[test]
    fn placements_never_overlap_or_start_early() {
        // dense block of lines that all want roughly the same window
        let input: Vec<(f64, f64)> = (0..200)
            .map(|i| (i as f64 * 0.37, 0.5 + (i % 7) as f64 * 0.3))
            .collect();
        let segs = segments(&input);
        let placed = place(&segs);

        assert_eq!(placed.len(), segs.len());
        for (p, s) in placed.iter().zip(&segs) {
            assert!(p.placed_start >= s.requested_start);
        }
        for pair in placed.windows(2) {
            assert!(pair[1].placed_start >= pair[0].placed_start + pair[0].segment.duration);
        }
    }

    #[test]
    fn scheduling_is_deterministic() {
        let segs = segments(&[(0.0, 1.5), (0.5, 0.5), (0.7, 2.0), (9.0, 1.0)]);
        assert_eq!(place(&segs), place(&segs));
    }

    #[test]
    fn far_drifting_segment_is_still_placed() {
        let placed = place(&segments(&[(0.0, 100.0), (1.0, 1.0)]));
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].placed_start, 100.0);
        assert_eq!(placed[1].drift(), 99.0);
    }

    #[test]
    fn stats_report_pushed_segments_and_drift() {
        let placed = place(&segments(&[(0.0, 2.0), (1.0, 3.0), (3.0, 1.0)]));
        let stats = PlacementStats::from_placements(&placed);

        assert_eq!(stats.segments, 3);
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.max_drift, 2.0);
        assert_eq!(stats.timeline_end, 6.0);
    }
}
