use crate::dub::segments::PlacedSegment;

/// A bounded slice of the placed timeline rendered in one invocation.
#[derive(Debug, Clone, Copy)]
pub struct MixBatch<'a> {
    pub index: usize,
    pub segments: &'a [PlacedSegment],
}

/// Split placements into consecutive batches of at most `batch_size`.
/// Placements are already ordered by `placed_start`, so every batch covers a
/// contiguous stretch of the timeline.
pub fn partition(placed: &[PlacedSegment], batch_size: usize) -> Vec<MixBatch<'_>> {
    placed
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, segments)| MixBatch { index, segments })
        .collect()
}
