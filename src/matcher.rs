use facegate_vision::{FaceEncoding, MatchResult};

/// The reference closest to `probe`, with its position in `references`.
///
/// Only the distance decides; `result.is_match` tells whether it is close
/// enough to admit.
pub fn best_match(
    references: &[FaceEncoding],
    probe: &FaceEncoding,
    threshold: f32,
) -> Option<(usize, MatchResult)> {
    references
        .iter()
        .enumerate()
        .map(|(i, r)| (i, MatchResult::from_distance(r.distance(probe), threshold)))
        .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
}
