//! Combining the results of several collectors run from the same roots.

use crate::models::PropagationResult;
use tracing::debug;

/// Combines the results of a forward and a reverse collector run from the
/// same single root.
///
/// Totals are summed and one is subtracted, because both walks start at the
/// root and therefore both count it. Per-model maps are merged with later
/// results overwriting earlier ones for the same model; the root's model is
/// the one expected to appear in both, with the same count.
///
/// The fixed correction is only right for a single root. For several roots
/// use [`combine_with_overlap`] with the number of persisted roots.
#[must_use]
pub fn combine(results: impl IntoIterator<Item = PropagationResult>) -> PropagationResult {
    combine_with_overlap(results, 1)
}

/// Like [`combine`], subtracting `overlap` rows counted by more than one
/// collector. The total never goes below zero.
#[must_use]
pub fn combine_with_overlap(
    results: impl IntoIterator<Item = PropagationResult>,
    overlap: usize,
) -> PropagationResult {
    let mut combined = PropagationResult::new();
    for result in results {
        let (total, per_model) = result.into_parts();
        combined.total += total;
        combined.per_model.extend(per_model);
    }
    combined.total = combined.total.saturating_sub(overlap);

    debug!(total = combined.total, overlap, "Combined collector results");
    combined
}
