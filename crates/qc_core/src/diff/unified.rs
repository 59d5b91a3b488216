//! Line-based unified diff generation.
//!
//! Uses Myers' algorithm in linear space, so large rewritten documents do
//! not need a full edit table. Hunk ranges follow the `diff -u` convention:
//! a one-line range prints only its start, an empty range prints the line
//! before it with length 0. A last line without a newline is marked with
//! `\ No newline at end of file`, which the edit parser skips.

use similar::TextDiff;
use std::time::Duration;

/// Past this, the search settles for a valid but possibly longer diff.
const DIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Unified diff from `old` to `new` labelled `a` / `b`.
pub fn unified_diff(old: &str, new: &str, context: usize) -> String {
    unified_diff_labeled(old, new, "a", "b", context)
}

/// Unified diff from `old` to `new` with explicit file labels.
///
/// Returns an empty string when the texts have the same lines.
pub fn unified_diff_labeled(
    old: &str,
    new: &str,
    from_label: &str,
    to_label: &str,
    context: usize,
) -> String {
    let diff = TextDiff::configure()
        .timeout(DIFF_TIMEOUT)
        .diff_lines(old, new);
    let rendered = diff
        .unified_diff()
        .context_radius(context)
        .header(from_label, to_label)
        .to_string();
    rendered
}
