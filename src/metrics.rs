//! Metric names emitted by the library. Recording is a no-op until the host
//! process installs a `metrics` recorder.

use metrics::{describe_counter, describe_histogram, Unit};
use once_cell::sync::OnceCell;

/// One-time registration so series carry descriptions once a recorder exists.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "atf_archive_writes_total",
            "Feed versions committed to the archive."
        );
        describe_counter!(
            "atf_archive_duplicate_content_total",
            "Archived versions whose content matched an earlier version."
        );
        describe_counter!("atf_diff_runs_total", "Feed comparisons computed.");
        describe_histogram!(
            "atf_diff_ms",
            Unit::Milliseconds,
            "Time spent diffing two feed documents."
        );
        describe_counter!(
            "atf_updates_applied_total",
            "Update operations applied by automated updates."
        );
        describe_counter!(
            "atf_assessments_built_total",
            "Impact assessments built from templates."
        );
    });
}
