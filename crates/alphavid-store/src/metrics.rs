//! Record store metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Compare-and-set attempts lost to a concurrent writer.
    pub const CAS_CONFLICTS_TOTAL: &str = "alphavid_store_cas_conflicts_total";

    /// Records removed by the expiry sweep, by kind.
    pub const RECORDS_SWEPT_TOTAL: &str = "alphavid_records_swept_total";
}

pub fn record_cas_conflict() {
    counter!(names::CAS_CONFLICTS_TOTAL).increment(1);
}

pub fn record_swept(kind: &'static str, count: usize) {
    if count > 0 {
        counter!(names::RECORDS_SWEPT_TOTAL, "kind" => kind).increment(count as u64);
    }
}
