// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Metric names emitted through the `metrics` facade.
//!
//! The library never installs a recorder; embedders that do should call
//! [`describe_metrics`] once after installing theirs.

pub const APPENDS_TOTAL: &str = "tapestream_appends_total";
pub const APPEND_CONFLICTS_TOTAL: &str = "tapestream_append_conflicts_total";
pub const SEGMENTS_CREATED_TOTAL: &str = "tapestream_segments_created_total";
pub const REPLAY_DURATION_SECONDS: &str = "tapestream_replay_duration_seconds";
pub const RECORDS: &str = "tapestream_records";
pub const LEASE_RENEWAL_FAILURES_TOTAL: &str = "tapestream_lease_renewal_failures_total";

pub fn describe_metrics() {
    metrics::describe_counter!(APPENDS_TOTAL, "Total number of records appended");
    metrics::describe_counter!(
        APPEND_CONFLICTS_TOTAL,
        "Appends rejected because the expected stream version did not match"
    );
    metrics::describe_counter!(SEGMENTS_CREATED_TOTAL, "Segments created by the writer");
    metrics::describe_histogram!(REPLAY_DURATION_SECONDS, "Time taken to replay all segments at open");
    metrics::describe_gauge!(RECORDS, "Records in the global append log");
    metrics::describe_counter!(
        LEASE_RENEWAL_FAILURES_TOTAL,
        "Failed lease renewal attempts"
    );
}
