//! Metrics emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the application installs a recorder.

/// Metric label values
pub(crate) mod labels {
    pub const STATUS_OK: &str = "ok";
    pub const STATUS_ERROR: &str = "error";
}

pub(crate) mod counters {
    /// One authentication exchange finished (successfully or not)
    pub fn auth_attempted(mechanism: &'static str) {
        metrics::counter!("pgwire_lite_auth_attempts_total", "mechanism" => mechanism).increment(1);
    }

    /// Authentication failed; `reason` is an error category
    pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
        metrics::counter!(
            "pgwire_lite_auth_failures_total",
            "mechanism" => mechanism,
            "reason" => reason
        )
        .increment(1);
    }

    /// A query finished with `status` (`ok` or `error`)
    pub fn query_completed(status: &'static str) {
        metrics::counter!("pgwire_lite_queries_total", "status" => status).increment(1);
    }
}

pub(crate) mod histograms {
    pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
        metrics::histogram!("pgwire_lite_auth_duration_ms", "mechanism" => mechanism)
            .record(duration_ms as f64);
    }

    pub fn query_duration(duration_ms: u64) {
        metrics::histogram!("pgwire_lite_query_duration_ms").record(duration_ms as f64);
    }
}
