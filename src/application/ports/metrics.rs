//! Metrics port
//!
//! Components receive a [`MetricsSink`] at construction instead of touching
//! process-wide counters.

use std::sync::Arc;

pub const REQUESTS_TOTAL: &str = "pipeline_requests_total";
pub const RESPONSES_TOTAL: &str = "pipeline_responses_total";
pub const SUCCESS_TOTAL: &str = "pipeline_success_total";
pub const ERRORS_TOTAL: &str = "pipeline_errors_total";
pub const CACHE_HITS_TOTAL: &str = "user_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "user_cache_misses_total";

pub trait MetricsSink: Send + Sync {
    /// Add one to counter `name`, labelled with the operation.
    fn increment(&self, name: &'static str, operation: &str);
}

pub type SharedMetrics = Arc<dyn MetricsSink>;
