//! Shared tracing configuration for lifecycle instrumentation.
//!
//! Centralises the log target used by the crate so subscribers can filter
//! provisioning events without pulling in unrelated application logs.

/// Target used by lifecycle spans and logs.
pub(crate) const LOG_TARGET: &str = "pg_pool::lifecycle";
