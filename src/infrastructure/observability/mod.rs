//! Push-based observability: no HTTP server, no incoming connections.
//! Metrics are collected into in-process Prometheus gauges/counters and
//! periodically flushed as a structured JSON log line.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
