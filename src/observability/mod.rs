//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch path produces:
//!     → tracing events (structured fields: service, model, instance, scope)
//!     → events.rs EventSink (rate-limit decisions, breaker transitions,
//!       selections, rejections)
//!         → MetricsSink → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (pretty or JSON to stdout)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Sinks are fire-and-forget; a slow or absent recorder never fails a dispatch
//! - Metrics go through the `metrics` facade, so no recorder means no cost beyond a lookup

pub mod events;
pub mod logging;
pub mod metrics;
