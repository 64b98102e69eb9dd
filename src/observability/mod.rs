//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! cache / dispatcher / binder produce:
//!     → tracing events   (structured fields: base, path, name, kind)
//!     → metrics.rs       (counters and gauges through the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs installs a fmt subscriber for the CLI
//!     → embedding applications install their own subscriber / recorder
//! ```
//!
//! # Design Decisions
//! - The library never installs a global subscriber or recorder itself
//! - Without a recorder, metric calls are no-ops

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
