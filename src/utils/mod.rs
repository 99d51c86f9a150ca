//! # Utility Modules
//!
//! Supporting utilities shared by connections and endpoints.
//!
//! ## Components
//! - **Queue**: mutex-guarded double-ended queue used as outgoing buffer and inbox
//! - **Logging**: `tracing-subscriber` installation from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: thread-safe per-endpoint counters

pub mod logging;
pub mod metrics;
pub mod queue;

pub use queue::ThreadSafeQueue;
