//! # Quantix Migrate Common
//!
//! Shared utilities for the live-migration crates.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use quantix_migrate_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(workload_id = "i-12345", "Starting live migration");
//! ```
//!
//! Tests that assert on emitted diagnostics install a [`CapturedLogs`]
//! subscriber instead.

pub mod logging;

pub use logging::{init_logging, init_logging_json, CapturedLogs};
