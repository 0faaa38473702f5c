//! Gateway basic library
//!
//! Provides functions shared by the gateway crates:
//! - logging bootstrap
//! - graceful shutdown signals
//! - wire byte formatting for packet logs
//! - process and runtime resource metrics

pub mod hex;
pub mod logging;
pub mod shutdown;
pub mod system_metrics;
