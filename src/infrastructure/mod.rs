//! Infrastructure layer
//!
//! Adapters binding the domain ports to real technology: SQLite
//! persistence, figment configuration loading, tracing-based logging.

pub mod config;
pub mod database;
pub mod logging;
