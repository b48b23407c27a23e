//! Common infrastructure shared by the strongbox crates
//!
//! This crate provides:
//! - One-time `env_logger` initialization driven by `RUST_LOG`
//! - Structured helpers for logging snapshot stages and cleanup problems
//! - Security event logging with timestamped SUCCESS/FAILURE lines

pub mod logging;

pub use logging::{LoggingTransformer, log_security_event};
