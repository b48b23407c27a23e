//! Production logging infrastructure
//!
//! Provides env_logger-based logging with secure handling of sensitive data
//! and proper integration with the standard log crate.

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Once;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static INIT_LOGGER: Once = Once::new();

/// Logging entry points shared by every strongbox crate
pub struct LoggingTransformer;

impl LoggingTransformer {
    /// Initialize logging system (call once at application startup)
    ///
    /// Configure logging levels via the `RUST_LOG` environment variable:
    /// - `RUST_LOG=info` - recommended for production
    /// - `RUST_LOG=strongbox_snapshot=debug` - verbose orchestrator output
    pub fn init() {
        INIT_LOGGER.call_once(|| {
            env_logger::Builder::from_default_env()
                .format_timestamp_micros()
                .init();

            info!("Structured logging initialized");
        });
    }

    /// Initialize logging for test environments
    ///
    /// Safe to call from every test; repeated initialization is ignored.
    pub fn init_test() {
        let _ = env_logger::Builder::from_default_env()
            .is_test(true)
            .try_init();
    }

    /// Log a stage transition of a long-running snapshot operation
    pub fn log_stage(operation: &str, stage: &str) {
        info!("{operation}: entering stage {stage}");
    }

    /// Log completion of a snapshot operation with its wall-clock duration
    pub fn log_operation_complete(operation: &str, elapsed: Duration, success: bool) {
        let millis = elapsed.as_millis();
        if success {
            info!("{operation} completed in {millis}ms");
        } else {
            warn!("{operation} failed after {millis}ms");
        }
    }

    /// Secure logging of cryptographic errors
    ///
    /// Logs the error type only, never key material or plaintext.
    pub fn log_crypto_error(operation: &str, error: &dyn std::error::Error) {
        error!(
            "Cryptographic operation failed: {} (error_type: {})",
            operation,
            std::any::type_name_of_val(error)
        );
    }

    /// Log a scratch directory that could not be removed
    ///
    /// Cleanup failures are reported but never replace the primary result.
    pub fn log_cleanup_warning(path: &Path, error: &dyn std::error::Error) {
        warn!(
            "Workspace cleanup failed for {}: {error}",
            path.display()
        );
    }

    /// Log an optional table that was skipped during export or restore
    pub fn log_partial_table(operation: &str, table: &str, reason: &str) {
        warn!("{operation}: optional table '{table}' skipped: {reason}");
    }

    /// Log a table-level row movement at debug level
    pub fn log_table_rows(operation: &str, table: &str, rows: u64) {
        debug!("{operation}: table '{table}' -> {rows} rows");
    }

    /// Hash a sensitive identifier so it can appear in logs
    ///
    /// Only the first 8 bytes of the SHA-256 digest are kept; enough to
    /// correlate log lines without exposing the value.
    #[must_use]
    pub fn secure_hash(value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        hex::encode(&digest[..8])
    }
}

/// Logs a security-relevant event with standardized formatting
///
/// # Parameters
/// * `event_type` - Type of security event (e.g., "SNAPSHOT_CREATE", "SNAPSHOT_RESTORE")
/// * `details` - Additional details about the event
/// * `success` - Whether the operation was successful
pub fn log_security_event(event_type: &str, details: &str, success: bool) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let status = if success { "SUCCESS" } else { "FAILURE" };

    if success {
        info!("[{}] {} - {}: {}", timestamp, status, event_type, details);
    } else {
        warn!("[{}] {} - {}: {}", timestamp, status, event_type, details);
    }
}
