//! Engine settings.
//!
//! Directories, exclusions, the restore transaction timeout and key
//! derivation cost, with defaults that work out of the box and
//! `STRONGBOX_*` environment overrides.

use crate::error::{SnapshotError, SnapshotResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strongbox_cipher::KdfParams;
use strongbox_compression::ExclusionSet;
use tracing::warn;

/// Settings for [`SnapshotOrchestrator`](crate::SnapshotOrchestrator).
///
/// The database URL is deliberately not a plain field: it is read from the
/// environment when an operation starts, or injected as a secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Uploaded media directory, archived under `backup/uploads/`
    pub media_dir: PathBuf,
    /// Application source tree, archived under `backup/site_code/`
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    /// Parent of the per-operation scratch directories
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Where finished encrypted archives are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Names and paths left out of the source tree
    #[serde(default = "ExclusionSet::source_tree_defaults")]
    pub source_exclusions: ExclusionSet,
    /// Upper bound on the restore transaction, in seconds
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_seconds: u64,
    /// Environment variable holding the database URL
    #[serde(default = "default_database_url_var")]
    pub database_url_var: String,
    /// scrypt cost as log2(N)
    #[serde(default = "default_kdf_log_n")]
    pub kdf_log_n: u8,
    /// scrypt block size
    #[serde(default = "default_kdf_r")]
    pub kdf_r: u32,
    /// scrypt parallelism
    #[serde(default = "default_kdf_p")]
    pub kdf_p: u32,
    #[serde(skip)]
    database_url: Option<Arc<SecretString>>,
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("strongbox")
}

fn default_output_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(mut dir) => {
            dir.push("strongbox");
            dir.push("exports");
            dir
        }
        None => {
            warn!("Could not determine OS data directory, using the temp directory for exports");
            std::env::temp_dir().join("strongbox-exports")
        }
    }
}

fn default_transaction_timeout() -> u64 {
    600 // 10 minutes
}

fn default_database_url_var() -> String {
    "DATABASE_URL".to_string()
}

fn default_kdf_log_n() -> u8 {
    KdfParams::standard().log_n
}

fn default_kdf_r() -> u32 {
    KdfParams::standard().r
}

fn default_kdf_p() -> u32 {
    KdfParams::standard().p
}

impl SnapshotConfig {
    /// Defaults for everything but the media directory
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            source_dir: None,
            temp_root: default_temp_root(),
            output_dir: default_output_dir(),
            source_exclusions: ExclusionSet::source_tree_defaults(),
            transaction_timeout_seconds: default_transaction_timeout(),
            database_url_var: default_database_url_var(),
            kdf_log_n: default_kdf_log_n(),
            kdf_r: default_kdf_r(),
            kdf_p: default_kdf_p(),
            database_url: None,
        }
    }

    /// Build from `STRONGBOX_*` environment variables.
    ///
    /// `STRONGBOX_MEDIA_DIR` defaults to `./uploads`; `STRONGBOX_SOURCE_DIR`,
    /// `STRONGBOX_TEMP_DIR`, `STRONGBOX_OUTPUT_DIR` and
    /// `STRONGBOX_TX_TIMEOUT_SECS` override their defaults when set.
    pub fn from_env() -> Self {
        let media_dir =
            env_path("STRONGBOX_MEDIA_DIR").unwrap_or_else(|| PathBuf::from("./uploads"));
        let mut config = Self::new(media_dir);
        config.source_dir = env_path("STRONGBOX_SOURCE_DIR");
        if let Some(dir) = env_path("STRONGBOX_TEMP_DIR") {
            config.temp_root = dir;
        }
        if let Some(dir) = env_path("STRONGBOX_OUTPUT_DIR") {
            config.output_dir = dir;
        }
        if let Ok(raw) = std::env::var("STRONGBOX_TX_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(seconds) => config.transaction_timeout_seconds = seconds,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid transaction timeout"),
            }
        }
        config
    }

    /// Use `url` instead of reading the environment
    #[must_use]
    pub fn with_database_url(mut self, url: SecretString) -> Self {
        self.database_url = Some(Arc::new(url));
        self
    }

    /// Include the application source tree
    #[must_use]
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Override the scratch root
    #[must_use]
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = dir.into();
        self
    }

    /// Override the archive output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Override the key derivation cost
    #[must_use]
    pub fn with_kdf(mut self, params: KdfParams) -> Self {
        self.kdf_log_n = params.log_n;
        self.kdf_r = params.r;
        self.kdf_p = params.p;
        self
    }

    /// Resolve the database URL, preferring an injected value over the
    /// environment. Fails with a configuration error when neither is set.
    pub fn database_url(&self) -> SnapshotResult<SecretString> {
        if let Some(url) = &self.database_url {
            return Ok(SecretString::from(url.expose_secret().to_string()));
        }
        match std::env::var(&self.database_url_var) {
            Ok(url) if !url.trim().is_empty() => Ok(SecretString::from(url)),
            _ => Err(SnapshotError::Configuration(format!(
                "{} is not set",
                self.database_url_var
            ))),
        }
    }

    /// Key derivation parameters for new archives and for restores
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            log_n: self.kdf_log_n,
            r: self.kdf_r,
            p: self.kdf_p,
        }
    }

    /// Restore transaction timeout
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_seconds)
    }

    /// Source exclusions plus the engine's own directories, so a source
    /// tree that contains them does not archive itself
    pub fn effective_source_exclusions(&self) -> ExclusionSet {
        self.source_exclusions
            .clone()
            .with_path(&self.temp_root)
            .with_path(&self.output_dir)
            .with_path(&self.media_dir)
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
