use crate::fingerprint::FingerprintMode;
use crate::reconciler::DuplicatePolicy;
use providers::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub dataset: DatasetConfig,
    pub retry: RetryConfig,
    pub classification: ClassificationConfig,
    pub predictions: PredictionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/curator.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `dropbox`, `local` or `memory`.
    pub provider: String,
    /// Directory backing the `local` provider.
    pub local_root: String,
    /// Name of the top-level folder holding the category tree.
    pub dataset_root: String,
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            local_root: "data/remote".into(),
            dataset_root: "dataset".into(),
            page_size: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub policy: DuplicatePolicy,
    pub fingerprint: FingerprintMode,
    /// File-name globs picked up when a directory is uploaded.
    pub accept: Vec<String>,
    pub staging_dir: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            policy: DuplicatePolicy::default(),
            fingerprint: FingerprintMode::default(),
            accept: ["*.jpg", "*.jpeg", "*.png", "*.webp", "*.bmp", "*.gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            staging_dir: "data/staging".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// `http` or `noop`.
    pub provider: String,
    pub url: Option<String>,
    /// Predictions below this confidence are labelled `Unknown`.
    pub unknown_below: f32,
    pub timeout_secs: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            provider: "noop".into(),
            url: None,
            unknown_below: 0.6,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Also keep a copy of every classified image in the remote store.
    pub upload_images: bool,
    pub folder: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            upload_images: false,
            folder: "uploads".into(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            call_timeout: Duration::from_secs(self.remote.timeout_secs.max(1)),
        }
    }
}

/// Layers the config file (explicit or `config/default`) under
/// `CURATOR__SECTION__KEY` environment overrides.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("CURATOR")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
