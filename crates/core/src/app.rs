//! Wires configuration into a ready reconciler and predictor.

use crate::classifier::{PredictionUploads, Predictor};
use crate::config::AppConfig;
use crate::fingerprint::Fingerprinter;
use crate::reconciler::Reconciler;
use crate::remote::RemoteDataset;
use crate::staging::StagingArea;
use anyhow::{bail, Context};
use providers::dropbox::{DropboxConfig, DropboxStore};
use providers::http_classifier::{HttpClassifier, HttpClassifierConfig};
use providers::local::{LocalStore, LocalStoreConfig};
use providers::memory::MemoryStore;
use providers::noop::NoopProvider;
use providers::{ImageClassifier, ObjectStore, ProviderError};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{connect, migrate, DatasetRepo, PredictionRepo};
use tracing::info;

pub struct App {
    pub config: AppConfig,
    pub reconciler: Reconciler,
    pub predictor: Predictor,
    pool: SqlitePool,
}

impl App {
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store = build_object_store(&config)?;
        let classifier = build_classifier(&config)?;
        Self::assemble(config, store, classifier).await
    }

    /// Builds the app around an already constructed store and classifier.
    pub async fn assemble(
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn ImageClassifier>,
    ) -> anyhow::Result<Self> {
        let pool = connect(&config.database.path).await.context("db connect")?;
        migrate(&pool).await.context("db migrate")?;

        let remote = RemoteDataset::new(
            store.clone(),
            config.retry_policy(),
            config.remote.dataset_root.clone(),
        );
        let fingerprinter = Fingerprinter::new(config.dataset.fingerprint)?;
        let reconciler = Reconciler::new(
            remote.clone(),
            DatasetRepo::new(pool.clone()),
            fingerprinter,
            config.dataset.policy,
        );

        let staging = StagingArea::open(&config.dataset.staging_dir)?;
        let mut predictor = Predictor::new(
            classifier,
            PredictionRepo::new(pool.clone()),
            staging,
            config.classification.unknown_below,
        );
        if config.predictions.upload_images {
            predictor = predictor.with_uploads(PredictionUploads {
                remote,
                folder: config.predictions.folder.clone(),
            });
        }

        info!(
            store = store.name(),
            policy = ?config.dataset.policy,
            fingerprint = ?config.dataset.fingerprint,
            "curator ready"
        );
        Ok(Self {
            config,
            reconciler,
            predictor,
            pool,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

pub fn build_object_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let remote = &config.remote;
    let store: Arc<dyn ObjectStore> = match remote.provider.as_str() {
        "dropbox" => {
            let token = std::env::var("DROPBOX_TOKEN")
                .context("DROPBOX_TOKEN must be set for the dropbox provider")?;
            let mut cfg = DropboxConfig::new(token);
            cfg.page_size = remote.page_size.clamp(1, 2_000) as u32;
            cfg.timeout = Duration::from_secs(remote.timeout_secs.max(1));
            Arc::new(DropboxStore::new(cfg)?)
        }
        "local" => {
            let root = PathBuf::from(&remote.local_root);
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating local store root {}", root.display()))?;
            Arc::new(LocalStore::new(LocalStoreConfig {
                root,
                page_size: remote.page_size,
            }))
        }
        "memory" => Arc::new(MemoryStore::new(remote.page_size)),
        other => return Err(ProviderError::UnknownProvider(other.to_string()).into()),
    };
    Ok(store)
}

pub fn build_classifier(config: &AppConfig) -> anyhow::Result<Arc<dyn ImageClassifier>> {
    let cls = &config.classification;
    match cls.provider.as_str() {
        "http" => {
            let Some(url) = cls.url.clone() else {
                bail!("classification.url is required for the http classifier");
            };
            let classifier = HttpClassifier::new(HttpClassifierConfig {
                url,
                api_key: std::env::var("CLASSIFIER_API_KEY").ok(),
                timeout: Duration::from_secs(cls.timeout_secs.max(1)),
            })?;
            Ok(Arc::new(classifier))
        }
        "noop" => Ok(Arc::new(NoopProvider)),
        other => Err(ProviderError::UnknownProvider(other.to_string()).into()),
    }
}
