//! Prediction flow: stage the image, ask the classifier, record the result.

use crate::error::{CuratorError, Result};
use crate::models::{now_millis, PredictionRecord};
use crate::reconciler::image_extension;
use crate::remote::RemoteDataset;
use crate::staging::StagingArea;
use bytes::Bytes;
use providers::{ImageClassifier, ObjectRef};
use serde::Serialize;
use std::sync::Arc;
use storage::models::NewPrediction;
use storage::PredictionRepo;
use tracing::{info, warn};

pub const UNKNOWN_LABEL: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";
const FALLBACK_COLOR: &str = "#000000";

/// Where classified images are copied, when that is enabled.
#[derive(Clone)]
pub struct PredictionUploads {
    pub remote: RemoteDataset,
    pub folder: String,
}

pub struct Predictor {
    classifier: Arc<dyn ImageClassifier>,
    repo: PredictionRepo,
    staging: StagingArea,
    uploads: Option<PredictionUploads>,
    unknown_below: f32,
}

impl Predictor {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        repo: PredictionRepo,
        staging: StagingArea,
        unknown_below: f32,
    ) -> Self {
        Self {
            classifier,
            repo,
            staging,
            uploads: None,
            unknown_below,
        }
    }

    pub fn with_uploads(mut self, uploads: PredictionUploads) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub async fn predict(&self, bytes: Bytes) -> Result<PredictionRecord> {
        let extension = image_extension(&bytes)?;
        let staged = self
            .staging
            .stage(&bytes, extension)
            .map_err(|e| CuratorError::Store(format!("{e:#}")))?;
        let response = self.classifier.classify(staged.path()).await;
        drop(staged);
        let response = response?;

        let confidence = if response.confidence.is_finite() {
            response.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let label = if confidence < self.unknown_below || response.label.trim().is_empty() {
            UNKNOWN_LABEL.to_string()
        } else {
            response.label
        };
        let remote_ref = self.store_copy(bytes, extension).await;

        let row = self
            .repo
            .insert(&NewPrediction {
                label,
                hierarchy: response.hierarchy,
                confidence: f64::from(confidence),
                dominant_color: normalize_color(&response.dominant_color),
                remote_ref: remote_ref.map(|r| r.as_str().to_string()),
                created_at: now_millis(),
            })
            .await?;
        let record = PredictionRecord::try_from(row)?;
        info!(id = record.id, label = %record.label, confidence, "prediction stored");
        Ok(record)
    }

    /// Best effort: a failed copy is logged and the prediction still stored.
    async fn store_copy(&self, bytes: Bytes, extension: &str) -> Option<ObjectRef> {
        let uploads = self.uploads.as_ref()?;
        let name = format!("{}.{extension}", now_millis());
        let result = async {
            let folder = uploads.remote.ensure_top_folder(&uploads.folder).await?;
            uploads.remote.upload(&folder, &name, bytes).await
        }
        .await;
        match result {
            Ok(reference) => Some(reference),
            Err(err) => {
                warn!(error = %err, "could not store prediction image");
                None
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<PredictionRecord>> {
        self.repo
            .list()
            .await?
            .into_iter()
            .map(PredictionRecord::try_from)
            .collect()
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.repo.delete(id).await?)
    }
}

fn normalize_color(raw: &str) -> String {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("#{}", hex.to_ascii_lowercase())
    } else {
        FALLBACK_COLOR.to_string()
    }
}

/// Flattened prediction for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub id: i64,
    pub label: String,
    pub main_type: String,
    pub sub_type: String,
    pub sub_sub_type: String,
    /// Percent, two decimals.
    pub confidence: f64,
    pub dominant_color: String,
    pub timestamp: String,
}

impl From<&PredictionRecord> for PredictionSummary {
    fn from(record: &PredictionRecord) -> Self {
        let level = |i: usize| {
            record
                .hierarchy
                .get(i)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        Self {
            id: record.id,
            label: record.label.clone(),
            main_type: level(0),
            sub_type: level(1),
            sub_sub_type: level(2),
            confidence: (f64::from(record.confidence) * 10_000.0).round() / 100.0,
            dominant_color: record.dominant_color.clone(),
            timestamp: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
