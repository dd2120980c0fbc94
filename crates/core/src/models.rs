use crate::error::{CuratorError, Result};
use crate::fingerprint::Fingerprint;
use crate::hierarchy::Hierarchy;
use chrono::{DateTime, TimeZone, Utc};
use providers::ObjectRef;
use serde::Serialize;
use storage::models::{DatasetImage, Prediction};

/// Authoritative metadata for one curated image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub id: i64,
    pub fingerprint: Fingerprint,
    pub hierarchy: Hierarchy,
    pub remote_ref: ObjectRef,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DatasetImage> for DatasetRecord {
    type Error = CuratorError;

    fn try_from(row: DatasetImage) -> Result<Self> {
        let levels = row.hierarchy().map_err(|e| {
            CuratorError::Store(format!("record {} has unreadable hierarchy: {e}", row.id))
        })?;
        Ok(Self {
            id: row.id,
            fingerprint: Fingerprint::from_stored(row.fingerprint),
            hierarchy: Hierarchy::new(levels)?,
            remote_ref: ObjectRef::new(row.remote_ref),
            uploaded_by: row.uploaded_by,
            created_at: from_millis(row.created_at)?,
        })
    }
}

/// A stored classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub id: i64,
    pub label: String,
    /// Classifier hierarchy; may be empty or deeper than dataset categories.
    pub hierarchy: Vec<String>,
    pub confidence: f32,
    pub dominant_color: String,
    pub remote_ref: Option<ObjectRef>,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<Prediction> for PredictionRecord {
    type Error = CuratorError;

    fn try_from(row: Prediction) -> Result<Self> {
        let hierarchy = row.hierarchy().map_err(|e| {
            CuratorError::Store(format!("prediction {} has unreadable hierarchy: {e}", row.id))
        })?;
        Ok(Self {
            id: row.id,
            label: row.label,
            hierarchy,
            confidence: row.confidence as f32,
            dominant_color: row.dominant_color,
            remote_ref: row.remote_ref.map(ObjectRef::new),
            timestamp: from_millis(row.created_at)?,
        })
    }
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CuratorError::Store(format!("timestamp {ms} out of range")))
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
