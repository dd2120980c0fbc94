use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DatasetImage {
    pub id: i64,
    pub fingerprint: String,
    pub hierarchy_json: String,
    pub remote_ref: String,
    pub uploaded_by: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl DatasetImage {
    pub fn hierarchy(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.hierarchy_json)
    }
}

#[derive(Debug, Clone)]
pub struct NewDatasetImage {
    pub fingerprint: String,
    pub hierarchy: Vec<String>,
    pub remote_ref: String,
    pub uploaded_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Prediction {
    pub id: i64,
    pub label: String,
    pub hierarchy_json: String,
    pub confidence: f64,
    pub dominant_color: String,
    pub remote_ref: Option<String>,
    pub created_at: i64,
}

impl Prediction {
    pub fn hierarchy(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.hierarchy_json)
    }
}

#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub label: String,
    pub hierarchy: Vec<String>,
    pub confidence: f64,
    pub dominant_color: String,
    pub remote_ref: Option<String>,
    pub created_at: i64,
}
