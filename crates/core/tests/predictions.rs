use bytes::Bytes;
use curator_core::classifier::{PredictionSummary, PredictionUploads, Predictor, UNKNOWN_LABEL};
use curator_core::remote::RemoteDataset;
use curator_core::staging::StagingArea;
use curator_core::CuratorError;
use providers::memory::{MemoryStore, StoreOp};
use providers::retry::RetryPolicy;
use providers::{ClassifyResponse, ImageClassifier, ProviderError};
use std::path::Path;
use std::sync::{Arc, Mutex};
use storage::PredictionRepo;
use tempfile::TempDir;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Returns a canned answer and records what it was shown.
struct CannedClassifier {
    response: Result<ClassifyResponse, ProviderError>,
    seen: Mutex<Vec<(String, Vec<u8>)>>,
}

impl CannedClassifier {
    fn answering(label: &str, hierarchy: &[&str], confidence: f32) -> Self {
        Self {
            response: Ok(ClassifyResponse {
                label: label.to_string(),
                hierarchy: hierarchy.iter().map(|s| s.to_string()).collect(),
                confidence,
                dominant_color: "#AABBCC".into(),
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing(err: ProviderError) -> Self {
        Self {
            response: Err(err),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ImageClassifier for CannedClassifier {
    async fn classify(&self, image: &Path) -> Result<ClassifyResponse, ProviderError> {
        let bytes = std::fs::read(image).map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        self.seen
            .lock()
            .unwrap()
            .push((image.to_string_lossy().to_string(), bytes));
        self.response.clone()
    }
}

fn png(seed: &str) -> Bytes {
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(seed.as_bytes());
    Bytes::from(data)
}

async fn predictor(classifier: Arc<CannedClassifier>) -> (Predictor, TempDir) {
    let pool = storage::connect("sqlite::memory:").await.unwrap();
    storage::migrate(&pool).await.unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::open(staging_dir.path()).unwrap();
    let predictor = Predictor::new(classifier, PredictionRepo::new(pool), staging, 0.6);
    (predictor, staging_dir)
}

#[tokio::test]
async fn confident_prediction_is_stored() {
    let classifier = Arc::new(CannedClassifier::answering(
        "pet",
        &["plastic", "pet"],
        0.91,
    ));
    let (predictor, staging_dir) = predictor(classifier.clone()).await;

    let record = predictor.predict(png("bottle")).await.unwrap();
    assert_eq!(record.label, "pet");
    assert_eq!(record.hierarchy, vec!["plastic", "pet"]);
    assert_eq!(record.dominant_color, "#aabbcc");
    assert!(record.remote_ref.is_none());

    let seen = classifier.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, png("bottle").to_vec());
    assert!(seen[0].0.ends_with(".png"));
    // The staged copy is gone once classification finished.
    assert_eq!(std::fs::read_dir(staging_dir.path()).unwrap().count(), 0);

    let listed = predictor.list().await.unwrap();
    assert_eq!(listed, vec![record.clone()]);
    let summary = PredictionSummary::from(&record);
    assert_eq!(summary.main_type, "plastic");
    assert_eq!(summary.sub_sub_type, "N/A");
    assert!((summary.confidence - 91.0).abs() < 0.01);
}

#[tokio::test]
async fn low_confidence_becomes_unknown() {
    let classifier = Arc::new(CannedClassifier::answering("glass", &["glass"], 0.42));
    let (predictor, _dir) = predictor(classifier).await;
    let record = predictor.predict(png("shard")).await.unwrap();
    assert_eq!(record.label, UNKNOWN_LABEL);
    assert_eq!(record.hierarchy, vec!["glass"]);
}

#[tokio::test]
async fn classifier_failure_stores_nothing() {
    let classifier = Arc::new(CannedClassifier::failing(ProviderError::Timeout(
        "predict".into(),
    )));
    let (predictor, _dir) = predictor(classifier).await;
    let err = predictor.predict(png("x")).await.unwrap_err();
    assert!(matches!(err, CuratorError::Transient(_)));
    assert!(predictor.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn non_images_are_rejected_before_classifying() {
    let classifier = Arc::new(CannedClassifier::answering("pet", &[], 0.9));
    let (predictor, _dir) = predictor(classifier.clone()).await;
    let err = predictor
        .predict(Bytes::from_static(b"hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, CuratorError::InvalidInput(_)));
    assert!(classifier.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn image_copies_go_to_the_uploads_folder() {
    let classifier = Arc::new(CannedClassifier::answering("can", &["metal", "can"], 0.8));
    let (predictor, _dir) = predictor(classifier).await;
    let store = Arc::new(MemoryStore::default());
    let predictor = predictor.with_uploads(PredictionUploads {
        remote: RemoteDataset::new(store.clone(), RetryPolicy::none(), "dataset"),
        folder: "uploads".into(),
    });

    let record = predictor.predict(png("can")).await.unwrap();
    let remote_ref = record.remote_ref.expect("copy stored");
    assert!(store.path_of(&remote_ref).unwrap().starts_with("uploads/"));

    // A failing copy does not lose the prediction.
    store.fail_next(StoreOp::Upload, ProviderError::RequestFailed("quota".into()));
    let second = predictor.predict(png("can2")).await.unwrap();
    assert!(second.remote_ref.is_none());
    assert_eq!(predictor.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn deleting_predictions_is_idempotent() {
    let classifier = Arc::new(CannedClassifier::answering("pet", &["plastic"], 0.9));
    let (predictor, _dir) = predictor(classifier).await;
    let record = predictor.predict(png("p")).await.unwrap();
    assert!(predictor.delete(record.id).await.unwrap());
    assert!(!predictor.delete(record.id).await.unwrap());
    assert!(predictor.list().await.unwrap().is_empty());
}
