use crate::{ClassifyResponse, ImageClassifier, ProviderError};
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Talks to a model-serving endpoint that accepts raw image bytes and answers
/// with the top classification.
#[derive(Clone)]
pub struct HttpClassifierConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    cfg: Arc<HttpClassifierConfig>,
}

impl HttpClassifier {
    pub fn new(cfg: HttpClassifierConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }
}

/// Servers answer either with a bare classification or wrapped in `objects`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PredictBody {
    Wrapped { objects: Vec<ClassifyResponse> },
    Bare(ClassifyResponse),
}

impl PredictBody {
    fn into_top(self) -> Option<ClassifyResponse> {
        match self {
            PredictBody::Wrapped { objects } => objects.into_iter().next(),
            PredictBody::Bare(resp) => Some(resp),
        }
    }
}

#[async_trait::async_trait]
impl ImageClassifier for HttpClassifier {
    async fn classify(&self, image: &Path) -> Result<ClassifyResponse, ProviderError> {
        let data = tokio::fs::read(image)
            .await
            .map_err(|e| ProviderError::InvalidRequest(format!("{}: {e}", image.display())))?;

        let mut builder = self
            .client
            .post(&self.cfg.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(Bytes::from(data));
        if let Some(key) = &self.cfg.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout("classifier".into())
            } else if e.is_connect() {
                ProviderError::Transient(e.to_string())
            } else {
                ProviderError::RequestFailed(e.to_string())
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            let detail = format!("status {} body {:?}", status, body);
            return Err(if status.is_server_error() {
                ProviderError::Transient(detail)
            } else {
                ProviderError::RequestFailed(detail)
            });
        }
        let parsed: PredictBody = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parsed
            .into_top()
            .ok_or_else(|| ProviderError::InvalidResponse("no classification returned".into()))
    }
}
