use crate::{ClassifyResponse, ImageClassifier, ProviderError};
use std::path::Path;

#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl ImageClassifier for NoopProvider {
    async fn classify(&self, _image: &Path) -> Result<ClassifyResponse, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
