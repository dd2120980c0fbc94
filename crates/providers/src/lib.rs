//! Provider abstractions for remote object stores and image classifiers.
//!
//! Every adapter returns the same normalized shapes (`ObjectRef`,
//! `RemoteEntry`, `ListPage`) no matter what the vendor API hands back.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod dropbox;
pub mod http_classifier;
pub mod local;
pub mod memory;
pub mod noop;
pub mod retry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Opaque identifier of a folder or file inside a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub reference: ObjectRef,
    pub name: String,
    pub kind: EntryKind,
}

/// One page of a folder listing. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    pub next_cursor: Option<String>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Top level of the store; the dataset root folder lives under it.
    fn root(&self) -> ObjectRef;

    /// Returns the existing folder when `name` already exists under `parent`.
    async fn create_folder(&self, parent: &ObjectRef, name: &str)
        -> Result<ObjectRef, ProviderError>;

    async fn list_children(
        &self,
        parent: &ObjectRef,
        cursor: Option<&str>,
    ) -> Result<ListPage, ProviderError>;

    /// Writes `bytes` as `name` under `parent`, replacing a file of the same name.
    async fn upload(
        &self,
        parent: &ObjectRef,
        name: &str,
        bytes: Bytes,
    ) -> Result<ObjectRef, ProviderError>;

    /// Returns `Ok(false)` when the object was already gone.
    async fn delete(&self, object: &ObjectRef) -> Result<bool, ProviderError>;

    async fn download(&self, object: &ObjectRef) -> Result<Bytes, ProviderError>;

    /// Moves `object` to `parent/name`. Stores without a native move fall back
    /// to copy-then-delete.
    async fn relocate(
        &self,
        object: &ObjectRef,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        let bytes = self.download(object).await?;
        let moved = self.upload(parent, name, bytes).await?;
        self.delete(object).await?;
        Ok(moved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    #[serde(default)]
    pub hierarchy: Vec<String>,
    pub confidence: f32,
    #[serde(default = "default_color")]
    pub dominant_color: String,
}

fn default_color() -> String {
    "#000000".to_string()
}

#[async_trait::async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image: &Path) -> Result<ClassifyResponse, ProviderError>;
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), ProviderError> {
    if name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
    {
        return Err(ProviderError::InvalidRequest(format!(
            "invalid object name {name:?}"
        )));
    }
    Ok(())
}
