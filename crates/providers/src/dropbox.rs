//! Dropbox HTTP API v2 adapter.
//!
//! References are Dropbox display paths (`/dataset/glass/<name>`); the store
//! root is the empty path.

use crate::{
    validate_name, EntryKind, ListPage, ObjectRef, ObjectStore, ProviderError, RemoteEntry,
};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";

#[derive(Clone)]
pub struct DropboxConfig {
    pub access_token: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub api_url: String,
    pub content_url: String,
}

impl DropboxConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            page_size: 500,
            timeout: Duration::from_secs(30),
            api_url: API_URL.to_string(),
            content_url: CONTENT_URL.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct DropboxStore {
    client: Client,
    cfg: Arc<DropboxConfig>,
}

impl DropboxStore {
    pub fn new(cfg: DropboxConfig) -> Result<Self, ProviderError> {
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

    async fn rpc<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.cfg.api_url, endpoint))
            .bearer_auth(&self.cfg.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(endpoint, e))?;
        check_status(endpoint, resp).await
    }

    async fn list_page(&self, endpoint: &str, body: serde_json::Value) -> Result<ListPage, ProviderError> {
        let resp = self.rpc(endpoint, &body).await?;
        let parsed: ListFolderResult = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let entries = parsed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let kind = match entry.tag.as_str() {
                    "folder" => EntryKind::Folder,
                    "file" => EntryKind::File,
                    _ => return None,
                };
                Some(RemoteEntry {
                    reference: ObjectRef::new(entry.path_display),
                    name: entry.name,
                    kind,
                })
            })
            .collect();
        Ok(ListPage {
            entries,
            next_cursor: parsed.has_more.then_some(parsed.cursor),
        })
    }
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(rename = ".tag", default)]
    tag: String,
    name: String,
    path_display: String,
}

#[derive(Deserialize)]
struct CreateFolderResult {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct RelocationResult {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    error_summary: String,
}

fn child_path(parent: &ObjectRef, name: &str) -> String {
    format!("{}/{}", parent.as_str().trim_end_matches('/'), name)
}

fn map_send_error(endpoint: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("dropbox {endpoint}"))
    } else if err.is_connect() || err.is_request() {
        ProviderError::Transient(format!("dropbox {endpoint}: {err}"))
    } else {
        ProviderError::RequestFailed(format!("dropbox {endpoint}: {err}"))
    }
}

async fn check_status(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or_default();
    let summary = serde_json::from_slice::<ApiError>(&body)
        .map(|e| e.error_summary)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
    Err(classify_failure(endpoint, status, &summary))
}

fn classify_failure(endpoint: &str, status: StatusCode, summary: &str) -> ProviderError {
    let detail = format!("dropbox {endpoint}: status {status} {summary}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ProviderError::Transient(detail);
    }
    if status == StatusCode::CONFLICT {
        if summary.contains("not_found") {
            return ProviderError::NotFound(detail);
        }
        if summary.contains("conflict") {
            return ProviderError::Conflict(detail);
        }
        if summary.contains("too_many_write_operations") {
            return ProviderError::Transient(detail);
        }
    }
    ProviderError::RequestFailed(detail)
}

/// Dropbox-API-Arg must be ASCII; escape everything else as JSON `\u` sequences.
fn api_arg(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            out.push(ch);
        } else {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

#[async_trait::async_trait]
impl ObjectStore for DropboxStore {
    fn name(&self) -> &'static str {
        "dropbox"
    }

    fn root(&self) -> ObjectRef {
        ObjectRef::new("")
    }

    async fn create_folder(
        &self,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let path = child_path(parent, name);
        let body = serde_json::json!({ "path": path, "autorename": false });
        match self.rpc("files/create_folder_v2", &body).await {
            Ok(resp) => {
                let created: CreateFolderResult = resp
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                debug!(path = %created.metadata.path_display, "dropbox folder created");
                Ok(ObjectRef::new(created.metadata.path_display))
            }
            Err(ProviderError::Conflict(detail)) if detail.contains("conflict/folder") => {
                Ok(ObjectRef::new(path))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_children(
        &self,
        parent: &ObjectRef,
        cursor: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        match cursor {
            Some(cursor) => {
                self.list_page(
                    "files/list_folder/continue",
                    serde_json::json!({ "cursor": cursor }),
                )
                .await
            }
            None => {
                self.list_page(
                    "files/list_folder",
                    serde_json::json!({
                        "path": parent.as_str(),
                        "recursive": false,
                        "limit": self.cfg.page_size,
                    }),
                )
                .await
            }
        }
    }

    async fn upload(
        &self,
        parent: &ObjectRef,
        name: &str,
        bytes: Bytes,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let path = child_path(parent, name);
        let arg = api_arg(&serde_json::json!({
            "path": path,
            "mode": "overwrite",
            "mute": true,
        }));
        let resp = self
            .client
            .post(format!("{}/files/upload", self.cfg.content_url))
            .bearer_auth(&self.cfg.access_token)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| map_send_error("files/upload", e))?;
        let resp = check_status("files/upload", resp).await?;
        let meta: Metadata = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(ObjectRef::new(meta.path_display))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<bool, ProviderError> {
        if object.as_str().trim_matches('/').is_empty() {
            return Err(ProviderError::InvalidRequest(
                "refusing to delete the store root".into(),
            ));
        }
        let body = serde_json::json!({ "path": object.as_str() });
        match self.rpc("files/delete_v2", &body).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn download(&self, object: &ObjectRef) -> Result<Bytes, ProviderError> {
        let arg = api_arg(&serde_json::json!({ "path": object.as_str() }));
        let resp = self
            .client
            .post(format!("{}/files/download", self.cfg.content_url))
            .bearer_auth(&self.cfg.access_token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await
            .map_err(|e| map_send_error("files/download", e))?;
        let resp = check_status("files/download", resp).await?;
        resp.bytes()
            .await
            .map_err(|e| map_send_error("files/download", e))
    }

    async fn relocate(
        &self,
        object: &ObjectRef,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let body = serde_json::json!({
            "from_path": object.as_str(),
            "to_path": child_path(parent, name),
            "autorename": false,
        });
        let resp = self.rpc("files/move_v2", &body).await?;
        let moved: RelocationResult = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(ObjectRef::new(moved.metadata.path_display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_arg_escapes_non_ascii() {
        let arg = api_arg(&serde_json::json!({ "path": "/dataset/vidrio/café.png" }));
        assert!(arg.is_ascii());
        assert!(arg.contains("caf\\u00e9.png"));
    }

    #[test]
    fn child_paths_are_rooted() {
        assert_eq!(child_path(&ObjectRef::new(""), "dataset"), "/dataset");
        assert_eq!(
            child_path(&ObjectRef::new("/dataset"), "glass"),
            "/dataset/glass"
        );
    }

    #[test]
    fn conflict_summaries_are_classified() {
        let not_found = classify_failure(
            "files/delete_v2",
            StatusCode::CONFLICT,
            "path_lookup/not_found/..",
        );
        assert!(not_found.is_not_found());

        let exists = classify_failure(
            "files/create_folder_v2",
            StatusCode::CONFLICT,
            "path/conflict/folder/...",
        );
        assert!(matches!(exists, ProviderError::Conflict(_)));

        let throttled = classify_failure("files/upload", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(throttled.is_transient());

        let auth = classify_failure("files/upload", StatusCode::UNAUTHORIZED, "invalid_access_token");
        assert!(!auth.is_transient());
    }
}
