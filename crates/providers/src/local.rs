//! Object store backed by a directory on local disk.
//!
//! References are slash-separated paths relative to the configured root; the
//! root itself is the empty reference.

use crate::{
    join_path, validate_name, EntryKind, ListPage, ObjectRef, ObjectStore, ProviderError,
    RemoteEntry,
};
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Staged uploads start with a dot so listings skip them.
const PARTIAL_PREFIX: &str = ".partial-";

#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub root: PathBuf,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    cfg: LocalStoreConfig,
}

impl LocalStore {
    pub fn new(cfg: LocalStoreConfig) -> Self {
        Self { cfg }
    }

    fn resolve(&self, object: &ObjectRef) -> Result<PathBuf, ProviderError> {
        let mut path = self.cfg.root.clone();
        for part in object.as_str().split('/').filter(|p| !p.is_empty()) {
            validate_name(part)?;
            path.push(part);
        }
        Ok(path)
    }
}

fn map_io(err: std::io::Error, what: &Path) -> ProviderError {
    match err.kind() {
        ErrorKind::NotFound => ProviderError::NotFound(what.display().to_string()),
        ErrorKind::AlreadyExists => ProviderError::Conflict(what.display().to_string()),
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            ProviderError::Transient(format!("{}: {err}", what.display()))
        }
        _ => ProviderError::RequestFailed(format!("{}: {err}", what.display())),
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
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
        let reference = ObjectRef::new(join_path(parent.as_str(), name));
        let path = self.resolve(&reference)?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => debug!(path = %path.display(), "created folder"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !path.is_dir() {
                    return Err(ProviderError::Conflict(format!(
                        "{} exists and is not a folder",
                        path.display()
                    )));
                }
            }
            Err(e) => return Err(map_io(e, &path)),
        }
        Ok(reference)
    }

    async fn list_children(
        &self,
        parent: &ObjectRef,
        cursor: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        let dir = self.resolve(parent)?;
        let mut read = tokio::fs::read_dir(&dir).await.map_err(|e| map_io(e, &dir))?;
        let mut all = Vec::new();
        while let Some(entry) = read.next_entry().await.map_err(|e| map_io(e, &dir))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| map_io(e, &dir))?;
            let kind = if file_type.is_dir() {
                EntryKind::Folder
            } else {
                EntryKind::File
            };
            all.push(RemoteEntry {
                reference: ObjectRef::new(join_path(parent.as_str(), &name)),
                name,
                kind,
            });
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));

        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidRequest(format!("bad cursor {c:?}")))?,
            None => 0,
        };
        let page_size = self.cfg.page_size.max(1);
        let end = (offset + page_size).min(all.len());
        let entries = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        Ok(ListPage {
            entries,
            next_cursor: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn upload(
        &self,
        parent: &ObjectRef,
        name: &str,
        bytes: Bytes,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let dir = self.resolve(parent)?;
        if !dir.is_dir() {
            return Err(ProviderError::NotFound(dir.display().to_string()));
        }
        let reference = ObjectRef::new(join_path(parent.as_str(), name));
        let path = self.resolve(&reference)?;
        let len = bytes.len();
        let target = path.clone();
        // Stage beside the target and rename, so an interrupted write never
        // leaves a partial file under the final name.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .tempfile_in(&dir)?;
            staged.write_all(&bytes)?;
            staged.as_file().sync_all()?;
            staged.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| ProviderError::RequestFailed(format!("upload task: {e}")))?
        .map_err(|e| map_io(e, &path))?;
        debug!(path = %path.display(), bytes = len, "wrote object");
        Ok(reference)
    }

    async fn delete(&self, object: &ObjectRef) -> Result<bool, ProviderError> {
        if object.as_str().trim_matches('/').is_empty() {
            return Err(ProviderError::InvalidRequest(
                "refusing to delete the store root".into(),
            ));
        }
        let path = self.resolve(object)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(map_io(e, &path)),
        };
        let res = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match res {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e, &path)),
        }
    }

    async fn download(&self, object: &ObjectRef) -> Result<Bytes, ProviderError> {
        let path = self.resolve(object)?;
        let data = tokio::fs::read(&path).await.map_err(|e| map_io(e, &path))?;
        Ok(Bytes::from(data))
    }

    async fn relocate(
        &self,
        object: &ObjectRef,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let from = self.resolve(object)?;
        let reference = ObjectRef::new(join_path(parent.as_str(), name));
        let to = self.resolve(&reference)?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| map_io(e, &from))?;
        Ok(reference)
    }
}
