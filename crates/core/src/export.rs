//! Mirrors the remote dataset into a local directory, one folder per
//! category, for training runs.

use crate::error::{CuratorError, Result};
use crate::remote::RemoteDataset;
use providers::{EntryKind, ObjectRef};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub folders: usize,
    pub files: usize,
    pub bytes: u64,
    /// Remote entries whose names cannot be used locally.
    pub skipped: usize,
}

/// Downloads every folder and file under the dataset root into `dest`.
/// Existing local files with the same names are overwritten.
pub async fn export_dataset(remote: &RemoteDataset, dest: &Path) -> Result<ExportReport> {
    let Some(root) = remote.find_root().await? else {
        return Err(CuratorError::NotFound(format!(
            "dataset root {}",
            remote.root_name()
        )));
    };
    create_dir(dest).await?;
    let mut report = ExportReport::default();
    let mut pending: Vec<(ObjectRef, PathBuf)> = vec![(root, dest.to_path_buf())];
    while let Some((folder, dir)) = pending.pop() {
        for entry in remote.list_all(&folder).await? {
            if !is_local_name(&entry.name) {
                warn!(name = %entry.name, "skipping entry with an unusable name");
                report.skipped += 1;
                continue;
            }
            let target = dir.join(&entry.name);
            match entry.kind {
                EntryKind::Folder => {
                    create_dir(&target).await?;
                    report.folders += 1;
                    pending.push((entry.reference, target));
                }
                EntryKind::File => {
                    let bytes = remote.download(&entry.reference).await?;
                    tokio::fs::write(&target, &bytes)
                        .await
                        .map_err(|e| io_error(&target, e))?;
                    debug!(path = %target.display(), bytes = bytes.len(), "exported object");
                    report.files += 1;
                    report.bytes += bytes.len() as u64;
                }
            }
        }
    }
    info!(
        dest = %dest.display(),
        folders = report.folders,
        files = report.files,
        "dataset exported"
    );
    Ok(report)
}

fn is_local_name(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, err: std::io::Error) -> CuratorError {
    CuratorError::Store(format!("{}: {err}", path.display()))
}
