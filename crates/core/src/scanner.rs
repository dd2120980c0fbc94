//! Collects local image files for batch uploads and feeds them to the
//! reconciler one at a time.

use crate::hierarchy::Hierarchy;
use crate::reconciler::{Reconciler, UploadOutcome};
use anyhow::Context;
use bytes::Bytes;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::warn;
use walkdir::WalkDir;

/// Expands `inputs` into a sorted, de-duplicated file list. Files named
/// explicitly are always kept; directories are walked and filtered by the
/// `accept` globs, skipping hidden entries.
pub async fn collect_images(inputs: &[PathBuf], accept: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let accept_set = build_globset(accept)?;
    let inputs = inputs.to_vec();
    let files = task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            if input.is_file() {
                files.push(input);
                continue;
            }
            if !input.is_dir() {
                anyhow::bail!("{} does not exist", input.display());
            }
            for entry in WalkDir::new(&input)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_file() && accept_set.is_match(entry.file_name()) {
                    files.push(entry.into_path());
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    })
    .await
    .context("file walker panicked")??;
    Ok(files)
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UploadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub uploaded: usize,
    pub failed: usize,
    pub files: Vec<FileResult>,
}

/// Uploads every file under the same hierarchy. A failing file is reported
/// and the batch carries on.
pub async fn upload_files(
    reconciler: &Reconciler,
    files: &[PathBuf],
    hierarchy: &Hierarchy,
    uploaded_by: &str,
) -> BatchReport {
    let mut report = BatchReport::default();
    for path in files {
        let result = match read_file(path).await {
            Ok(bytes) => reconciler
                .upload_as(bytes, hierarchy, uploaded_by)
                .await
                .map_err(anyhow::Error::from),
            Err(err) => Err(err),
        };
        match result {
            Ok(outcome) => {
                report.uploaded += 1;
                report.files.push(FileResult {
                    path: path.clone(),
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "upload failed");
                report.failed += 1;
                report.files.push(FileResult {
                    path: path.clone(),
                    outcome: None,
                    error: Some(format!("{err:#}")),
                });
            }
        }
    }
    report
}

async fn read_file(path: &Path) -> anyhow::Result<Bytes> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = GlobBuilder::new(pat)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("bad accept pattern {pat:?}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept() -> Vec<String> {
        vec!["*.png".into(), "*.jpg".into()]
    }

    #[tokio::test]
    async fn walks_directories_with_accept_globs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
        std::fs::write(root.join("a.PNG"), b"x").unwrap();
        std::fs::write(root.join("nested/b.jpg"), b"x").unwrap();
        std::fs::write(root.join("notes.txt"), b"x").unwrap();
        std::fs::write(root.join(".cache/c.png"), b"x").unwrap();

        let files = collect_images(&[root.to_path_buf()], &accept()).await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
    }

    #[tokio::test]
    async fn explicit_files_bypass_globs() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("photo.heic");
        std::fs::write(&file, b"x").unwrap();
        let files = collect_images(&[file.clone(), file.clone()], &accept())
            .await
            .unwrap();
        assert_eq!(files, vec![file]);
    }

    #[tokio::test]
    async fn missing_inputs_are_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(collect_images(&[missing], &accept()).await.is_err());
    }
}
