use anyhow::Context;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const PREFIX: &str = "curator-";

/// Scratch directory for images handed to the classifier. Staged files are
/// removed when dropped; leftovers from a crashed run are swept on open.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating staging dir {}", dir.display()))?;
        let area = Self { dir };
        let swept = area.sweep();
        if swept > 0 {
            debug!(swept, dir = %area.dir.display(), "removed stale staged files");
        }
        Ok(area)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes staged files left behind by earlier runs.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            let is_ours = entry.file_type().is_file()
                && entry.file_name().to_string_lossy().starts_with(PREFIX);
            if !is_ours {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %entry.path().display(), error = %err, "sweep failed"),
            }
        }
        removed
    }

    pub fn stage(&self, bytes: &[u8], extension: &str) -> anyhow::Result<NamedTempFile> {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(&format!(".{extension}"))
            .tempfile_in(&self.dir)
            .context("creating staged file")?;
        file.write_all(bytes).context("writing staged file")?;
        file.flush()?;
        Ok(file)
    }
}
