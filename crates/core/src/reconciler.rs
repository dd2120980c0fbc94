//! Keeps the remote object store and the metadata store in agreement: one
//! record and one remote object per fingerprint.

use crate::error::{CuratorError, Result};
use crate::export::{export_dataset, ExportReport};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::hierarchy::{Hierarchy, MAX_DEPTH};
use crate::locks::FingerprintLocks;
use crate::models::{now_millis, DatasetRecord};
use crate::remote::RemoteDataset;
use crate::tree::{category_tree, CategoryNode};
use bytes::Bytes;
use providers::{EntryKind, ObjectRef, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use storage::models::NewDatasetImage;
use storage::DatasetRepo;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_UPLOADER: &str = "admin";
const INDEX_UPLOADER: &str = "index";

/// What to do when uploaded content already exists under another category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Move the existing object and record to the new category.
    #[default]
    ReparentExisting,
    /// Drop the existing object and record, then store the new upload.
    EvictStale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UploadAction {
    Created,
    /// Content was already filed under the requested category.
    Unchanged,
    /// The record was in place but its remote object was gone; stored again.
    Restored,
    Reparented { from: Hierarchy },
    Replaced { evicted: Hierarchy },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    #[serde(flatten)]
    pub action: UploadAction,
    pub record: DatasetRecord,
}

#[derive(Debug, Clone)]
pub enum RecordKey {
    Fingerprint(Fingerprint),
    Id(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub removed: usize,
    pub removed_ids: Vec<i64>,
    /// Duplicates that could not be removed this pass.
    pub failed: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRemoval {
    pub deleted: String,
    pub parent: Option<Hierarchy>,
    pub folder_existed: bool,
    pub records_removed: usize,
}

pub struct Reconciler {
    remote: RemoteDataset,
    repo: DatasetRepo,
    fingerprinter: Fingerprinter,
    policy: DuplicatePolicy,
    locks: FingerprintLocks,
    /// Uploads share it; category deletes take it exclusively.
    placements: RwLock<()>,
}

impl Reconciler {
    pub fn new(
        remote: RemoteDataset,
        repo: DatasetRepo,
        fingerprinter: Fingerprinter,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            remote,
            repo,
            fingerprinter,
            policy,
            locks: FingerprintLocks::new(),
            placements: RwLock::new(()),
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn remote(&self) -> &RemoteDataset {
        &self.remote
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    pub async fn upload(&self, bytes: Bytes, hierarchy: &Hierarchy) -> Result<UploadOutcome> {
        self.upload_as(bytes, hierarchy, DEFAULT_UPLOADER).await
    }

    /// Files `bytes` under `hierarchy`. Safe to retry after any failure: a
    /// repeated call converges on the same single record and remote object.
    pub async fn upload_as(
        &self,
        bytes: Bytes,
        hierarchy: &Hierarchy,
        uploaded_by: &str,
    ) -> Result<UploadOutcome> {
        let extension = image_extension(&bytes)?;
        let fingerprint = self.fingerprinter.fingerprint(&bytes)?;
        let object_name = format!("{}.{extension}", fingerprint.object_stem());
        let _placement = self.placements.read().await;
        let _guard = self.locks.acquire(&fingerprint).await;

        let outcome = match self.find(&fingerprint).await? {
            Some(existing) if existing.hierarchy == *hierarchy => {
                let present = self
                    .remote
                    .locate(&existing.hierarchy, &existing.remote_ref)
                    .await?
                    .is_some();
                if present {
                    UploadOutcome {
                        action: UploadAction::Unchanged,
                        record: existing,
                    }
                } else {
                    let record = self
                        .restore(existing, &fingerprint, bytes, &object_name)
                        .await?;
                    UploadOutcome {
                        action: UploadAction::Restored,
                        record,
                    }
                }
            }
            Some(existing) => match self.policy {
                DuplicatePolicy::ReparentExisting => {
                    let from = existing.hierarchy.clone();
                    let record = self
                        .reparent(existing, &fingerprint, bytes, hierarchy, &object_name)
                        .await?;
                    UploadOutcome {
                        action: UploadAction::Reparented { from },
                        record,
                    }
                }
                DuplicatePolicy::EvictStale => {
                    let evicted = existing.hierarchy.clone();
                    self.remove_record(&existing).await?;
                    let record = self
                        .create(&fingerprint, bytes, hierarchy, &object_name, uploaded_by)
                        .await?;
                    UploadOutcome {
                        action: UploadAction::Replaced { evicted },
                        record,
                    }
                }
            },
            None => UploadOutcome {
                action: UploadAction::Created,
                record: self
                    .create(&fingerprint, bytes, hierarchy, &object_name, uploaded_by)
                    .await?,
            },
        };
        info!(
            fingerprint = %fingerprint,
            hierarchy = %outcome.record.hierarchy,
            action = ?outcome.action,
            "upload reconciled"
        );
        Ok(outcome)
    }

    async fn create(
        &self,
        fingerprint: &Fingerprint,
        bytes: Bytes,
        hierarchy: &Hierarchy,
        object_name: &str,
        uploaded_by: &str,
    ) -> Result<DatasetRecord> {
        let folder = self.remote.ensure_path(hierarchy).await?;
        let reference = self
            .store_object(&folder, object_name, fingerprint, bytes)
            .await?;
        let row = self
            .repo
            .insert(&NewDatasetImage {
                fingerprint: fingerprint.as_str().to_string(),
                hierarchy: hierarchy.levels().to_vec(),
                remote_ref: reference.as_str().to_string(),
                uploaded_by: uploaded_by.to_string(),
                created_at: now_millis(),
            })
            .await?;
        DatasetRecord::try_from(row)
    }

    /// Stores `bytes` as `name` in `folder`. An object a previous attempt left
    /// under that name is reused only when its content still matches.
    async fn store_object(
        &self,
        folder: &ObjectRef,
        name: &str,
        fingerprint: &Fingerprint,
        bytes: Bytes,
    ) -> Result<ObjectRef> {
        if let Some(entry) = self
            .remote
            .find_child(folder, name, EntryKind::File)
            .await?
        {
            match self.remote.download(&entry.reference).await {
                Ok(stored) if self.holds(&stored, fingerprint) => return Ok(entry.reference),
                Ok(stored) => warn!(
                    remote_ref = %entry.reference,
                    stored = stored.len(),
                    expected = bytes.len(),
                    "replacing an incomplete object"
                ),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(self.remote.upload(folder, name, bytes).await?)
    }

    fn holds(&self, stored: &[u8], fingerprint: &Fingerprint) -> bool {
        self.fingerprinter
            .fingerprint(stored)
            .is_ok_and(|fp| fp == *fingerprint)
    }

    async fn restore(
        &self,
        existing: DatasetRecord,
        fingerprint: &Fingerprint,
        bytes: Bytes,
        object_name: &str,
    ) -> Result<DatasetRecord> {
        warn!(
            id = existing.id,
            remote_ref = %existing.remote_ref,
            "recorded object missing; storing it again"
        );
        let hierarchy = existing.hierarchy.clone();
        let folder = self.remote.ensure_path(&hierarchy).await?;
        let reference = self
            .store_object(&folder, object_name, fingerprint, bytes)
            .await?;
        self.place(existing, &hierarchy, reference).await
    }

    async fn reparent(
        &self,
        existing: DatasetRecord,
        fingerprint: &Fingerprint,
        bytes: Bytes,
        hierarchy: &Hierarchy,
        object_name: &str,
    ) -> Result<DatasetRecord> {
        let current = self
            .remote
            .locate(&existing.hierarchy, &existing.remote_ref)
            .await?;
        let folder = self.remote.ensure_path(hierarchy).await?;
        let reference = match current {
            // The stored object keeps its own name, extension included.
            Some(entry) => match self
                .remote
                .relocate(&entry.reference, &folder, &entry.name)
                .await
            {
                Ok(moved) => moved,
                Err(ProviderError::NotFound(_)) => {
                    self.store_object(&folder, object_name, fingerprint, bytes)
                        .await?
                }
                // A copy from an interrupted move already sits at the target.
                Err(ProviderError::Conflict(_)) => {
                    self.store_object(&folder, &entry.name, fingerprint, bytes)
                        .await?
                }
                Err(err) => return Err(err.into()),
            },
            None => {
                warn!(
                    remote_ref = %existing.remote_ref,
                    "existing object missing; storing the new upload instead"
                );
                self.store_object(&folder, object_name, fingerprint, bytes)
                    .await?
            }
        };
        if reference != existing.remote_ref
            && !self
                .repo
                .is_remote_ref_shared(existing.remote_ref.as_str(), existing.id)
                .await?
        {
            // No-op when the move already took the old object away.
            self.remote.delete(&existing.remote_ref).await?;
        }
        self.place(existing, hierarchy, reference).await
    }

    async fn place(
        &self,
        existing: DatasetRecord,
        hierarchy: &Hierarchy,
        reference: ObjectRef,
    ) -> Result<DatasetRecord> {
        let updated = self
            .repo
            .update_placement(existing.id, hierarchy.levels(), reference.as_str())
            .await?;
        if !updated {
            return Err(CuratorError::Conflict(format!(
                "record {} vanished while being moved",
                existing.id
            )));
        }
        Ok(DatasetRecord {
            hierarchy: hierarchy.clone(),
            remote_ref: reference,
            ..existing
        })
    }

    /// Remote object first, record second, so a failure in between leaves a
    /// record that a retry can still find and finish. An object another
    /// record still points at is left in place.
    async fn remove_record(&self, record: &DatasetRecord) -> Result<()> {
        if self
            .repo
            .is_remote_ref_shared(record.remote_ref.as_str(), record.id)
            .await?
        {
            debug!(remote_ref = %record.remote_ref, "object shared with another record; kept");
        } else if !self.remote.delete(&record.remote_ref).await? {
            debug!(remote_ref = %record.remote_ref, "remote object already absent");
        }
        self.repo.delete(record.id).await?;
        Ok(())
    }

    pub async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<DatasetRecord>> {
        self.repo
            .find_by_fingerprint(fingerprint.as_str())
            .await?
            .map(DatasetRecord::try_from)
            .transpose()
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<DatasetRecord>> {
        self.repo
            .find_by_id(id)
            .await?
            .map(DatasetRecord::try_from)
            .transpose()
    }

    pub async fn list_records(&self) -> Result<Vec<DatasetRecord>> {
        self.repo
            .scan_all()
            .await?
            .into_iter()
            .map(DatasetRecord::try_from)
            .collect()
    }

    /// Removes the content and its record. `Ok(false)` when nothing matched,
    /// which makes repeated deletes harmless.
    pub async fn delete(&self, key: &RecordKey) -> Result<bool> {
        let fingerprint = match key {
            RecordKey::Fingerprint(fp) => fp.clone(),
            RecordKey::Id(id) => match self.repo.find_by_id(*id).await? {
                Some(row) => Fingerprint::from_stored(row.fingerprint),
                None => return Ok(false),
            },
        };
        let _guard = self.locks.acquire(&fingerprint).await;
        let mut removed = false;
        match key {
            RecordKey::Fingerprint(fp) => {
                // Legacy duplicates share the fingerprint; take them all.
                while let Some(record) = self.find(fp).await? {
                    self.remove_record(&record).await?;
                    removed = true;
                }
            }
            RecordKey::Id(id) => {
                if let Some(record) = self.find_by_id(*id).await? {
                    self.remove_record(&record).await?;
                    removed = true;
                }
            }
        }
        info!(fingerprint = %fingerprint, removed, "delete processed");
        Ok(removed)
    }

    /// Repairs duplicates left behind by older data: keeps the earliest
    /// record per fingerprint and removes the rest with their objects.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let rows = self.repo.scan_all().await?;
        let mut report = ReconcileReport {
            scanned: rows.len(),
            ..ReconcileReport::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        for row in rows {
            if seen.insert(row.fingerprint.clone()) {
                continue;
            }
            let id = row.id;
            let fingerprint = Fingerprint::from_stored(row.fingerprint);
            match self.remove_duplicate(&fingerprint, id).await {
                Ok(true) => {
                    report.removed += 1;
                    report.removed_ids.push(id);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(id, fingerprint = %fingerprint, error = %err, "duplicate not removed");
                    report.failed.push(id);
                }
            }
        }
        info!(
            scanned = report.scanned,
            removed = report.removed,
            failed = report.failed.len(),
            "reconcile pass finished"
        );
        Ok(report)
    }

    async fn remove_duplicate(&self, fingerprint: &Fingerprint, id: i64) -> Result<bool> {
        let _guard = self.locks.acquire(fingerprint).await;
        // Re-read under the lock: the scan may be stale.
        let Some(duplicate) = self.find_by_id(id).await? else {
            return Ok(false);
        };
        let Some(kept) = self.find(fingerprint).await? else {
            return Ok(false);
        };
        if kept.id == duplicate.id {
            return Ok(false);
        }
        if duplicate.remote_ref != kept.remote_ref {
            self.remote.delete(&duplicate.remote_ref).await?;
        }
        Ok(self.repo.delete(duplicate.id).await?)
    }

    /// Deletes a category folder with everything in it, plus the records of
    /// every image filed at or below it. Uploads wait until it finishes.
    pub async fn delete_category(&self, hierarchy: &Hierarchy) -> Result<CategoryRemoval> {
        let _exclusive = self.placements.write().await;
        let folder_existed = match self.remote.resolve_path(hierarchy).await? {
            Some(folder) => self.remote.delete(&folder).await?,
            None => false,
        };
        let mut records_removed = 0;
        for row in self.repo.list_in_subtree(hierarchy.levels()).await? {
            let fingerprint = Fingerprint::from_stored(row.fingerprint.clone());
            let _guard = self.locks.acquire(&fingerprint).await;
            if self.repo.delete(row.id).await? {
                records_removed += 1;
            }
        }
        info!(
            category = %hierarchy,
            folder_existed,
            records_removed,
            "category deleted"
        );
        Ok(CategoryRemoval {
            deleted: hierarchy.leaf().to_string(),
            parent: hierarchy.parent(),
            folder_existed,
            records_removed,
        })
    }

    pub async fn categories(&self) -> CategoryNode {
        category_tree(&self.remote).await
    }

    /// Mirrors the dataset folder tree into `dest`.
    pub async fn export(&self, dest: &Path) -> Result<ExportReport> {
        export_dataset(&self.remote, dest).await
    }

    /// Registers remote images that have no record yet, using their folder
    /// path as the hierarchy. Content already recorded elsewhere becomes a
    /// duplicate that `reconcile_all` later removes.
    pub async fn index_remote(&self) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let Some(root) = self.remote.find_root().await? else {
            warn!(root = self.remote.root_name(), "no dataset root to index");
            return Ok(report);
        };
        let mut pending: Vec<(Vec<String>, ObjectRef)> = vec![(Vec::new(), root)];
        while let Some((path, folder)) = pending.pop() {
            for entry in self.remote.list_all(&folder).await? {
                match entry.kind {
                    EntryKind::Folder => {
                        let mut child = path.clone();
                        child.push(entry.name);
                        pending.push((child, entry.reference));
                    }
                    EntryKind::File => {
                        report.scanned += 1;
                        if self.index_file(&path, &entry.reference).await? {
                            report.indexed += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                }
            }
        }
        info!(
            scanned = report.scanned,
            indexed = report.indexed,
            "remote index finished"
        );
        Ok(report)
    }

    async fn index_file(&self, path: &[String], reference: &ObjectRef) -> Result<bool> {
        if path.is_empty() || path.len() > MAX_DEPTH {
            debug!(remote_ref = %reference, depth = path.len(), "outside category depth");
            return Ok(false);
        }
        if self.repo.find_by_remote_ref(reference.as_str()).await?.is_some() {
            return Ok(false);
        }
        let Ok(hierarchy) = Hierarchy::new(path) else {
            return Ok(false);
        };
        let bytes = self.remote.download(reference).await?;
        if image_extension(&bytes).is_err() {
            debug!(remote_ref = %reference, "not an image");
            return Ok(false);
        }
        let fingerprint = match self.fingerprinter.fingerprint(&bytes) {
            Ok(fp) => fp,
            Err(err) => {
                warn!(remote_ref = %reference, error = %err, "could not fingerprint");
                return Ok(false);
            }
        };
        let _placement = self.placements.read().await;
        let _guard = self.locks.acquire(&fingerprint).await;
        if self.repo.find_by_remote_ref(reference.as_str()).await?.is_some() {
            return Ok(false);
        }
        self.repo
            .insert(&NewDatasetImage {
                fingerprint: fingerprint.as_str().to_string(),
                hierarchy: hierarchy.levels().to_vec(),
                remote_ref: reference.as_str().to_string(),
                uploaded_by: INDEX_UPLOADER.to_string(),
                created_at: now_millis(),
            })
            .await?;
        Ok(true)
    }
}

/// File extension for `bytes`, or `InvalidInput` when they are not an image.
pub fn image_extension(bytes: &[u8]) -> Result<&'static str> {
    if bytes.is_empty() {
        return Err(CuratorError::InvalidInput("file is empty".into()));
    }
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(kind.extension()),
        Some(kind) => Err(CuratorError::InvalidInput(format!(
            "expected an image, got {}",
            kind.mime_type()
        ))),
        None => Err(CuratorError::InvalidInput(
            "file is not a recognised image".into(),
        )),
    }
}
