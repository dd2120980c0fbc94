//! Retried access to the remote object store, scoped to the dataset root.

use crate::hierarchy::Hierarchy;
use bytes::Bytes;
use providers::retry::RetryPolicy;
use providers::{EntryKind, ObjectRef, ObjectStore, ProviderError, RemoteEntry};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteDataset {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    root_name: String,
}

impl RemoteDataset {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy, root_name: impl Into<String>) -> Self {
        Self {
            store,
            retry,
            root_name: root_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Every child of `parent`, following cursors until the listing is exhausted.
    pub async fn list_all(&self, parent: &ObjectRef) -> Result<Vec<RemoteEntry>, ProviderError> {
        let store = &self.store;
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page_cursor = cursor.as_deref();
            let page = self
                .retry
                .run("list_children", move || store.list_children(parent, page_cursor))
                .await?;
            pages += 1;
            entries.extend(page.entries);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(parent = %parent, pages, entries = entries.len(), "listed folder");
        Ok(entries)
    }

    pub async fn find_child(
        &self,
        parent: &ObjectRef,
        name: &str,
        kind: EntryKind,
    ) -> Result<Option<RemoteEntry>, ProviderError> {
        Ok(self
            .list_all(parent)
            .await?
            .into_iter()
            .find(|e| e.kind == kind && e.name == name))
    }

    /// Dataset root folder, matched case-insensitively among top-level folders.
    pub async fn find_root(&self) -> Result<Option<ObjectRef>, ProviderError> {
        let wanted = self.root_name.to_lowercase();
        Ok(self
            .list_all(&self.store.root())
            .await?
            .into_iter()
            .find(|e| e.kind == EntryKind::Folder && e.name.to_lowercase() == wanted)
            .map(|e| e.reference))
    }

    pub async fn ensure_root(&self) -> Result<ObjectRef, ProviderError> {
        if let Some(root) = self.find_root().await? {
            return Ok(root);
        }
        let name = self.root_name.clone();
        self.create_folder(&self.store.root(), &name).await
    }

    /// Folder for `hierarchy` under the dataset root, created level by level.
    pub async fn ensure_path(&self, hierarchy: &Hierarchy) -> Result<ObjectRef, ProviderError> {
        let mut folder = self.ensure_root().await?;
        for level in hierarchy.levels() {
            folder = self.create_folder(&folder, level).await?;
        }
        Ok(folder)
    }

    /// Like `ensure_path` but never creates anything.
    pub async fn resolve_path(
        &self,
        hierarchy: &Hierarchy,
    ) -> Result<Option<ObjectRef>, ProviderError> {
        let Some(mut folder) = self.find_root().await? else {
            return Ok(None);
        };
        for level in hierarchy.levels() {
            match self.find_child(&folder, level, EntryKind::Folder).await? {
                Some(entry) => folder = entry.reference,
                None => return Ok(None),
            }
        }
        Ok(Some(folder))
    }

    /// The entry for `object` when it still sits in the folder of `hierarchy`.
    pub async fn locate(
        &self,
        hierarchy: &Hierarchy,
        object: &ObjectRef,
    ) -> Result<Option<RemoteEntry>, ProviderError> {
        let Some(folder) = self.resolve_path(hierarchy).await? else {
            return Ok(None);
        };
        Ok(self
            .list_all(&folder)
            .await?
            .into_iter()
            .find(|e| e.kind == EntryKind::File && e.reference == *object))
    }

    /// A top-level folder outside the dataset tree, e.g. for prediction images.
    pub async fn ensure_top_folder(&self, name: &str) -> Result<ObjectRef, ProviderError> {
        self.create_folder(&self.store.root(), name).await
    }

    pub async fn create_folder(
        &self,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        let store = &self.store;
        self.retry
            .run("create_folder", move || store.create_folder(parent, name))
            .await
    }

    pub async fn upload(
        &self,
        parent: &ObjectRef,
        name: &str,
        bytes: Bytes,
    ) -> Result<ObjectRef, ProviderError> {
        let store = &self.store;
        self.retry
            .run("upload", move || store.upload(parent, name, bytes.clone()))
            .await
    }

    pub async fn delete(&self, object: &ObjectRef) -> Result<bool, ProviderError> {
        let store = &self.store;
        self.retry
            .run("delete", move || store.delete(object))
            .await
    }

    pub async fn download(&self, object: &ObjectRef) -> Result<Bytes, ProviderError> {
        let store = &self.store;
        self.retry
            .run("download", move || store.download(object))
            .await
    }

    pub async fn relocate(
        &self,
        object: &ObjectRef,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        let store = &self.store;
        self.retry
            .run("relocate", move || store.relocate(object, parent, name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::memory::{MemoryStore, StoreOp};

    fn dataset(store: Arc<MemoryStore>) -> RemoteDataset {
        RemoteDataset::new(store, RetryPolicy::none(), "dataset")
    }

    #[tokio::test]
    async fn list_all_follows_every_page() {
        let store = Arc::new(MemoryStore::new(2));
        for i in 0..5 {
            store
                .create_folder(&store.root(), &format!("f{i}"))
                .await
                .unwrap();
        }
        let remote = dataset(store.clone());
        let all = remote.list_all(&store.root()).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn root_lookup_ignores_case_and_resolve_never_creates() {
        let store = Arc::new(MemoryStore::default());
        let root = store.create_folder(&store.root(), "Dataset").await.unwrap();
        let remote = dataset(store.clone());
        assert_eq!(remote.find_root().await.unwrap(), Some(root.clone()));

        let missing: Hierarchy = "glass/green".parse().unwrap();
        assert!(remote.resolve_path(&missing).await.unwrap().is_none());
        assert!(remote.list_all(&root).await.unwrap().is_empty());

        let made = remote.ensure_path(&missing).await.unwrap();
        assert_eq!(remote.resolve_path(&missing).await.unwrap(), Some(made));
    }

    #[tokio::test]
    async fn locate_finds_objects_only_in_their_folder() {
        let store = Arc::new(MemoryStore::default());
        let remote = dataset(store.clone());
        let glass: Hierarchy = "glass".parse().unwrap();
        let folder = remote.ensure_path(&glass).await.unwrap();
        let object = remote
            .upload(&folder, "a.png", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let found = remote.locate(&glass, &object).await.unwrap().unwrap();
        assert_eq!(found.name, "a.png");
        let metal: Hierarchy = "metal".parse().unwrap();
        assert!(remote.locate(&metal, &object).await.unwrap().is_none());
        remote.delete(&object).await.unwrap();
        assert!(remote.locate(&glass, &object).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::default());
        store.fail_next(StoreOp::CreateFolder, ProviderError::Transient("busy".into()));
        let mut retry = RetryPolicy::none();
        retry.max_attempts = 2;
        let remote = RemoteDataset::new(store.clone(), retry, "dataset");
        assert!(remote.ensure_root().await.is_ok());
    }
}
