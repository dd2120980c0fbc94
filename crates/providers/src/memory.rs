//! In-process object store. Backs tests and `remote.provider = "memory"`.

use crate::{
    validate_name, EntryKind, ListPage, ObjectRef, ObjectStore, ProviderError, RemoteEntry,
};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

const ROOT_ID: u64 = 0;

/// Store operations that can have failures injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    CreateFolder,
    List,
    Upload,
    Delete,
    Download,
    Relocate,
}

#[derive(Debug)]
struct Node {
    parent: Option<u64>,
    name: String,
    kind: EntryKind,
    data: Option<Bytes>,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    nodes: BTreeMap<u64, Node>,
    failures: VecDeque<(StoreOp, ProviderError)>,
    uploads: u64,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_ID,
            Node {
                parent: None,
                name: String::new(),
                kind: EntryKind::Folder,
                data: None,
            },
        );
        Self {
            state: Mutex::new(State {
                next_id: ROOT_ID + 1,
                nodes,
                failures: VecDeque::new(),
                uploads: 0,
            }),
            page_size: page_size.max(1),
        }
    }

    /// Queues `err` to be returned by the next call of `op`.
    pub fn fail_next(&self, op: StoreOp, err: ProviderError) {
        self.lock().failures.push_back((op, err));
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        let state = self.lock();
        parse_ref(object).is_some_and(|id| state.nodes.contains_key(&id))
    }

    /// Number of successful byte uploads so far.
    pub fn upload_count(&self) -> u64 {
        self.lock().uploads
    }

    /// Number of files (not folders) currently stored.
    pub fn file_count(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.kind == EntryKind::File)
            .count()
    }

    /// Slash-separated names from the root to `object`.
    pub fn path_of(&self, object: &ObjectRef) -> Option<String> {
        let state = self.lock();
        let mut id = parse_ref(object)?;
        let mut parts = Vec::new();
        while id != ROOT_ID {
            let node = state.nodes.get(&id)?;
            parts.push(node.name.clone());
            id = node.parent?;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn take_failure(&mut self, op: StoreOp) -> Result<(), ProviderError> {
        if let Some(pos) = self.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = self.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn folder(&self, object: &ObjectRef) -> Result<u64, ProviderError> {
        match parse_ref(object).and_then(|id| self.nodes.get(&id).map(|n| (id, n))) {
            Some((id, node)) if node.kind == EntryKind::Folder => Ok(id),
            Some(_) => Err(ProviderError::InvalidRequest(format!(
                "{object} is not a folder"
            ))),
            None => Err(ProviderError::NotFound(object.to_string())),
        }
    }

    fn child(&self, parent: u64, name: &str) -> Option<(u64, &Node)> {
        self.nodes
            .iter()
            .find(|(_, n)| n.parent == Some(parent) && n.name == name)
            .map(|(id, n)| (*id, n))
    }

    fn insert(&mut self, node: Node) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn remove_tree(&mut self, id: u64) {
        let children: Vec<u64> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(id))
            .map(|(cid, _)| *cid)
            .collect();
        for child in children {
            self.remove_tree(child);
        }
        self.nodes.remove(&id);
    }
}

fn make_ref(id: u64) -> ObjectRef {
    ObjectRef::new(format!("mem:{id}"))
}

fn parse_ref(object: &ObjectRef) -> Option<u64> {
    object.as_str().strip_prefix("mem:")?.parse().ok()
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn root(&self) -> ObjectRef {
        make_ref(ROOT_ID)
    }

    async fn create_folder(
        &self,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let mut state = self.lock();
        state.take_failure(StoreOp::CreateFolder)?;
        let parent_id = state.folder(parent)?;
        match state.child(parent_id, name) {
            Some((id, node)) if node.kind == EntryKind::Folder => return Ok(make_ref(id)),
            Some(_) => {
                return Err(ProviderError::Conflict(format!(
                    "a file named {name} already exists"
                )))
            }
            None => {}
        }
        let id = state.insert(Node {
            parent: Some(parent_id),
            name: name.to_string(),
            kind: EntryKind::Folder,
            data: None,
        });
        Ok(make_ref(id))
    }

    async fn list_children(
        &self,
        parent: &ObjectRef,
        cursor: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        let mut state = self.lock();
        state.take_failure(StoreOp::List)?;
        let parent_id = state.folder(parent)?;
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidRequest(format!("bad cursor {c:?}")))?,
            None => 0,
        };
        let all: Vec<RemoteEntry> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(parent_id))
            .map(|(id, n)| RemoteEntry {
                reference: make_ref(*id),
                name: n.name.clone(),
                kind: n.kind,
            })
            .collect();
        let end = (offset + self.page_size).min(all.len());
        let entries = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| end.to_string());
        Ok(ListPage {
            entries,
            next_cursor,
        })
    }

    async fn upload(
        &self,
        parent: &ObjectRef,
        name: &str,
        bytes: Bytes,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let mut state = self.lock();
        state.take_failure(StoreOp::Upload)?;
        let parent_id = state.folder(parent)?;
        let existing = state
            .child(parent_id, name)
            .map(|(id, node)| (id, node.kind));
        let id = match existing {
            Some((_, EntryKind::Folder)) => {
                return Err(ProviderError::Conflict(format!(
                    "a folder named {name} already exists"
                )))
            }
            Some((id, EntryKind::File)) => {
                if let Some(node) = state.nodes.get_mut(&id) {
                    node.data = Some(bytes);
                }
                id
            }
            None => state.insert(Node {
                parent: Some(parent_id),
                name: name.to_string(),
                kind: EntryKind::File,
                data: Some(bytes),
            }),
        };
        state.uploads += 1;
        Ok(make_ref(id))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<bool, ProviderError> {
        let mut state = self.lock();
        state.take_failure(StoreOp::Delete)?;
        let Some(id) = parse_ref(object) else {
            return Ok(false);
        };
        if id == ROOT_ID {
            return Err(ProviderError::InvalidRequest(
                "refusing to delete the store root".into(),
            ));
        }
        if !state.nodes.contains_key(&id) {
            return Ok(false);
        }
        state.remove_tree(id);
        Ok(true)
    }

    async fn download(&self, object: &ObjectRef) -> Result<Bytes, ProviderError> {
        let mut state = self.lock();
        state.take_failure(StoreOp::Download)?;
        parse_ref(object)
            .and_then(|id| state.nodes.get(&id))
            .and_then(|n| n.data.clone())
            .ok_or_else(|| ProviderError::NotFound(object.to_string()))
    }

    async fn relocate(
        &self,
        object: &ObjectRef,
        parent: &ObjectRef,
        name: &str,
    ) -> Result<ObjectRef, ProviderError> {
        validate_name(name)?;
        let mut state = self.lock();
        state.take_failure(StoreOp::Relocate)?;
        let parent_id = state.folder(parent)?;
        let id = parse_ref(object)
            .filter(|id| state.nodes.contains_key(id))
            .ok_or_else(|| ProviderError::NotFound(object.to_string()))?;
        if let Some((other, _)) = state.child(parent_id, name) {
            if other != id {
                return Err(ProviderError::Conflict(format!(
                    "{name} already exists in destination"
                )));
            }
        }
        if let Some(node) = state.nodes.get_mut(&id) {
            node.parent = Some(parent_id);
            node.name = name.to_string();
        }
        Ok(make_ref(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_folder_is_idempotent() {
        let store = MemoryStore::default();
        let root = store.root();
        let first = store.create_folder(&root, "x").await.unwrap();
        let second = store.create_folder(&root, "x").await.unwrap();
        assert_eq!(first, second);
        let page = store.list_children(&root, None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn delete_twice_reports_absence() {
        let store = MemoryStore::default();
        let root = store.root();
        let file = store
            .upload(&root, "a.png", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(store.delete(&file).await.unwrap());
        assert!(!store.delete(&file).await.unwrap());
    }

    #[tokio::test]
    async fn listing_is_paged() {
        let store = MemoryStore::new(2);
        let root = store.root();
        for name in ["a", "b", "c"] {
            store.create_folder(&root, name).await.unwrap();
        }
        let first = store.list_children(&root, None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.expect("second page");
        let second = store.list_children(&root, Some(&cursor)).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].name, "c");
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn deleting_a_folder_removes_descendants() {
        let store = MemoryStore::default();
        let root = store.root();
        let metal = store.create_folder(&root, "metal").await.unwrap();
        let zinc = store.create_folder(&metal, "zinc").await.unwrap();
        let file = store
            .upload(&zinc, "f.png", Bytes::from_static(b"z"))
            .await
            .unwrap();
        store.delete(&metal).await.unwrap();
        assert!(!store.contains(&zinc));
        assert!(!store.contains(&file));
    }

    #[tokio::test]
    async fn relocate_keeps_reference_and_moves_path() {
        let store = MemoryStore::default();
        let root = store.root();
        let glass = store.create_folder(&root, "glass").await.unwrap();
        let plastic = store.create_folder(&root, "plastic").await.unwrap();
        let file = store
            .upload(&glass, "f.png", Bytes::from_static(b"z"))
            .await
            .unwrap();
        let moved = store.relocate(&file, &plastic, "f.png").await.unwrap();
        assert_eq!(store.path_of(&moved).as_deref(), Some("plastic/f.png"));
        assert_eq!(store.upload_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemoryStore::default();
        store.fail_next(StoreOp::List, ProviderError::Transient("flaky".into()));
        let root = store.root();
        assert!(store.list_children(&root, None).await.is_err());
        assert!(store.list_children(&root, None).await.is_ok());
    }
}
