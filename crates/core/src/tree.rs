//! Category tree built from the folder structure of the remote store.

use crate::remote::RemoteDataset;
use providers::{EntryKind, ObjectRef, ProviderError};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A folder in the category tree. Serializes as a nested mapping from child
/// name to child subtree, with leaves as empty mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryNode {
    pub name: String,
    pub children: BTreeMap<String, CategoryNode>,
}

impl CategoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Node reached by following `path` from here.
    pub fn get(&self, path: &[&str]) -> Option<&CategoryNode> {
        path.iter()
            .try_fold(self, |node, name| node.children.get(*name))
    }

    /// Total number of folders below this node.
    pub fn descendant_count(&self) -> usize {
        self.children
            .values()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    fn descend_mut(&mut self, path: &[String]) -> Option<&mut CategoryNode> {
        path.iter()
            .try_fold(self, |node, name| node.children.get_mut(name))
    }
}

impl Serialize for CategoryNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.children.serialize(serializer)
    }
}

/// Builds the tree under `root`. Every page of a folder's listing is read
/// before any child is descended into, so the result does not depend on the
/// store's page size. Files are ignored. The store is assumed to be acyclic.
pub async fn build_tree(
    remote: &RemoteDataset,
    root: &ObjectRef,
    name: &str,
) -> Result<CategoryNode, ProviderError> {
    let mut tree = CategoryNode::new(name);
    let mut pending: Vec<(Vec<String>, ObjectRef)> = vec![(Vec::new(), root.clone())];
    while let Some((path, folder)) = pending.pop() {
        let entries = remote.list_all(&folder).await?;
        let Some(node) = tree.descend_mut(&path) else {
            continue;
        };
        for entry in entries.into_iter().filter(|e| e.kind == EntryKind::Folder) {
            // Same-named sibling folders merge into one category.
            node.children
                .entry(entry.name.clone())
                .or_insert_with(|| CategoryNode::new(entry.name.clone()));
            let mut child_path = path.clone();
            child_path.push(entry.name);
            pending.push((child_path, entry.reference));
        }
    }
    Ok(tree)
}

/// Tree for display. Falls back to the store's top level when the dataset
/// root is missing, and to an empty tree when the store cannot be read.
pub async fn category_tree(remote: &RemoteDataset) -> CategoryNode {
    let (root, name) = match remote.find_root().await {
        Ok(Some(root)) => (root, remote.root_name().to_string()),
        Ok(None) => {
            warn!(
                root = remote.root_name(),
                "dataset root folder missing; listing top-level folders"
            );
            (remote.store().root(), String::new())
        }
        Err(err) => {
            warn!(error = %err, "could not locate dataset root");
            return CategoryNode::default();
        }
    };
    match build_tree(remote, &root, &name).await {
        Ok(tree) => {
            info!(categories = tree.descendant_count(), "category tree built");
            tree
        }
        Err(err) => {
            warn!(error = %err, "category tree unavailable");
            CategoryNode::default()
        }
    }
}
