//! Lazy creation of remote directory chains.

use tracing::debug;

use crate::address::Address;
use crate::error::{Result, StoreError};
use crate::store::{resolve, RemoteNode, RemoteStore};

/// Make sure every segment of `address` exists as a directory.
///
/// Walks as far as the existing tree allows, then creates the missing
/// segments in order, each one inside the directory created before it. A
/// fully existing path is a no-op. Returns the directory at the end of the
/// path.
pub async fn ensure_path(store: &dyn RemoteStore, address: &Address) -> Result<RemoteNode> {
    let resolution = resolve(store, address).await?;

    if resolution.is_complete() {
        let node = resolution.deepest();
        if !node.is_dir() {
            return Err(StoreError::NotDirectory);
        }
        return Ok(node.clone());
    }

    let mut node = resolution.deepest().clone();
    if !node.is_dir() {
        // A file sits where a directory is needed somewhere along the path.
        return Err(StoreError::NotDirectory);
    }

    debug!(path = %address, missing = resolution.remaining(), "Materializing remote path");
    for name in &address.segments()[resolution.matched.len()..] {
        node = store.create_dir(name, &node).await?;
        debug!(name = %name, path = %address, "Created remote directory");
    }

    Ok(node)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::store::{NodeKind, ProgressSink};

    /// In-memory tree keyed by handle; handles are slash-joined paths.
    pub(crate) struct MemoryStore {
        nodes: Mutex<HashMap<String, RemoteNode>>,
        pub creates: AtomicUsize,
        pub lookups: AtomicUsize,
        pub fail_create: Option<String>,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            let mut nodes = HashMap::new();
            for root in ["mega", "trash"] {
                nodes.insert(
                    root.to_string(),
                    RemoteNode {
                        handle: root.to_string(),
                        name: root.to_string(),
                        kind: NodeKind::Directory,
                        size: 0,
                    },
                );
            }
            Self {
                nodes: Mutex::new(nodes),
                creates: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                fail_create: None,
            }
        }

        pub(crate) fn add(&self, path: &str, kind: NodeKind, size: u64) {
            let name = path.rsplit('/').next().unwrap().to_string();
            self.nodes.lock().unwrap().insert(
                path.to_string(),
                RemoteNode { handle: path.to_string(), name, kind, size },
            );
        }

        pub(crate) fn get(&self, path: &str) -> Option<RemoteNode> {
            self.nodes.lock().unwrap().get(path).cloned()
        }
    }

    #[async_trait::async_trait]
    impl RemoteStore for MemoryStore {
        fn root(&self) -> RemoteNode {
            self.get("mega").unwrap()
        }

        fn trash(&self) -> RemoteNode {
            self.get("trash").unwrap()
        }

        async fn lookup(&self, root: &RemoteNode, segments: &[String]) -> Result<Vec<RemoteNode>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let mut matched = Vec::new();
            let mut handle = root.handle.clone();
            for seg in segments {
                handle = format!("{}/{}", handle, seg);
                match self.get(&handle) {
                    Some(n) => matched.push(n),
                    None => break,
                }
            }
            Ok(matched)
        }

        async fn children(&self, node: &RemoteNode) -> Result<Vec<RemoteNode>> {
            let prefix = format!("{}/", node.handle);
            Ok(self
                .nodes
                .lock()
                .unwrap()
                .values()
                .filter(|n| n.handle.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
                .cloned()
                .collect())
        }

        async fn create_dir(&self, name: &str, parent: &RemoteNode) -> Result<RemoteNode> {
            if self.fail_create.as_deref() == Some(name) {
                return Err(StoreError::Remote(anyhow::anyhow!("quota exceeded")));
            }
            self.creates.fetch_add(1, Ordering::SeqCst);
            let path = format!("{}/{}", parent.handle, name);
            self.add(&path, NodeKind::Directory, 0);
            Ok(self.get(&path).unwrap())
        }

        async fn upload_file(
            &self,
            _src: &Path,
            _parent: &RemoteNode,
            _name: &str,
            _progress: ProgressSink,
        ) -> Result<RemoteNode> {
            unimplemented!("not used by directory tests")
        }

        async fn download_file(&self, _node: &RemoteNode, _dst: &Path, _progress: ProgressSink) -> Result<()> {
            unimplemented!("not used by directory tests")
        }
    }

    fn addr(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_segments_in_order() {
        let store = MemoryStore::new();
        store.add("mega/annex", NodeKind::Directory, 0);

        let node = ensure_path(&store, &addr("mega:/annex/f87/4d5")).await.unwrap();
        assert_eq!(node.handle, "mega/annex/f87/4d5");
        assert!(store.get("mega/annex/f87").unwrap().is_dir());
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_creates_from_root_when_nothing_matches() {
        let store = MemoryStore::new();
        ensure_path(&store, &addr("trash:/a/b")).await.unwrap();
        assert!(store.get("trash/a/b").is_some());
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let store = MemoryStore::new();
        let target = addr("mega:/annex/s1");
        ensure_path(&store, &target).await.unwrap();
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);

        ensure_path(&store, &target).await.unwrap();
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_root_address_is_noop() {
        let store = MemoryStore::new();
        let node = ensure_path(&store, &addr("mega:/")).await.unwrap();
        assert_eq!(node.handle, "mega");
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_file_at_terminal_segment() {
        let store = MemoryStore::new();
        store.add("mega/annex", NodeKind::File, 10);
        let err = ensure_path(&store, &addr("mega:/annex")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotDirectory));
    }

    #[tokio::test]
    async fn test_file_in_the_middle() {
        let store = MemoryStore::new();
        store.add("mega/annex", NodeKind::File, 10);
        let err = ensure_path(&store, &addr("mega:/annex/s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotDirectory));
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_failure_aborts() {
        let mut store = MemoryStore::new();
        store.fail_create = Some("b".to_string());
        let err = ensure_path(&store, &addr("mega:/a/b/c")).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(store.get("mega/a").is_some());
        assert!(store.get("mega/a/b/c").is_none());
    }
}
