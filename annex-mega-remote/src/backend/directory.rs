//! Local directory store.
//!
//! Keeps each account under `{base}/{user}/` with the two trees `mega/` and
//! `trash/`. Writes go to `{base}/{user}/.staging/` first and are renamed
//! into place after an fsync, so a partial copy never shows up in the tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use annex_mega_common::address::{PRIMARY_ROOT, TRASH_ROOT};
use annex_mega_common::error::{Result, StoreError};
use annex_mega_common::store::{NodeKind, ProgressSink, RemoteNode, RemoteStore, StoreConnector};

const CREDENTIALS_FILE: &str = ".credentials";
const STAGING_DIR: &str = ".staging";

pub struct DirectoryConnector {
    base_path: PathBuf,
    chunk_size: usize,
}

impl DirectoryConnector {
    pub fn new(base_path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self { base_path: base_path.into(), chunk_size }
    }
}

fn fingerprint(user: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl StoreConnector for DirectoryConnector {
    async fn login(&self, user: &str, password: &str) -> Result<Arc<dyn RemoteStore>> {
        if user.is_empty() || password.is_empty() {
            return Err(StoreError::Remote(anyhow!("Empty user name or password")));
        }
        if !valid_name(user) {
            return Err(StoreError::Remote(anyhow!("Invalid user name: {}", user)));
        }

        let account = self.base_path.join(user);
        for dir in [PRIMARY_ROOT, TRASH_ROOT, STAGING_DIR] {
            fs::create_dir_all(account.join(dir)).await?;
        }

        let expected = fingerprint(user, password);
        let cred_path = account.join(CREDENTIALS_FILE);
        match fs::read_to_string(&cred_path).await {
            Ok(stored) => {
                if stored.trim() != expected {
                    warn!(user = %user, "Rejected login with wrong password");
                    return Err(StoreError::Remote(anyhow!("Invalid credentials for {}", user)));
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&cred_path, &expected).await?;
                info!(user = %user, "Registered new directory store account");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Arc::new(DirectoryStore { account, chunk_size: self.chunk_size }))
    }
}

pub struct DirectoryStore {
    account: PathBuf,
    chunk_size: usize,
}

/// A name that can stand for exactly one entry of a directory.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

fn root_node(name: &str) -> RemoteNode {
    RemoteNode {
        handle: name.to_string(),
        name: name.to_string(),
        kind: NodeKind::Directory,
        size: 0,
    }
}

fn node_from_metadata(handle: String, name: &str, meta: &std::fs::Metadata) -> RemoteNode {
    if meta.is_dir() {
        RemoteNode { handle, name: name.to_string(), kind: NodeKind::Directory, size: 0 }
    } else {
        RemoteNode { handle, name: name.to_string(), kind: NodeKind::File, size: meta.len() }
    }
}

impl DirectoryStore {
    fn full_path(&self, handle: &str) -> PathBuf {
        self.account.join(handle)
    }

    fn staging_path(&self) -> PathBuf {
        self.account
            .join(STAGING_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4()))
    }

    async fn stat(&self, handle: String, name: &str) -> Result<RemoteNode> {
        let meta = fs::metadata(self.full_path(&handle)).await?;
        Ok(node_from_metadata(handle, name, &meta))
    }

    /// Copy `src` to `tmp` in chunks, reporting each chunk, then fsync.
    async fn copy_chunked(&self, src: &Path, tmp: &Path, progress: &ProgressSink) -> Result<u64> {
        let mut reader = fs::File::open(src).await?;
        let mut writer = fs::File::create(tmp).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            total += n as u64;
            // The reporter may already be gone; progress is best effort.
            let _ = progress.send(n as u64);
        }

        writer.flush().await?;
        writer.sync_all().await?;
        Ok(total)
    }

    /// Copy then rename into place, removing the temp file on failure.
    async fn copy_into_place(
        &self,
        src: &Path,
        tmp: &Path,
        dest: &Path,
        progress: &ProgressSink,
    ) -> Result<u64> {
        let result = match self.copy_chunked(src, tmp, progress).await {
            Ok(n) => fs::rename(tmp, dest).await.map(|_| n).map_err(StoreError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = fs::remove_file(tmp).await;
        }
        result
    }
}

#[async_trait]
impl RemoteStore for DirectoryStore {
    fn root(&self) -> RemoteNode {
        root_node(PRIMARY_ROOT)
    }

    fn trash(&self) -> RemoteNode {
        root_node(TRASH_ROOT)
    }

    async fn lookup(&self, root: &RemoteNode, segments: &[String]) -> Result<Vec<RemoteNode>> {
        let mut matched = Vec::with_capacity(segments.len());
        let mut current = root.clone();

        for name in segments {
            if !current.is_dir() || !valid_name(name) {
                break;
            }
            let handle = format!("{}/{}", current.handle, name);
            let meta = match fs::metadata(self.full_path(&handle)).await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            };
            current = node_from_metadata(handle, name, &meta);
            matched.push(current.clone());
        }

        Ok(matched)
    }

    async fn children(&self, node: &RemoteNode) -> Result<Vec<RemoteNode>> {
        if !node.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(self.full_path(&node.handle)).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = entry.metadata().await?;
            children.push(node_from_metadata(format!("{}/{}", node.handle, name), &name, &meta));
        }
        Ok(children)
    }

    async fn create_dir(&self, name: &str, parent: &RemoteNode) -> Result<RemoteNode> {
        if !valid_name(name) {
            return Err(StoreError::InvalidPath);
        }
        if !parent.is_dir() {
            return Err(StoreError::NotDirectory);
        }
        let handle = format!("{}/{}", parent.handle, name);
        fs::create_dir(self.full_path(&handle)).await?;
        debug!(handle = %handle, "Directory store mkdir");
        Ok(RemoteNode { handle, name: name.to_string(), kind: NodeKind::Directory, size: 0 })
    }

    async fn upload_file(
        &self,
        src: &Path,
        parent: &RemoteNode,
        name: &str,
        progress: ProgressSink,
    ) -> Result<RemoteNode> {
        if !valid_name(name) {
            return Err(StoreError::InvalidPath);
        }
        if !parent.is_dir() {
            return Err(StoreError::NotDirectory);
        }

        let handle = format!("{}/{}", parent.handle, name);
        let dest = self.full_path(&handle);
        let tmp = self.staging_path();
        let bytes = self.copy_into_place(src, &tmp, &dest, &progress).await?;

        debug!(handle = %handle, bytes, "Directory store upload complete");
        self.stat(handle, name).await
    }

    async fn download_file(&self, node: &RemoteNode, dst: &Path, progress: ProgressSink) -> Result<()> {
        if !node.is_file() {
            return Err(StoreError::NotAFile);
        }

        let src = self.full_path(&node.handle);
        let tmp = match dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.join(format!(".{}.tmp", uuid::Uuid::new_v4())),
            None => PathBuf::from(format!(".{}.tmp", uuid::Uuid::new_v4())),
        };
        let bytes = self.copy_into_place(&src, &tmp, dst, &progress).await?;

        debug!(handle = %node.handle, dst = %dst.display(), bytes, "Directory store download complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn login(base: &Path) -> Arc<dyn RemoteStore> {
        DirectoryConnector::new(base, 4).login("alice", "s3cret").await.unwrap()
    }

    #[tokio::test]
    async fn test_login_creates_account_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(dir.path()).await;
        assert!(dir.path().join("alice/mega").is_dir());
        assert!(dir.path().join("alice/trash").is_dir());
        assert_eq!(store.root().name, "mega");
        assert_eq!(store.trash().name, "trash");
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let connector = DirectoryConnector::new(dir.path(), 4);
        connector.login("alice", "s3cret").await.unwrap();
        assert!(connector.login("alice", "s3cret").await.is_ok());
        let err = connector.login("alice", "guess").await.err().unwrap();
        assert_eq!(err.to_string(), "Invalid credentials for alice");
    }

    #[tokio::test]
    async fn test_login_rejects_path_like_user() {
        let dir = tempfile::tempdir().unwrap();
        let connector = DirectoryConnector::new(dir.path(), 4);
        assert!(connector.login("../etc", "x").await.is_err());
        assert!(connector.login("", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_partial_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(dir.path()).await;
        let root = store.root();
        let annex = store.create_dir("annex", &root).await.unwrap();
        store.create_dir("s1", &annex).await.unwrap();

        let segs: Vec<String> = ["annex", "s1", "k1"].iter().map(|s| s.to_string()).collect();
        let matched = store.lookup(&root, &segs).await.unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[1].handle, "mega/annex/s1");
        assert!(matched[1].is_dir());
    }

    #[tokio::test]
    async fn test_lookup_stops_at_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(dir.path()).await;
        let root = store.root();
        store.create_dir("annex", &root).await.unwrap();

        let segs: Vec<String> = ["annex", "", "x"].iter().map(|s| s.to_string()).collect();
        assert_eq!(store.lookup(&root, &segs).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_download_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(&dir.path().join("store")).await;
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"0123456789").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let node = store.upload_file(&src, &store.root(), "a.bin", tx).await.unwrap();
        assert_eq!(node.size, 10);
        assert!(node.is_file());

        let mut chunks = Vec::new();
        while let Some(n) = rx.recv().await {
            chunks.push(n);
        }
        assert_eq!(chunks, vec![4, 4, 2]);

        let children = store.children(&store.root()).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "a.bin");

        let dst = dir.path().join("out.bin");
        let (tx, _rx) = mpsc::unbounded_channel();
        store.download_file(&node, &dst, tx).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"0123456789");
        assert!(std::fs::read_dir(dir.path().join("store/alice/.staging")).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_download_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(dir.path()).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = store.download_file(&store.root(), &dir.path().join("x"), tx).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAFile));
    }

    #[tokio::test]
    async fn test_upload_missing_source_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = login(dir.path()).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = store
            .upload_file(&dir.path().join("nope"), &store.root(), "nope", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(std::fs::read_dir(dir.path().join("alice/.staging")).unwrap().next().is_none());
    }
}
