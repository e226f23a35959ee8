use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::address::{Address, RootSelector};
use crate::error::Result;

/// Sender side of a transfer's progress stream. Each message is the number of
/// bytes moved since the previous one.
pub type ProgressSink = UnboundedSender<u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// A node of the remote tree, as reported by the store.
///
/// `handle` is the store's own identifier for the node and is opaque to
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub handle: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
}

impl RemoteNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

/// Authenticates against a store and hands back a live handle to it.
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync {
    async fn login(&self, user: &str, password: &str) -> Result<Arc<dyn RemoteStore>>;
}

/// Contract of the hierarchical object store behind the remote.
///
/// Implementations own authentication, transport and the tree itself. The
/// transfer engine never mutates a node except through `create_dir` and
/// `upload_file`.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Root of the primary storage area.
    fn root(&self) -> RemoteNode;

    /// Root of the trash area.
    fn trash(&self) -> RemoteNode;

    /// Walk `segments` down from `root`, returning the nodes matched along
    /// the way, shallowest first. The result is shorter than `segments` when
    /// only a prefix exists.
    async fn lookup(&self, root: &RemoteNode, segments: &[String]) -> Result<Vec<RemoteNode>>;

    async fn children(&self, node: &RemoteNode) -> Result<Vec<RemoteNode>>;

    async fn create_dir(&self, name: &str, parent: &RemoteNode) -> Result<RemoteNode>;

    /// Upload `src` into `parent` as `name`. `progress` is dropped when the
    /// call returns, which closes the stream for the consumer.
    async fn upload_file(
        &self,
        src: &Path,
        parent: &RemoteNode,
        name: &str,
        progress: ProgressSink,
    ) -> Result<RemoteNode>;

    async fn download_file(&self, node: &RemoteNode, dst: &Path, progress: ProgressSink) -> Result<()>;
}

/// Outcome of looking an address up in the store.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub root: RemoteNode,
    pub matched: Vec<RemoteNode>,
    pub wanted: usize,
}

impl Resolution {
    /// Every segment of the address exists.
    pub fn is_complete(&self) -> bool {
        self.matched.len() == self.wanted
    }

    /// No segment below the root exists (or the address is the root).
    pub fn is_root_only(&self) -> bool {
        self.matched.is_empty()
    }

    /// Deepest existing node on the path, falling back to the root.
    pub fn deepest(&self) -> &RemoteNode {
        self.matched.last().unwrap_or(&self.root)
    }

    /// Number of segments that still need to exist.
    pub fn remaining(&self) -> usize {
        self.wanted.saturating_sub(self.matched.len())
    }
}

pub fn root_node(store: &dyn RemoteStore, selector: RootSelector) -> RemoteNode {
    match selector {
        RootSelector::Primary => store.root(),
        RootSelector::Trash => store.trash(),
    }
}

/// Look `address` up, classifying the match as full, partial or root only.
pub async fn resolve(store: &dyn RemoteStore, address: &Address) -> Result<Resolution> {
    let root = root_node(store, address.root());
    resolve_from(store, root, address).await
}

/// Like [`resolve`], starting from an already known root node. A root address
/// is trivially complete and does not hit the store.
pub async fn resolve_from(store: &dyn RemoteStore, root: RemoteNode, address: &Address) -> Result<Resolution> {
    let segments = address.segments();
    let matched = if address.is_root() {
        Vec::new()
    } else {
        store.lookup(&root, segments).await?
    };

    Ok(Resolution {
        root,
        matched,
        wanted: segments.len(),
    })
}
