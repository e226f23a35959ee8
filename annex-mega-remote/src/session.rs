use std::sync::Arc;

use annex_mega_common::address::{Address, RootSelector};
use annex_mega_common::error::Result;
use annex_mega_common::store::{resolve_from, RemoteNode, RemoteStore, Resolution};

/// Everything established by a successful `PREPARE`.
pub struct Session {
    pub store: Arc<dyn RemoteStore>,
    pub root: RemoteNode,
    pub trash: RemoteNode,
    /// Working folder below the primary root that holds all keys.
    pub folder: String,
    pub encryption: String,
}

impl Session {
    pub fn new(store: Arc<dyn RemoteStore>, folder: String, encryption: String) -> Self {
        let root = store.root();
        let trash = store.trash();
        Self { store, root, trash, folder, encryption }
    }

    pub fn root_for(&self, selector: RootSelector) -> &RemoteNode {
        match selector {
            RootSelector::Primary => &self.root,
            RootSelector::Trash => &self.trash,
        }
    }

    /// Whether the driver configured any encryption for this remote.
    pub fn encrypted(&self) -> bool {
        !self.encryption.is_empty() && self.encryption != "none"
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Resolve `address` against the roots captured at login.
    pub async fn resolve(&self, address: &Address) -> Result<Resolution> {
        resolve_from(self.store(), self.root_for(address.root()).clone(), address).await
    }
}

/// Session lifecycle. Moves from `Uninitialized` to `Ready` exactly once.
#[derive(Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Ready(Session),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Ready(s) => Some(s),
            SessionState::Uninitialized => None,
        }
    }
}
