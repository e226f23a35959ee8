//! Remote path algebra.
//!
//! Addresses have the textual form `<root>:/<segment>/<segment>/...` where
//! `<root>` is either `mega` (the primary storage area) or `trash`.

use std::fmt;

use crate::error::StoreError;

pub const PRIMARY_ROOT: &str = "mega";
pub const TRASH_ROOT: &str = "trash";

/// One of the two well-known trees of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSelector {
    Primary,
    Trash,
}

impl RootSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootSelector::Primary => PRIMARY_ROOT,
            RootSelector::Trash => TRASH_ROOT,
        }
    }
}

/// A parsed location: a root plus the ordered segments below it.
///
/// An address with no segments denotes the root itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    root: RootSelector,
    segments: Vec<String>,
}

impl Address {
    pub fn root(&self) -> RootSelector {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The address one level up. The parent of a root is the root.
    pub fn parent(&self) -> Address {
        let mut segments = self.segments.clone();
        segments.pop();
        Address { root: self.root, segments }
    }

    /// Parse `<root>:/<segments>`.
    ///
    /// A trailing slash is dropped. When the segment before it is empty as
    /// well, a single remaining segment collapses to the root and a longer
    /// list loses its last two segments (so `mega:/a//` resolves to the root).
    /// That second case is kept as-is; it looks like a latent bug but callers
    /// may depend on it.
    pub fn parse(text: &str) -> Result<Address, StoreError> {
        let text = text.trim();
        let (selector, rest) = text.split_once(':').ok_or(StoreError::InvalidPath)?;
        if !rest.starts_with('/') {
            return Err(StoreError::InvalidPath);
        }

        let root = match selector {
            PRIMARY_ROOT => RootSelector::Primary,
            TRASH_ROOT => RootSelector::Trash,
            _ => return Err(StoreError::InvalidPath),
        };

        let mut segments: Vec<String> = rest.split('/').skip(1).map(str::to_string).collect();

        if segments.last().is_some_and(|s| s.is_empty()) {
            segments.pop();
        }

        if segments.last().is_some_and(|s| s.is_empty()) {
            let len = segments.len();
            if len == 1 {
                segments.clear();
            } else {
                segments.truncate(len - 2);
            }
        }

        Ok(Address { root, segments })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.root.as_str(), self.segments.join("/"))
    }
}

/// Text form of the primary-root address `folder/shard/key`.
///
/// The shard may span several levels (`f87/4d5/`) and usually carries a
/// trailing slash; an empty shard places the key directly under the folder.
pub fn key_address(folder: &str, shard: &str, key: &str) -> String {
    let folder = folder.trim_matches('/');
    let shard = shard.trim_matches('/');
    if shard.is_empty() {
        format!("{}:/{}/{}", PRIMARY_ROOT, folder, key)
    } else {
        format!("{}:/{}/{}/{}", PRIMARY_ROOT, folder, shard, key)
    }
}

/// Text form of a path below the primary root.
pub fn primary_address(path: &str) -> String {
    format!("{}:/{}", PRIMARY_ROOT, path)
}
