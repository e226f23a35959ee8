//! Idempotent store and retrieve.
//!
//! Both directions first reconcile what already exists (remote node, local
//! file) by name and size and only move data when nothing equivalent is
//! present. Data movement runs alongside a progress reporter that is joined
//! before the outcome is returned, so every `PROGRESS` line precedes the
//! final reply.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use annex_mega_common::address::Address;
use annex_mega_common::error::{Result, StoreError};
use annex_mega_common::materialize::ensure_path;

use crate::annex::AnnexWriter;
use crate::progress::ProgressReporter;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Store,
    Retrieve,
}

impl Direction {
    pub fn parse(method: &str) -> Option<Direction> {
        match method {
            "STORE" => Some(Direction::Store),
            "RETRIEVE" => Some(Direction::Retrieve),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Store => "STORE",
            Direction::Retrieve => "RETRIEVE",
        }
    }
}

/// One `TRANSFER` request, alive for the duration of its handler.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: Direction,
    pub key: String,
    pub local: PathBuf,
}

pub struct TransferEngine<'a> {
    session: &'a Session,
    out: &'a AnnexWriter,
}

impl<'a> TransferEngine<'a> {
    pub fn new(session: &'a Session, out: &'a AnnexWriter) -> Self {
        Self { session, out }
    }

    /// Upload `local` so that it ends up in the directory above `target`.
    pub async fn store(&self, target: &Address, local: &Path) -> Result<()> {
        let meta = match tokio::fs::metadata(local).await {
            Ok(m) if m.is_file() => m,
            _ => return Err(StoreError::InvalidSource),
        };
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or(StoreError::InvalidSource)?;

        ensure_path(self.session.store(), &target.parent()).await?;

        let resolution = self.session.resolve(target).await?;
        if resolution.is_complete() {
            debug!(target = %target, "Key already present, skipping upload");
            return Ok(());
        }
        if resolution.remaining() != 1 {
            return Err(StoreError::NotFound(target.parent().to_string()));
        }
        let parent = resolution.deepest();
        if resolution.is_root_only() {
            debug!(target = %target, "Storing directly below the root");
        }

        let children = self.session.store().children(parent).await?;
        if let Some(existing) = children.iter().find(|c| c.name == name) {
            if existing.size == meta.len() {
                debug!(name = %name, size = existing.size, "Same-size object already present");
                return Ok(());
            }
            return Err(StoreError::FileExists);
        }

        info!(target = %target, name = %name, size = meta.len(), "Uploading");
        let (reporter, sink) = ProgressReporter::start(self.out.clone());
        let result = self.session.store().upload_file(local, parent, &name, sink).await;
        let sent = reporter.finish().await;
        result?;
        info!(target = %target, bytes = sent, "Upload complete");
        Ok(())
    }

    /// Download the file at `source` into `local`.
    ///
    /// An existing directory at `local` is only accepted when the path ends
    /// in a separator; the file then lands inside it under the key's name.
    pub async fn retrieve(&self, source: &Address, local: &Path) -> Result<()> {
        let Some(key_name) = source.name() else {
            return Err(StoreError::InvalidPath);
        };

        let resolution = self.session.resolve(source).await?;
        if !resolution.is_complete() {
            return Err(StoreError::NotFound(key_name.to_string()));
        }
        let node = resolution.deepest();
        if !node.is_file() {
            return Err(StoreError::NotAFile);
        }

        let mut dest = local.to_path_buf();
        match tokio::fs::metadata(&dest).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // `dir/` names the directory itself, which must then exist.
                let dir = if ends_with_separator(local) {
                    dest.clone()
                } else {
                    match dest.parent() {
                        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                        _ => PathBuf::from("."),
                    }
                };
                if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                    return Err(StoreError::InvalidDestination);
                }
            }
            Err(e) => return Err(e.into()),
            Ok(meta) => {
                if meta.is_dir() {
                    if !ends_with_separator(local) {
                        return Err(StoreError::DirectoryExists);
                    }
                    dest = dest.join(key_name);
                }

                match tokio::fs::metadata(&dest).await {
                    Ok(m) if m.is_dir() => return Err(StoreError::DirectoryExists),
                    Ok(m) if m.len() == node.size => {
                        debug!(dest = %dest.display(), "Local copy already present, skipping download");
                        return Ok(());
                    }
                    Ok(_) => return Err(StoreError::FileExists),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(source = %source, dest = %dest.display(), size = node.size, "Downloading");
        let (reporter, sink) = ProgressReporter::start(self.out.clone());
        let result = self.session.store().download_file(node, &dest, sink).await;
        let received = reporter.finish().await;
        result?;
        info!(source = %source, bytes = received, "Download complete");
        Ok(())
    }
}

fn ends_with_separator(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(std::path::is_separator)
}
