//! Request handlers.
//!
//! Each handler answers with its own `*-SUCCESS` / `*-FAILURE` line. Failures
//! of the request itself are reported on the protocol and never returned;
//! the `Err` side is reserved for broken protocol streams.

use std::borrow::Cow;
use std::path::PathBuf;

use tracing::{info, warn};

use annex_mega_common::address::{key_address, primary_address, Address};
use annex_mega_common::materialize::ensure_path;

use crate::dispatch::Remote;
use crate::session::{Session, SessionState};
use crate::transfer::{Direction, TransferEngine, TransferRequest};

const USERNAME_ENV: &str = "MEGA_USERNAME";
const PASSWORD_ENV: &str = "MEGA_PASSWORD";
const NOT_PREPARED: &str = "remote not prepared";
const KEY_NOT_UTF8: &str = "Key is not valid UTF-8";

impl Remote {
    pub(crate) async fn prepare(&mut self) -> anyhow::Result<()> {
        if self.state.is_ready() {
            return self.prepare_failure("mega instance is not nil");
        }

        let encryption = self.annex.get_config("encryption").await?;
        let folder = self.annex.get_config("folder").await?;

        let Some((user, password)) = self.annex.get_creds().await? else {
            return self.prepare_failure("Couldn't fetch credentials");
        };
        if folder.is_empty() {
            return self.prepare_failure("Folder isn't set");
        }

        let store = match self.connector.login(&user, &password).await {
            Ok(s) => s,
            Err(e) => {
                warn!(user = %user, error = %e, "Login failed");
                return self.prepare_failure(&format!("Couldn't log in! (Reason: {})", e.reason()));
            }
        };

        let folder_address = match Address::parse(&primary_address(&folder)) {
            Ok(a) => a,
            Err(e) => return self.prepare_failure(&e.reason()),
        };
        if let Err(e) = ensure_path(store.as_ref(), &folder_address).await {
            return self.prepare_failure(&format!("Couldn't create folder {}: {}", folder, e.reason()));
        }

        let session = Session::new(store, folder, encryption);
        info!(user = %user, folder = %session.folder, encrypted = session.encrypted(), "Remote prepared");
        self.state = SessionState::Ready(session);
        self.annex.send("PREPARE-SUCCESS")?;
        Ok(())
    }

    fn prepare_failure(&self, reason: &str) -> anyhow::Result<()> {
        self.annex.send(&format!("PREPARE-FAILURE {}", reason))?;
        Ok(())
    }

    /// Hand the credentials from the environment to the driver for storage.
    pub(crate) fn init_remote(&mut self) -> anyhow::Result<()> {
        let user = (self.env)(USERNAME_ENV).filter(|v| !v.is_empty());
        let password = (self.env)(PASSWORD_ENV).filter(|v| !v.is_empty());

        match (user, password) {
            (Some(user), Some(password)) => {
                self.annex.set_creds(&user, &password)?;
                self.annex.send("INITREMOTE-SUCCESS")?;
            }
            _ => {
                self.annex.send(&format!(
                    "INITREMOTE-FAILURE Username and/or password isn't set. Set them with {}=\"username\" {}=\"password\"",
                    USERNAME_ENV, PASSWORD_ENV
                ))?;
            }
        }
        Ok(())
    }

    /// `TRANSFER <STORE|RETRIEVE> <key> <file>`; the file may contain spaces.
    pub(crate) async fn transfer(&mut self, args: Option<&[u8]>) -> anyhow::Result<()> {
        let mut parts = args.unwrap_or_default().splitn(3, |&b| b == b' ');
        let method = String::from_utf8_lossy(parts.next().unwrap_or_default());
        let key = parts.next().unwrap_or_default();
        let file = parts.next().unwrap_or_default();

        let Some(direction) = Direction::parse(&method) else {
            self.annex.send(&format!(
                "TRANSFER-FAILURE {} {} Unknown method",
                method,
                String::from_utf8_lossy(key)
            ))?;
            return Ok(());
        };
        if key.is_empty() || file.is_empty() {
            self.annex.send(&format!(
                "TRANSFER-FAILURE {} {} Missing key or file argument",
                direction.as_str(),
                String::from_utf8_lossy(key)
            ))?;
            return Ok(());
        }
        let Ok(key) = std::str::from_utf8(key) else {
            self.annex.send(&format!(
                "TRANSFER-FAILURE {} {} {}",
                direction.as_str(),
                String::from_utf8_lossy(key),
                KEY_NOT_UTF8
            ))?;
            return Ok(());
        };

        let request = TransferRequest {
            direction,
            key: key.to_string(),
            local: path_from_bytes(file),
        };

        let Some(session) = self.state.session() else {
            self.annex.send(&transfer_failure(&request, NOT_PREPARED))?;
            return Ok(());
        };

        let shard = self.annex.dir_hash(&request.key).await?;
        let address = match Address::parse(&key_address(&session.folder, &shard, &request.key)) {
            Ok(a) => a,
            Err(e) => {
                self.annex.send(&transfer_failure(&request, &e.reason()))?;
                return Ok(());
            }
        };

        let engine = TransferEngine::new(session, self.annex.writer());
        let result = match request.direction {
            Direction::Store => engine.store(&address, &request.local).await,
            Direction::Retrieve => engine.retrieve(&address, &request.local).await,
        };

        match result {
            Ok(()) => self.annex.send(&format!(
                "TRANSFER-SUCCESS {} {}",
                request.direction.as_str(),
                request.key
            ))?,
            Err(e) => {
                warn!(
                    key = %request.key,
                    direction = request.direction.as_str(),
                    error = %e,
                    "Transfer failed"
                );
                self.annex.send(&transfer_failure(&request, &e.reason()))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn check_present(&mut self, args: Option<&[u8]>) -> anyhow::Result<()> {
        let raw = args.unwrap_or_default();
        if raw.is_empty() {
            self.annex.send("CHECKPRESENT-UNKNOWN  Missing key argument")?;
            return Ok(());
        }
        let Ok(key) = std::str::from_utf8(raw) else {
            self.annex.send(&format!(
                "CHECKPRESENT-UNKNOWN {} {}",
                String::from_utf8_lossy(raw),
                KEY_NOT_UTF8
            ))?;
            return Ok(());
        };

        let Some(session) = self.state.session() else {
            self.annex.send(&format!("CHECKPRESENT-UNKNOWN {} {}", key, NOT_PREPARED))?;
            return Ok(());
        };

        let shard = self.annex.dir_hash(key).await?;
        let address = match Address::parse(&key_address(&session.folder, &shard, key)) {
            Ok(a) => a,
            Err(e) => {
                self.annex.send(&format!("CHECKPRESENT-UNKNOWN {} {}", key, e.reason()))?;
                return Ok(());
            }
        };

        let reply = match session.resolve(&address).await {
            Ok(resolution) if resolution.is_complete() => format!("CHECKPRESENT-SUCCESS {}", key),
            Ok(_) => format!("CHECKPRESENT-FAILURE {}", key),
            Err(e) if e.is_not_found() => format!("CHECKPRESENT-FAILURE {}", key),
            Err(e) => format!("CHECKPRESENT-UNKNOWN {} {}", key, e.reason()),
        };
        self.annex.send(&reply)?;
        Ok(())
    }

    /// Removal is not implemented; the key is reported as gone.
    pub(crate) fn remove(&mut self, args: Option<&[u8]>) -> anyhow::Result<()> {
        let key = args.map_or(Cow::Borrowed(""), String::from_utf8_lossy);
        self.annex.send(&format!("REMOVE-SUCCESS {}", key))?;
        Ok(())
    }

    pub(crate) fn get_availability(&mut self) -> anyhow::Result<()> {
        self.annex.send("AVAILABILITY GLOBAL")?;
        Ok(())
    }
}

fn transfer_failure(request: &TransferRequest, reason: &str) -> String {
    format!(
        "TRANSFER-FAILURE {} {} {}",
        request.direction.as_str(),
        request.key,
        reason
    )
}

/// The driver passes file names as raw bytes; keep them intact.
#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
