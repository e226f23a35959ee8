//! Command loop.
//!
//! Strictly sequential: one request is read, handled to completion (including
//! any transfer) and answered before the next line is read.

use std::sync::Arc;

use tracing::{debug, info};

use annex_mega_common::store::StoreConnector;

use crate::annex::{Annex, Message, PROTOCOL_VERSION};
use crate::session::SessionState;

/// Environment lookup, replaceable so handlers can be driven without touching
/// the process environment.
pub type EnvLookup = fn(&str) -> Option<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Prepare,
    InitRemote,
    Transfer,
    CheckPresent,
    Remove,
    GetAvailability,
}

/// Every request the remote recognizes. Entries without a handler are known
/// but deliberately answered with `UNSUPPORTED-REQUEST`.
pub const HANDLERS: &[(&str, Option<Handler>)] = &[
    ("PREPARE", Some(Handler::Prepare)),
    ("INITREMOTE", Some(Handler::InitRemote)),
    ("TRANSFER", Some(Handler::Transfer)),
    ("CHECKPRESENT", Some(Handler::CheckPresent)),
    ("REMOVE", Some(Handler::Remove)),
    ("GETCOST", None),
    ("GETAVAILABILITY", Some(Handler::GetAvailability)),
];

pub fn lookup(command: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(name, _)| *name == command)
        .and_then(|(_, handler)| *handler)
}

pub struct Remote {
    pub(crate) annex: Annex,
    pub(crate) state: SessionState,
    pub(crate) connector: Arc<dyn StoreConnector>,
    pub(crate) env: EnvLookup,
}

impl Remote {
    pub fn new(annex: Annex, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            annex,
            state: SessionState::Uninitialized,
            connector,
            env: |name| std::env::var(name).ok(),
        }
    }

    /// Announce the protocol version and serve requests until the driver
    /// closes the input. Only I/O failures on the protocol streams end the
    /// loop early.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.annex.send(&format!("VERSION {}", PROTOCOL_VERSION))?;

        while let Some(message) = self.annex.read_message().await? {
            if message.command.is_empty() {
                continue;
            }
            self.dispatch(message).await?;
        }

        info!("Input closed, exiting");
        Ok(())
    }

    async fn dispatch(&mut self, message: Message) -> anyhow::Result<()> {
        let Some(handler) = lookup(&message.command) else {
            debug!(command = %message.command, "Unsupported request");
            self.annex.send("UNSUPPORTED-REQUEST")?;
            return Ok(());
        };

        let rest = message.rest.as_deref();
        match handler {
            Handler::Prepare => self.prepare().await,
            Handler::InitRemote => self.init_remote(),
            Handler::Transfer => self.transfer(rest).await,
            Handler::CheckPresent => self.check_present(rest).await,
            Handler::Remove => self.remove(rest),
            Handler::GetAvailability => self.get_availability(),
        }
    }
}
