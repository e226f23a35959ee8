//! Line protocol plumbing between the remote and its driving process.
//!
//! Requests arrive one per line on the reader; replies and queries go out one
//! per line on the writer. Queries issued by the remote (`GETCONFIG`,
//! `GETCREDS`, `DIRHASH`) block until the driver answers on the next line.

use std::io::Write;
use std::sync::{Arc, Mutex};

use annex_mega_common::error::single_line;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: u32 = 1;
pub const CREDS_SLOT: &str = "mycreds";

/// One inbound line split at its first space.
///
/// The driver may send bytes that are not UTF-8 (keys and file names are
/// arbitrary), so the remainder stays raw until a handler decides how to
/// read it. The command token is decoded lossily; a mangled token simply
/// matches no handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub rest: Option<Vec<u8>>,
}

impl Message {
    pub fn parse(line: &[u8]) -> Message {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match line.iter().position(|&b| b == b' ') {
            Some(at) => Message {
                command: String::from_utf8_lossy(&line[..at]).into_owned(),
                rest: Some(line[at + 1..].to_vec()),
            },
            None => Message {
                command: String::from_utf8_lossy(line).into_owned(),
                rest: None,
            },
        }
    }
}

/// Cloneable handle on the outbound side. Every line is flushed as soon as it
/// is written so the driver sees replies immediately.
#[derive(Clone)]
pub struct AnnexWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl AnnexWriter {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { inner: Arc::new(Mutex::new(Box::new(out))) }
    }

    pub fn send(&self, line: &str) -> std::io::Result<()> {
        let line = single_line(line);
        debug!(line = %line, "-> annex");
        let mut out = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "annex writer poisoned"))?;
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

pub type AnnexReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct Annex {
    reader: BufReader<AnnexReader>,
    out: AnnexWriter,
}

impl Annex {
    pub fn new(input: impl AsyncRead + Send + Unpin + 'static, out: AnnexWriter) -> Self {
        let reader: AnnexReader = Box::new(input);
        Self { reader: BufReader::new(reader), out }
    }

    pub fn writer(&self) -> &AnnexWriter {
        &self.out
    }

    pub fn send(&self, line: &str) -> std::io::Result<()> {
        self.out.send(line)
    }

    /// Next inbound message, or `None` once the driver closes the stream.
    pub async fn read_message(&mut self) -> std::io::Result<Option<Message>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        debug!(line = %String::from_utf8_lossy(&line).trim_end(), "<- annex");
        Ok(Some(Message::parse(&line)))
    }

    /// Read the reply to a query and return its payload if it starts with
    /// `expected`.
    async fn reply(&mut self, expected: &str) -> std::io::Result<Option<String>> {
        match self.read_message().await? {
            Some(msg) if msg.command == expected => match msg.rest.map(String::from_utf8) {
                Some(Ok(value)) => Ok(Some(value)),
                Some(Err(_)) => {
                    warn!(expected = %expected, "Reply from annex is not valid UTF-8");
                    Ok(None)
                }
                None => Ok(None),
            },
            Some(msg) => {
                warn!(expected = %expected, got = %msg.command, "Unexpected reply from annex");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// `GETCONFIG <name>`; an empty string when the setting is absent.
    pub async fn get_config(&mut self, name: &str) -> std::io::Result<String> {
        if name.is_empty() {
            return Ok(String::new());
        }
        self.send(&format!("GETCONFIG {}", name))?;
        Ok(self.reply("VALUE").await?.unwrap_or_default())
    }

    /// `GETCREDS mycreds`; both user and password must be non-empty.
    pub async fn get_creds(&mut self) -> std::io::Result<Option<(String, String)>> {
        self.send(&format!("GETCREDS {}", CREDS_SLOT))?;
        let Some(payload) = self.reply("CREDS").await? else {
            return Ok(None);
        };
        match payload.split_once(' ') {
            Some((user, password)) if !user.is_empty() && !password.is_empty() => {
                Ok(Some((user.to_string(), password.to_string())))
            }
            _ => Ok(None),
        }
    }

    pub fn set_creds(&self, user: &str, password: &str) -> std::io::Result<()> {
        self.send(&format!("SETCREDS {} {} {}", CREDS_SLOT, user, password))
    }

    /// `DIRHASH <key>`; an empty string when the driver has no answer.
    pub async fn dir_hash(&mut self, key: &str) -> std::io::Result<String> {
        self.send(&format!("DIRHASH {}", key))?;
        Ok(self.reply("VALUE").await?.unwrap_or_default())
    }
}
