use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ANNEX_MEGA_CONFIG";

const DEFAULT_BACKEND: &str = "directory";
const DEFAULT_DIRECTORY_PATH: &str = "/var/lib/annex-mega/store";
const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB per progress step
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
    #[serde(default = "default_directory_path")]
    pub path: PathBuf,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self { path: default_directory_path() }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            directory: DirectorySettings::default(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_directory_path() -> PathBuf {
    PathBuf::from(DEFAULT_DIRECTORY_PATH)
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Settings {
    /// Settings for this process: the TOML file named by `ANNEX_MEGA_CONFIG`,
    /// or the defaults when the variable is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve(path.as_deref())
    }

    fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings: Settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("{} names an unreadable file: {}", CONFIG_ENV, path.display()))?;
                toml::from_str(&text).with_context(|| format!("Invalid settings in {}", path.display()))?
            }
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.backend.is_empty() {
            anyhow::bail!("backend must not be empty");
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "chunk_size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE,
                self.chunk_size
            );
        }
        if self.backend == "directory" && !self.directory.path.is_absolute() {
            anyhow::bail!("directory.path must be absolute: {}", self.directory.path.display());
        }
        Ok(())
    }
}
