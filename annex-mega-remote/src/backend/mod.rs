pub mod directory;

use std::sync::Arc;

use anyhow::bail;
use annex_mega_common::store::StoreConnector;

use self::directory::DirectoryConnector;
use crate::config::Settings;

/// Construct the store connector named by `settings.backend`.
pub fn connector(settings: &Settings) -> anyhow::Result<Arc<dyn StoreConnector>> {
    match settings.backend.as_str() {
        "directory" => Ok(Arc::new(DirectoryConnector::new(
            settings.directory.path.clone(),
            settings.chunk_size,
        ))),
        other => bail!("Unknown backend type: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend_rejected() {
        let settings = Settings { backend: "s3".to_string(), ..Settings::default() };
        let err = connector(&settings).err().unwrap();
        assert_eq!(err.to_string(), "Unknown backend type: s3");
    }

    #[test]
    fn test_directory_backend_selected() {
        assert!(connector(&Settings::default()).is_ok());
    }
}
