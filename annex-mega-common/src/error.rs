/// Failures surfaced by path handling, the store contract and the transfer engine.
///
/// Every variant renders to a single human readable reason; the protocol layer
/// writes that reason verbatim into the matching `*-FAILURE` line.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid mega path")]
    InvalidPath,
    #[error("Requested object is not a file")]
    NotAFile,
    #[error("A non-directory exists at this path")]
    NotDirectory,
    #[error("Invalid source path")]
    InvalidSource,
    #[error("File with same name already exists")]
    FileExists,
    #[error("Invalid destination path")]
    InvalidDestination,
    #[error("A directory with same name already exists")]
    DirectoryExists,
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl StoreError {
    /// The error text flattened onto one line, safe to embed in a protocol reply.
    pub fn reason(&self) -> String {
        single_line(&self.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Collapse line breaks so a message cannot split a protocol line.
pub fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_is_single_line() {
        let err = StoreError::Remote(anyhow::anyhow!("upload failed\nHTTP 500\r\n"));
        assert_eq!(err.reason(), "upload failed HTTP 500");
    }

    #[test]
    fn test_messages() {
        assert_eq!(StoreError::FileExists.to_string(), "File with same name already exists");
        assert_eq!(
            StoreError::NotFound("mega:/annex/k1".into()).to_string(),
            "Object not found: mega:/annex/k1"
        );
        assert!(StoreError::NotFound(String::new()).is_not_found());
        assert!(!StoreError::NotAFile.is_not_found());
    }
}
