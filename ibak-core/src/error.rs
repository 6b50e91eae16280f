use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("catalog not found: {}", .0.display())]
    CatalogNotFound(PathBuf),

    #[error("backup is encrypted and cannot be read: {}", .0.display())]
    Encrypted(PathBuf),

    /// A catalog row lacks one of its mandatory keys. Signals a corrupt
    /// catalog, so it always aborts the operation in progress.
    #[error("malformed catalog record {}: {reason}", .identity.as_deref().unwrap_or("<no identity>"))]
    MalformedRecord {
        identity: Option<String>,
        reason: String,
    },

    #[error(
        "content missing for {identity} ({domain}/{namespace}/{relative_path}), expected at {}",
        .content_path.display()
    )]
    ContentMissing {
        identity: String,
        domain: String,
        namespace: String,
        relative_path: String,
        content_path: PathBuf,
    },

    #[error("symlink {identity} ({relative_path}) has no target in its metadata")]
    SymlinkTargetMissing {
        identity: String,
        relative_path: String,
    },

    #[error("unsafe path: {0}")]
    UnsafePath(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, BackupError>;
