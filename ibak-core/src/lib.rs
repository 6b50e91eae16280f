#![forbid(unsafe_code)]

pub mod error;

pub mod backup;
pub mod catalog;
pub mod domain;
pub mod export;
pub mod filter;
pub mod info;
pub mod metadata;
pub mod progress;
pub mod resolve;
pub mod selection;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixture;


// Re-exports: stable API surface
pub use backup::Backup;
pub use catalog::{Catalog, CatalogQuery, InMemCatalog, SqliteCatalog};
pub use domain::{CatalogRecord, EntryKind, RawRow, RecordWarning, split_domain};
pub use error::{BackupError, Result};
pub use export::{
    CancelToken, ExportOptions, ExportReport, ExportWarning, Exporter, SkipReason, SkippedRecord,
};
pub use filter::RecordFilter;
pub use progress::{CountingProgress, Progress};
pub use resolve::{ContentResolver, content_path, file_identity};
pub use selection::ExportSelection;
