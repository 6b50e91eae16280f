// ibak_core/src/catalog/mod.rs
pub mod inmem;
pub mod sqlite;

use std::path::PathBuf;

use crate::domain::RawRow;
use crate::error::Result;
use crate::filter::RecordFilter;

pub use inmem::InMemCatalog;
pub use sqlite::SqliteCatalog;

/// File name of the catalog inside an archive root.
pub const CATALOG_FILE: &str = "Manifest.db";

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<RawRow>> + 'a>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogQuery {
    /// Literal prefix filters on the split domain, namespace and relative path.
    Prefix(RecordFilter),
    /// SQL `LIKE` patterns on the raw domain and relative path.
    Like {
        domain: Option<String>,
        path: Option<String>,
    },
    /// Arbitrary read-only query; its first five columns must be
    /// `fileID, domain, relativePath, flags, file`.
    ///
    /// Rows are paged with `LIMIT/OFFSET` over the query, so it should carry
    /// its own `ORDER BY` (e.g. on `fileID`); without one the page boundaries
    /// are not stable. Each page rescans the skipped rows, which makes very
    /// large raw selections slower than the prefix and `LIKE` forms.
    Raw(String),
}

impl CatalogQuery {
    pub fn all() -> Self {
        Self::Prefix(RecordFilter::default())
    }

    /// Filter to re-check on decoded records. Only prefix queries carry one;
    /// the other forms are evaluated entirely by the store.
    pub fn record_filter(&self) -> Option<&RecordFilter> {
        match self {
            Self::Prefix(f) if !f.is_empty() => Some(f),
            _ => None,
        }
    }
}

impl From<RecordFilter> for CatalogQuery {
    fn from(f: RecordFilter) -> Self {
        Self::Prefix(f)
    }
}

/// Read-only view of a backup's file catalog.
///
/// `rows` must stream: implementations page through the store rather than
/// materializing every match.
pub trait Catalog: Send {
    fn rows(&self, query: &CatalogQuery) -> Result<RowIter<'_>>;

    fn count(&self, query: &CatalogQuery) -> Result<u64>;

    /// Distinct domains, with namespaces stripped.
    fn domains(&self) -> Result<Vec<String>>;

    fn namespaces(&self, domain: &str) -> Result<Vec<String>>;
}

pub enum Backend {
    Sqlite,
}

pub fn open_catalog(backend: Backend, path: PathBuf) -> Result<Box<dyn Catalog>> {
    match backend {
        Backend::Sqlite => Ok(Box::new(SqliteCatalog::open(&path)?)),
    }
}
