use std::collections::BTreeSet;

use super::{Catalog, CatalogQuery, RowIter};
use crate::domain::{RawRow, split_domain};
use crate::error::{BackupError, Result};
use crate::filter::RecordFilter;

/// Catalog held entirely in memory, in insertion order. Useful for tests and
/// for callers that assemble rows from another source.
#[derive(Clone, Debug, Default)]
pub struct InMemCatalog {
    pub rows: Vec<RawRow>,
}

impl InMemCatalog {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: RawRow) {
        self.rows.push(row);
    }

    fn filter_of(query: &CatalogQuery) -> Result<&RecordFilter> {
        match query {
            CatalogQuery::Prefix(f) => Ok(f),
            _ => Err(BackupError::Unsupported(
                "in-memory catalog only evaluates prefix queries".into(),
            )),
        }
    }

    fn selected(row: &RawRow, f: &RecordFilter) -> bool {
        // Rows missing their mandatory keys are passed through so that
        // decoding reports them rather than the filter hiding them.
        let Some(raw) = row.raw_domain.as_deref() else {
            return f.domain_prefix().is_none();
        };
        let (domain, namespace) = split_domain(raw);
        f.matches_fields(
            domain,
            namespace,
            row.relative_path.as_deref().unwrap_or_default(),
        )
    }
}

impl Catalog for InMemCatalog {
    fn rows(&self, query: &CatalogQuery) -> Result<RowIter<'_>> {
        let f = Self::filter_of(query)?.clone();
        Ok(Box::new(
            self.rows
                .iter()
                .filter(move |r| Self::selected(r, &f))
                .cloned()
                .map(Ok),
        ))
    }

    fn count(&self, query: &CatalogQuery) -> Result<u64> {
        let f = Self::filter_of(query)?;
        Ok(self.rows.iter().filter(|r| Self::selected(r, f)).count() as u64)
    }

    fn domains(&self) -> Result<Vec<String>> {
        let set: BTreeSet<&str> = self
            .rows
            .iter()
            .filter_map(|r| r.raw_domain.as_deref())
            .map(|d| split_domain(d).0)
            .collect();
        Ok(set.into_iter().map(str::to_owned).collect())
    }

    fn namespaces(&self, domain: &str) -> Result<Vec<String>> {
        let set: BTreeSet<&str> = self
            .rows
            .iter()
            .filter_map(|r| r.raw_domain.as_deref())
            .filter_map(|d| d.strip_prefix(domain)?.strip_prefix('-'))
            .collect();
        Ok(set.into_iter().map(str::to_owned).collect())
    }
}
