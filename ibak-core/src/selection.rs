use crate::catalog::RowIter;
use crate::domain::{CatalogRecord, RawRow};
use crate::error::Result;
use crate::filter::RecordFilter;

/// Lazily decoded, filtered, single-pass sequence of catalog records.
///
/// Records come out in whatever order the backing store yields them. Decode
/// failures surface as `Err` items; consumers stop at the first one.
pub struct ExportSelection<'a> {
    rows: RowIter<'a>,
    filter: Option<RecordFilter>,
    rejected: u64,
}

impl<'a> ExportSelection<'a> {
    pub fn new(rows: RowIter<'a>, filter: Option<RecordFilter>) -> Self {
        Self {
            rows,
            filter: filter.filter(|f| !f.is_empty()),
            rejected: 0,
        }
    }

    /// Selection over already-decoded rows, e.g. assembled by hand.
    pub fn from_rows(rows: Vec<RawRow>) -> ExportSelection<'static> {
        ExportSelection::new(Box::new(rows.into_iter().map(Ok)), None)
    }

    /// Records the filter has rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Iterator for ExportSelection<'_> {
    type Item = Result<CatalogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let record = match CatalogRecord::decode(row) {
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            };
            match &self.filter {
                Some(f) if !f.matches(&record) => self.rejected += 1,
                _ => return Some(Ok(record)),
            }
        }
    }
}
