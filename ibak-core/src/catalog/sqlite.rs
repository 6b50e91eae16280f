use std::collections::VecDeque;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row, ToSql};
use tracing::debug;

use super::{Catalog, CatalogQuery, RowIter};
use crate::domain::RawRow;
use crate::error::{BackupError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

// Split of the raw `domain` column on its first '-', mirroring `split_domain`.
const DOMAIN_PART: &str =
    "CASE WHEN instr(domain, '-') > 0 THEN substr(domain, 1, instr(domain, '-') - 1) ELSE domain END";
const NAMESPACE_PART: &str =
    "CASE WHEN instr(domain, '-') > 0 THEN substr(domain, instr(domain, '-') + 1) ELSE '' END";

/// Catalog backed by the archive's SQLite `Manifest.db`, opened read-only.
pub struct SqliteCatalog {
    conn: Connection,
    page_size: usize,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BackupError::CatalogNotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), "opened catalog");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

struct Predicate {
    clauses: Vec<String>,
    params: Vec<(&'static str, Value)>,
}

impl Predicate {
    fn build(query: &CatalogQuery) -> Result<Self> {
        let mut p = Predicate {
            clauses: Vec::new(),
            params: Vec::new(),
        };
        match query {
            CatalogQuery::Prefix(f) => {
                if let Some(d) = f.domain_prefix() {
                    p.prefix(DOMAIN_PART, ":domain", d);
                }
                if let Some(ns) = f.namespace_prefix() {
                    p.prefix(NAMESPACE_PART, ":namespace", ns);
                }
                if let Some(path) = f.path_prefix() {
                    p.prefix("relativePath", ":path", path);
                }
            }
            CatalogQuery::Like { domain, path } => {
                if let Some(d) = domain.as_deref().filter(|s| !s.is_empty()) {
                    p.clauses.push("domain LIKE :domain".into());
                    p.params.push((":domain", Value::Text(d.to_owned())));
                }
                if let Some(path) = path.as_deref().filter(|s| !s.is_empty()) {
                    p.clauses.push("relativePath LIKE :path".into());
                    p.params.push((":path", Value::Text(path.to_owned())));
                }
            }
            CatalogQuery::Raw(_) => {
                return Err(BackupError::InvalidQuery(
                    "raw queries carry no predicate".into(),
                ));
            }
        }
        Ok(p)
    }

    // Exact, case-sensitive prefix test; LIKE would fold ASCII case.
    fn prefix(&mut self, expr: &str, name: &'static str, value: &str) {
        self.clauses
            .push(format!("substr({expr}, 1, length({name})) = {name}"));
        self.params.push((name, Value::Text(value.to_owned())));
    }

    fn where_sql(&self) -> String {
        let mut sql = String::from("1 = 1");
        for c in &self.clauses {
            sql.push_str(" AND ");
            sql.push_str(c);
        }
        sql
    }
}

fn raw_sql(sql: &str) -> Result<&str> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(BackupError::InvalidQuery("empty query".into()));
    }
    Ok(sql)
}

impl Catalog for SqliteCatalog {
    fn rows(&self, query: &CatalogQuery) -> Result<RowIter<'_>> {
        let pages = match query {
            CatalogQuery::Raw(sql) => RowPages {
                conn: &self.conn,
                sql: format!(
                    "SELECT * FROM ({}) LIMIT :limit OFFSET :offset",
                    raw_sql(sql)?
                ),
                params: Vec::new(),
                cursor: PageCursor::Offset(0),
                page_size: self.page_size,
                buf: VecDeque::new(),
                exhausted: false,
            },
            _ => {
                let pred = Predicate::build(query)?;
                RowPages {
                    conn: &self.conn,
                    sql: format!(
                        "SELECT rowid, fileID, domain, relativePath, flags, file FROM Files \
                         WHERE rowid > :after AND {} ORDER BY rowid LIMIT :limit",
                        pred.where_sql()
                    ),
                    params: pred.params,
                    cursor: PageCursor::After(i64::MIN),
                    page_size: self.page_size,
                    buf: VecDeque::new(),
                    exhausted: false,
                }
            }
        };
        Ok(Box::new(pages))
    }

    fn count(&self, query: &CatalogQuery) -> Result<u64> {
        let n: i64 = match query {
            CatalogQuery::Raw(sql) => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM ({})", raw_sql(sql)?),
                [],
                |r| r.get(0),
            )?,
            _ => {
                let pred = Predicate::build(query)?;
                let bound: Vec<(&str, &dyn ToSql)> = pred
                    .params
                    .iter()
                    .map(|(k, v)| (*k, v as &dyn ToSql))
                    .collect();
                self.conn.query_row(
                    &format!("SELECT COUNT(*) FROM Files WHERE {}", pred.where_sql()),
                    bound.as_slice(),
                    |r| r.get(0),
                )?
            }
        };
        Ok(n.max(0) as u64)
    }

    fn domains(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {DOMAIN_PART} FROM Files WHERE domain IS NOT NULL ORDER BY 1"
        ))?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn namespaces(&self, domain: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT substr(domain, length(:domain) + 2) FROM Files \
             WHERE substr(domain, 1, length(:domain) + 1) = :domain || '-' ORDER BY 1",
        )?;
        let rows = stmt.query_map(&[(":domain", &domain as &dyn ToSql)], |r| {
            r.get::<_, String>(0)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[derive(Clone, Copy, Debug)]
enum PageCursor {
    /// Keyset pagination on rowid.
    After(i64),
    /// For raw queries, which expose no stable key.
    Offset(i64),
}

/// Forward-only row stream that holds at most one page in memory.
pub struct RowPages<'c> {
    conn: &'c Connection,
    sql: String,
    params: Vec<(&'static str, Value)>,
    cursor: PageCursor,
    page_size: usize,
    buf: VecDeque<RawRow>,
    exhausted: bool,
}

impl RowPages<'_> {
    fn fetch(&mut self) -> Result<()> {
        let limit = self.page_size as i64;
        let mut page = Vec::with_capacity(self.page_size);
        let mut last_rowid = None;
        {
            let mut stmt = self.conn.prepare_cached(&self.sql)?;
            let mut bound: Vec<(&str, &dyn ToSql)> = self
                .params
                .iter()
                .map(|(k, v)| (*k, v as &dyn ToSql))
                .collect();
            match &self.cursor {
                PageCursor::After(after) => bound.push((":after", after as &dyn ToSql)),
                PageCursor::Offset(offset) => bound.push((":offset", offset as &dyn ToSql)),
            }
            bound.push((":limit", &limit as &dyn ToSql));

            let mut rows = stmt.query(bound.as_slice())?;
            while let Some(row) = rows.next()? {
                match self.cursor {
                    PageCursor::After(_) => {
                        last_rowid = Some(row.get::<_, i64>(0)?);
                        page.push(read_row(row, 1)?);
                    }
                    PageCursor::Offset(_) => page.push(read_row(row, 0)?),
                }
            }
        }

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match &mut self.cursor {
            PageCursor::After(after) => {
                if let Some(rowid) = last_rowid {
                    *after = rowid;
                }
            }
            PageCursor::Offset(offset) => *offset += page.len() as i64,
        }
        self.buf.extend(page);
        Ok(())
    }
}

impl Iterator for RowPages<'_> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buf.pop_front().map(Ok)
    }
}

fn read_row(row: &Row<'_>, base: usize) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        identity: row.get(base)?,
        raw_domain: row.get(base + 1)?,
        relative_path: row.get(base + 2)?,
        flags: row.get(base + 3)?,
        metadata: row.get(base + 4)?,
    })
}
