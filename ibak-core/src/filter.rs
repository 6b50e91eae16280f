use serde::{Deserialize, Serialize};

use crate::domain::CatalogRecord;

/// Prefix filter over the logical keyspace of a record.
///
/// Every supplied key is a case-sensitive literal prefix of the matching
/// field. Prefixes do not snap to path segments: `"Doc"` selects both
/// `"Documents/x"` and `"Docx"`. Absent and empty keys match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub domain: Option<String>,
    pub namespace: Option<String>,
    pub path: Option<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, prefix: impl Into<String>) -> Self {
        self.domain = Some(prefix.into());
        self
    }

    pub fn namespace(mut self, prefix: impl Into<String>) -> Self {
        self.namespace = Some(prefix.into());
        self
    }

    pub fn path(mut self, prefix: impl Into<String>) -> Self {
        self.path = Some(prefix.into());
        self
    }

    /// Active keys only; empty strings are treated as absent.
    pub fn domain_prefix(&self) -> Option<&str> {
        non_empty(&self.domain)
    }

    pub fn namespace_prefix(&self) -> Option<&str> {
        non_empty(&self.namespace)
    }

    pub fn path_prefix(&self) -> Option<&str> {
        non_empty(&self.path)
    }

    pub fn is_empty(&self) -> bool {
        self.domain_prefix().is_none()
            && self.namespace_prefix().is_none()
            && self.path_prefix().is_none()
    }

    pub fn matches(&self, record: &CatalogRecord) -> bool {
        self.matches_fields(&record.domain, &record.namespace, &record.relative_path)
    }

    pub fn matches_fields(&self, domain: &str, namespace: &str, relative_path: &str) -> bool {
        prefix_ok(self.domain_prefix(), domain)
            && prefix_ok(self.namespace_prefix(), namespace)
            && prefix_ok(self.path_prefix(), relative_path)
    }
}

fn non_empty(key: &Option<String>) -> Option<&str> {
    key.as_deref().filter(|s| !s.is_empty())
}

fn prefix_ok(prefix: Option<&str>, value: &str) -> bool {
    prefix.is_none_or(|p| value.starts_with(p))
}
