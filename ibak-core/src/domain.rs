// ibak_core/src/domain.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BackupError, Result};
use crate::metadata::{RecordMetadata, decode_metadata};
use crate::resolve::content_path;

pub const FLAG_REGULAR: i64 = 1;
pub const FLAG_DIRECTORY: i64 = 2;
pub const FLAG_SYMLINK: i64 = 4;

/// Splits a raw catalog domain on its first `-` into `(domain, namespace)`.
pub fn split_domain(raw: &str) -> (&str, &str) {
    raw.split_once('-').unwrap_or((raw, ""))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn from_flags(flags: i64) -> Option<Self> {
        match flags {
            FLAG_REGULAR => Some(Self::Regular),
            FLAG_DIRECTORY => Some(Self::Directory),
            FLAG_SYMLINK => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Single-letter code used in listings.
    pub fn code(self) -> char {
        match self {
            Self::Regular => 'F',
            Self::Directory => 'D',
            Self::Symlink => 'S',
        }
    }
}

/// Non-fatal decode issue attached to a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordWarning {
    MetadataDecode(String),
    UnknownEntryKind(Option<i64>),
}

/// One undecoded row of the `Files` relation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRow {
    pub identity: Option<String>,
    pub raw_domain: Option<String>,
    pub relative_path: Option<String>,
    pub flags: Option<i64>,
    pub metadata: Option<Vec<u8>>,
}

impl RawRow {
    pub fn new(
        identity: impl Into<String>,
        raw_domain: impl Into<String>,
        relative_path: impl Into<String>,
        flags: i64,
        metadata: Option<Vec<u8>>,
    ) -> Self {
        Self {
            identity: Some(identity.into()),
            raw_domain: Some(raw_domain.into()),
            relative_path: Some(relative_path.into()),
            flags: Some(flags),
            metadata,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogRecord {
    pub identity: String,
    pub raw_domain: String,
    pub domain: String,
    pub namespace: String,
    pub relative_path: String,
    pub kind: EntryKind,
    pub metadata: Option<RecordMetadata>,
    pub warnings: Vec<RecordWarning>,
}

impl CatalogRecord {
    pub fn decode(row: RawRow) -> Result<Self> {
        let identity = match row.identity {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(BackupError::MalformedRecord {
                    identity: None,
                    reason: "missing identity".into(),
                });
            }
        };
        let raw_domain = match row.raw_domain {
            Some(d) if !d.is_empty() => d,
            _ => {
                return Err(BackupError::MalformedRecord {
                    identity: Some(identity),
                    reason: "missing domain".into(),
                });
            }
        };

        let mut warnings = Vec::new();

        let kind = match row.flags.and_then(EntryKind::from_flags) {
            Some(kind) => kind,
            None => {
                warn!(%identity, flags = ?row.flags, "unknown entry kind, treating as regular file");
                warnings.push(RecordWarning::UnknownEntryKind(row.flags));
                EntryKind::Regular
            }
        };

        let metadata = match row.metadata.as_deref() {
            None | Some([]) => None,
            Some(blob) => match decode_metadata(blob) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(%identity, error = %e, "undecodable metadata, dates will not be restored");
                    warnings.push(RecordWarning::MetadataDecode(e.to_string()));
                    None
                }
            },
        };

        let (domain, namespace) = split_domain(&raw_domain);
        let (domain, namespace) = (domain.to_owned(), namespace.to_owned());

        Ok(Self {
            identity,
            raw_domain,
            domain,
            namespace,
            relative_path: row.relative_path.unwrap_or_default(),
            kind,
            metadata,
            warnings,
        })
    }

    pub fn content_path(&self) -> PathBuf {
        content_path(&self.identity)
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|m| m.last_modified)
    }

    pub fn created(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|m| m.created)
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.size)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.target.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::metadata_blob;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_on_first_separator_only() {
        assert_eq!(
            split_domain("AppDomain-com.mojang.minecraftpe"),
            ("AppDomain", "com.mojang.minecraftpe")
        );
        assert_eq!(
            split_domain("AppDomainGroup-group.com-x"),
            ("AppDomainGroup", "group.com-x")
        );
        assert_eq!(split_domain("CameraRollDomain"), ("CameraRollDomain", ""));
        assert_eq!(split_domain(""), ("", ""));
        assert_eq!(split_domain("-"), ("", ""));
    }

    #[test]
    fn split_reconstructs_single_separator_domains() {
        for raw in ["AppDomain-com.example", "HomeDomain-settings", "A-b", "X-"] {
            let (d, ns) = split_domain(raw);
            let rebuilt = if ns.is_empty() && !raw.ends_with('-') {
                d.to_string()
            } else {
                format!("{d}-{ns}")
            };
            assert_eq!(rebuilt, raw);
        }
    }

    #[test]
    fn split_is_idempotent_on_its_domain_part() {
        for raw in ["AppDomain-com.example", "MediaDomain", "a-b-c"] {
            let (d, _) = split_domain(raw);
            assert_eq!(split_domain(d), (d, ""));
        }
    }

    #[test]
    fn decode_with_metadata() {
        let meta = RecordMetadata {
            last_modified: Some(1_700_000_000),
            size: Some(5),
            ..Default::default()
        };
        let row = RawRow::new(
            "id1",
            "AppDomain-com.example",
            "path/to/file",
            FLAG_REGULAR,
            Some(metadata_blob(&meta)),
        );
        let r = CatalogRecord::decode(row).unwrap();
        assert_eq!(r.identity, "id1");
        assert_eq!(r.domain, "AppDomain");
        assert_eq!(r.namespace, "com.example");
        assert_eq!(r.relative_path, "path/to/file");
        assert_eq!(r.kind, EntryKind::Regular);
        assert_eq!(r.last_modified(), Some(1_700_000_000));
        assert_eq!(r.size(), Some(5));
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn missing_identity_or_domain_is_malformed() {
        let mut row = RawRow::new("id", "MediaDomain", "a", FLAG_REGULAR, None);
        row.identity = None;
        assert!(matches!(
            CatalogRecord::decode(row),
            Err(BackupError::MalformedRecord { identity: None, .. })
        ));

        let mut row = RawRow::new("id", "MediaDomain", "a", FLAG_REGULAR, None);
        row.raw_domain = None;
        match CatalogRecord::decode(row) {
            Err(BackupError::MalformedRecord { identity, .. }) => {
                assert_eq!(identity.as_deref(), Some("id"))
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn bad_metadata_degrades_to_absent() {
        let row = RawRow::new("id", "MediaDomain", "a", FLAG_REGULAR, Some(b"junk".to_vec()));
        let r = CatalogRecord::decode(row).unwrap();
        assert!(r.metadata.is_none());
        assert!(matches!(r.warnings[..], [RecordWarning::MetadataDecode(_)]));
    }

    #[test]
    fn unknown_flags_map_to_regular_with_warning() {
        let row = RawRow::new("id", "MediaDomain", "a", 10, None);
        let r = CatalogRecord::decode(row).unwrap();
        assert_eq!(r.kind, EntryKind::Regular);
        assert_eq!(r.warnings, vec![RecordWarning::UnknownEntryKind(Some(10))]);
    }

    #[test]
    fn domain_root_entry_has_empty_path() {
        let mut row = RawRow::new("id", "HomeDomain", "", FLAG_DIRECTORY, None);
        row.relative_path = None;
        let r = CatalogRecord::decode(row).unwrap();
        assert_eq!(r.relative_path, "");
        assert_eq!(r.kind, EntryKind::Directory);
    }
}
