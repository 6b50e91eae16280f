//! Decoding of the per-record metadata blob.
//!
//! The blob is a property list in keyed-archiver form: a `$objects` array whose
//! second element is the archived file object, with string values (such as a
//! symlink target) stored out of line and referenced by UID.

use std::io::Cursor;

use plist::{Dictionary, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Seconds since the Unix epoch.
    pub last_modified: Option<i64>,
    /// Seconds since the Unix epoch.
    pub created: Option<i64>,
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
    pub target: Option<String>,
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("not a property list: {0}")]
    Parse(#[from] plist::Error),

    #[error("unexpected archive layout: {0}")]
    Layout(&'static str),
}

pub fn decode_metadata(blob: &[u8]) -> Result<RecordMetadata, MetadataError> {
    let root = Value::from_reader(Cursor::new(blob))?;
    let root = root
        .as_dictionary()
        .ok_or(MetadataError::Layout("root is not a dictionary"))?;
    let objects = root
        .get("$objects")
        .and_then(Value::as_array)
        .ok_or(MetadataError::Layout("missing $objects array"))?;
    let file = file_object(root, objects)?;

    Ok(RecordMetadata {
        last_modified: integer(file, "LastModified"),
        created: integer(file, "Birth"),
        mode: integer(file, "Mode").and_then(|v| u32::try_from(v).ok()),
        size: integer(file, "Size").and_then(|v| u64::try_from(v).ok()),
        user_id: integer(file, "UserID").and_then(|v| u32::try_from(v).ok()),
        group_id: integer(file, "GroupID").and_then(|v| u32::try_from(v).ok()),
        target: file
            .get("Target")
            .and_then(|v| deref(objects, v))
            .and_then(Value::as_string)
            .map(str::to_owned),
    })
}

fn file_object<'a>(root: &'a Dictionary, objects: &'a [Value]) -> Result<&'a Dictionary, MetadataError> {
    if let Some(obj) = objects.get(1).and_then(Value::as_dictionary) {
        return Ok(obj);
    }
    root.get("$top")
        .and_then(Value::as_dictionary)
        .and_then(|top| top.get("root"))
        .and_then(|r| deref(objects, r))
        .and_then(Value::as_dictionary)
        .ok_or(MetadataError::Layout("no archived file object"))
}

/// Follows a UID reference into `$objects`; inline values resolve to themselves.
fn deref<'a>(objects: &'a [Value], v: &'a Value) -> Option<&'a Value> {
    match v {
        Value::Uid(uid) => usize::try_from(uid.get())
            .ok()
            .and_then(|idx| objects.get(idx)),
        other => Some(other),
    }
}

fn integer(dict: &Dictionary, key: &str) -> Option<i64> {
    match dict.get(key)? {
        Value::Integer(i) => i
            .as_signed()
            .or_else(|| i.as_unsigned().and_then(|u| i64::try_from(u).ok())),
        Value::Real(r) if r.is_finite() => Some(*r as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::metadata_blob;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_archived_file_object() {
        let meta = RecordMetadata {
            last_modified: Some(1_600_000_000),
            created: Some(1_500_000_000),
            mode: Some(0o100644),
            size: Some(42),
            user_id: Some(501),
            group_id: Some(501),
            target: None,
        };
        let decoded = decode_metadata(&metadata_blob(&meta)).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn resolves_symlink_target_through_uid() {
        let meta = RecordMetadata {
            mode: Some(0o120755),
            target: Some("../other/file".into()),
            ..Default::default()
        };
        let decoded = decode_metadata(&metadata_blob(&meta)).unwrap();
        assert_eq!(decoded.target.as_deref(), Some("../other/file"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = decode_metadata(b"definitely not a plist").unwrap_err();
        assert!(matches!(err, MetadataError::Parse(_)));
    }

    #[test]
    fn plist_without_objects_is_a_layout_error() {
        let mut dict = Dictionary::new();
        dict.insert("Name".into(), Value::String("example".into()));
        let mut buf = Vec::new();
        Value::Dictionary(dict).to_writer_binary(&mut buf).unwrap();

        let err = decode_metadata(&buf).unwrap_err();
        assert!(matches!(err, MetadataError::Layout(_)));
    }
}
