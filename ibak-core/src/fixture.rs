//! Scratch archives for tests: a `Manifest.db`, content files in the
//! two-level layout and optional descriptor plists, all under a temp dir.

use std::fs;
use std::path::Path;

use plist::{Dictionary, Uid, Value};
use rusqlite::{Connection, params};
use tempfile::TempDir;

use crate::catalog::CATALOG_FILE;
use crate::domain::{FLAG_DIRECTORY, FLAG_REGULAR, FLAG_SYMLINK, RawRow};
use crate::error::Result;
use crate::info::{BackupManifest, INFO_FILE, Info, MANIFEST_FILE, STATUS_FILE};
use crate::metadata::RecordMetadata;
use crate::resolve::{ContentResolver, file_identity};

pub const FILES_SCHEMA: &str = "CREATE TABLE Files (
    fileID TEXT PRIMARY KEY,
    domain TEXT,
    relativePath TEXT,
    flags INTEGER,
    file BLOB
);";

pub fn insert_row(conn: &Connection, row: &RawRow) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO Files (fileID, domain, relativePath, flags, file) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            row.identity,
            row.raw_domain,
            row.relative_path,
            row.flags,
            row.metadata
        ],
    )
}

/// Encodes `meta` the way devices archive file attributes.
pub fn metadata_blob(meta: &RecordMetadata) -> Vec<u8> {
    let mut file = Dictionary::new();
    put(&mut file, "LastModified", meta.last_modified);
    put(&mut file, "Birth", meta.created);
    put(&mut file, "Mode", meta.mode.map(i64::from));
    put(&mut file, "Size", meta.size.and_then(|s| i64::try_from(s).ok()));
    put(&mut file, "UserID", meta.user_id.map(i64::from));
    put(&mut file, "GroupID", meta.group_id.map(i64::from));

    let mut objects = vec![Value::String("$null".into())];
    let mut trailing = Vec::new();
    if let Some(target) = &meta.target {
        file.insert("Target".into(), Value::Uid(Uid::new(2)));
        trailing.push(Value::String(target.clone()));
    }
    let class_idx = 2 + trailing.len() as u64;
    file.insert("$class".into(), Value::Uid(Uid::new(class_idx)));
    objects.push(Value::Dictionary(file));
    objects.extend(trailing);

    let mut class = Dictionary::new();
    class.insert("$classname".into(), Value::String("MBFile".into()));
    class.insert(
        "$classes".into(),
        Value::Array(vec![
            Value::String("MBFile".into()),
            Value::String("NSObject".into()),
        ]),
    );
    objects.push(Value::Dictionary(class));

    let mut top = Dictionary::new();
    top.insert("root".into(), Value::Uid(Uid::new(1)));

    let mut archive = Dictionary::new();
    archive.insert("$archiver".into(), Value::String("NSKeyedArchiver".into()));
    archive.insert("$version".into(), Value::Integer(100_000i64.into()));
    archive.insert("$top".into(), Value::Dictionary(top));
    archive.insert("$objects".into(), Value::Array(objects));

    let mut buf = Vec::new();
    // Writing a well-formed value into memory cannot fail.
    let _ = Value::Dictionary(archive).to_writer_binary(&mut buf);
    buf
}

fn put(dict: &mut Dictionary, key: &str, v: Option<i64>) {
    if let Some(v) = v {
        dict.insert(key.into(), Value::Integer(v.into()));
    }
}

/// Metadata carrying only a modification time.
pub fn modified_at(unix_secs: i64) -> RecordMetadata {
    RecordMetadata {
        last_modified: Some(unix_secs),
        ..Default::default()
    }
}

pub struct BackupFixture {
    dir: TempDir,
    conn: Connection,
}

impl BackupFixture {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let conn = Connection::open(dir.path().join(CATALOG_FILE))?;
        conn.execute_batch(FILES_SCHEMA)?;
        Ok(Self { dir, conn })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Catalog row plus content file; returns the identity.
    pub fn add_file(
        &mut self,
        raw_domain: &str,
        relative_path: &str,
        contents: &[u8],
        meta: Option<RecordMetadata>,
    ) -> Result<String> {
        let identity = self.add_record(raw_domain, relative_path, FLAG_REGULAR, meta)?;
        self.write_content(&identity, contents)?;
        Ok(identity)
    }

    pub fn add_dir(
        &mut self,
        raw_domain: &str,
        relative_path: &str,
        meta: Option<RecordMetadata>,
    ) -> Result<String> {
        self.add_record(raw_domain, relative_path, FLAG_DIRECTORY, meta)
    }

    pub fn add_symlink(
        &mut self,
        raw_domain: &str,
        relative_path: &str,
        target: Option<&str>,
        last_modified: Option<i64>,
    ) -> Result<String> {
        let meta = RecordMetadata {
            last_modified,
            target: target.map(str::to_owned),
            ..Default::default()
        };
        self.add_record(raw_domain, relative_path, FLAG_SYMLINK, Some(meta))
    }

    /// Catalog row only, identity derived from domain and path. Regular
    /// files added this way have no content.
    pub fn add_record(
        &mut self,
        raw_domain: &str,
        relative_path: &str,
        flags: i64,
        meta: Option<RecordMetadata>,
    ) -> Result<String> {
        let identity = file_identity(raw_domain, relative_path);
        let row = RawRow::new(
            identity.clone(),
            raw_domain,
            relative_path,
            flags,
            meta.as_ref().map(metadata_blob),
        );
        self.add_row(&row)?;
        Ok(identity)
    }

    pub fn add_row(&mut self, row: &RawRow) -> Result<()> {
        insert_row(&self.conn, row)?;
        Ok(())
    }

    pub fn write_content(&self, identity: &str, contents: &[u8]) -> Result<()> {
        let path = ContentResolver::new(self.root()).resolve(identity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn write_manifest(&self, encrypted: bool) -> Result<()> {
        let manifest = BackupManifest {
            is_encrypted: Some(encrypted),
            version: Some("10.0".into()),
            ..Default::default()
        };
        plist::to_file_xml(self.root().join(MANIFEST_FILE), &manifest)?;
        Ok(())
    }

    pub fn write_info(&self, info: &Info) -> Result<()> {
        plist::to_file_xml(self.root().join(INFO_FILE), info)?;
        Ok(())
    }

    /// `Status.plist` of a finished full backup.
    pub fn write_status(&self) -> Result<()> {
        let mut status = Dictionary::new();
        status.insert("BackupState".into(), Value::String("new".into()));
        status.insert("SnapshotState".into(), Value::String("finished".into()));
        status.insert("IsFullBackup".into(), Value::Boolean(true));
        status.insert("Version".into(), Value::String("3.3".into()));
        Value::Dictionary(status).to_file_binary(self.root().join(STATUS_FILE))?;
        Ok(())
    }
}
