//! Device and backup descriptors stored next to the catalog.

use std::path::Path;
use std::time::SystemTime;

use plist::{Date, Dictionary, Value};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::warn;

use crate::error::Result;

pub const INFO_FILE: &str = "Info.plist";
pub const STATUS_FILE: &str = "Status.plist";
pub const MANIFEST_FILE: &str = "Manifest.plist";

const UNKNOWN: &str = "Unknown";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(rename = "Device Name", default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(rename = "Product Type", default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(rename = "Product Name", default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(rename = "Product Version", default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
    #[serde(rename = "Serial Number", default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(rename = "IMEI", default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(rename = "Unique Identifier", default, skip_serializing_if = "Option::is_none")]
    pub unique_identifier: Option<String>,
    #[serde(rename = "Last Backup Date", default, skip_serializing_if = "Option::is_none")]
    pub last_backup_date: Option<Date>,
    /// Bundle identifier to application record.
    #[serde(rename = "Applications", default, skip_serializing_if = "Option::is_none")]
    pub applications: Option<Dictionary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "BackupState", default)]
    pub backup_state: Option<String>,
    #[serde(rename = "SnapshotState", default)]
    pub snapshot_state: Option<String>,
    #[serde(rename = "IsFullBackup", default)]
    pub is_full_backup: Option<bool>,
    #[serde(rename = "UUID", default)]
    pub uuid: Option<String>,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "Date", default)]
    pub date: Option<Date>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    #[serde(rename = "IsEncrypted", default, skip_serializing_if = "Option::is_none")]
    pub is_encrypted: Option<bool>,
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Date>,
    #[serde(rename = "WasPasscodeSet", default, skip_serializing_if = "Option::is_none")]
    pub was_passcode_set: Option<bool>,
}

impl BackupManifest {
    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted.unwrap_or(false)
    }
}

/// One installed application, from its store metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub bundle_id: String,
    pub name: String,
    pub title: String,
    pub genre: String,
    pub version: String,
}

#[derive(Default, Deserialize)]
struct StoreMetadata {
    #[serde(rename = "itemName", default)]
    item_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    genre: String,
    #[serde(rename = "bundleShortVersionString", default)]
    version: String,
}

/// Reads a property list in either XML or binary form.
pub fn read_plist<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(plist::from_file(path)?)
}

impl Info {
    pub fn load(path: &Path) -> Result<Self> {
        read_plist(path)
    }

    pub fn last_backup(&self) -> Option<OffsetDateTime> {
        self.last_backup_date.map(to_datetime)
    }

    /// Applications with decodable store metadata. Entries without any
    /// metadata are listed by bundle id alone.
    pub fn apps(&self) -> Vec<AppInfo> {
        let Some(apps) = &self.applications else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(apps.len());
        for (bundle_id, entry) in apps {
            let blob = entry
                .as_dictionary()
                .and_then(|d| d.get("iTunesMetadata"))
                .and_then(Value::as_data);
            let meta = match blob {
                None | Some([]) => StoreMetadata::default(),
                Some(bytes) => match plist::from_bytes::<StoreMetadata>(bytes) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%bundle_id, error = %e, "undecodable app metadata, skipped");
                        continue;
                    }
                },
            };
            out.push(AppInfo {
                bundle_id: bundle_id.clone(),
                name: meta.item_name,
                title: meta.title,
                genre: meta.genre,
                version: meta.version,
            });
        }
        out
    }
}

fn to_datetime(date: Date) -> OffsetDateTime {
    OffsetDateTime::from(SystemTime::from(date))
}

fn format_utc(dt: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    dt.format(fmt).unwrap_or_else(|_| UNKNOWN.to_owned())
}

/// Human-readable device and backup properties, in display order.
pub fn summary(info: &Info, manifest: Option<&BackupManifest>) -> Vec<(String, String)> {
    let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_owned());
    let encrypted = match manifest {
        Some(m) if m.is_encrypted() => "Yes",
        Some(_) => "No",
        None => UNKNOWN,
    };
    [
        ("Device Name", or_unknown(&info.device_name)),
        ("Device Type", or_unknown(&info.product_type)),
        ("Model Name", or_unknown(&info.product_name)),
        ("OS Version", or_unknown(&info.product_version)),
        ("Serial Number", or_unknown(&info.serial_number)),
        ("IMEI", or_unknown(&info.imei)),
        ("Device ID", or_unknown(&info.unique_identifier)),
        (
            "Backup Date (UTC)",
            info.last_backup()
                .map(format_utc)
                .unwrap_or_else(|| UNKNOWN.to_owned()),
        ),
        ("Encrypted", encrypted.to_owned()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect()
}
