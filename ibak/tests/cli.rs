//! Integration tests for the ibak binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};

use ibak_core::fixture::{BackupFixture, modified_at};
use ibak_core::info::Info;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

fn ibak(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ibak"))
        .args(args)
        .env_remove("IBAK_LOG")
        .output()
        .expect("failed to run ibak")
}

fn stdout(o: &Output) -> String {
    String::from_utf8_lossy(&o.stdout).into_owned()
}

fn ok(o: &Output) {
    assert!(
        o.status.success(),
        "ibak failed: {}",
        String::from_utf8_lossy(&o.stderr)
    );
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn sample() -> BackupFixture {
    let mut fx = BackupFixture::new().unwrap();
    fx.add_dir("AppDomain-com.mojang.minecraftpe", "Documents", Some(modified_at(1_600_000_000)))
        .unwrap();
    fx.add_file(
        "AppDomain-com.mojang.minecraftpe",
        "Documents/world.dat",
        b"blocks",
        Some(modified_at(1_600_000_100)),
    )
    .unwrap();
    fx.add_file("AppDomain-com.example", "Library/prefs.plist", b"prefs", None)
        .unwrap();
    fx.add_file("CameraRollDomain", "Media/DCIM/100APPLE/IMG_0001.JPG", b"jpeg", None)
        .unwrap();
    fx
}

#[test]
fn export_with_prefix_filter() {
    let fx = sample();
    let out = TempDir::new().unwrap();
    let o = ibak(&[
        "export",
        path_str(fx.root()),
        path_str(out.path()),
        "--namespace",
        "com.mojang",
        "--restore-dates",
        "--no-progress",
    ]);
    ok(&o);
    assert!(stdout(&o).contains("2 exported, 0 skipped"));
    assert_eq!(
        fs::read(out.path().join("AppDomain/com.mojang.minecraftpe/Documents/world.dat")).unwrap(),
        b"blocks"
    );
    assert!(!out.path().join("AppDomain/com.example").exists());
    assert!(!out.path().join("CameraRollDomain").exists());
}

#[test]
fn export_json_report_lists_skips() {
    let mut fx = sample();
    fx.add_record("HomeDomain", "Library/gone.db", 1, None).unwrap();
    let out = TempDir::new().unwrap();
    let o = ibak(&[
        "export",
        path_str(fx.root()),
        path_str(out.path()),
        "--ignore-missing",
        "--workers",
        "3",
        "--no-progress",
        "--json",
    ]);
    ok(&o);
    let report: Value = serde_json::from_str(&stdout(&o)).unwrap();
    assert_eq!(report["exported_count"], 4);
    assert_eq!(report["skipped_count"], 1);
    assert_eq!(report["skipped_records"][0]["relative_path"], "Library/gone.db");
    assert_eq!(report["skipped_records"][0]["reason"], "ContentMissing");
}

#[test]
fn export_fails_on_missing_content_by_default() {
    let mut fx = sample();
    fx.add_record("HomeDomain", "Library/gone.db", 1, None).unwrap();
    let out = TempDir::new().unwrap();
    let o = ibak(&["export", path_str(fx.root()), path_str(out.path()), "--no-progress"]);
    assert!(!o.status.success());
    assert!(String::from_utf8_lossy(&o.stderr).contains("ContentMissing"));
}

#[test]
fn like_syntax_rejects_namespace() {
    let fx = sample();
    let out = TempDir::new().unwrap();
    let o = ibak(&[
        "export",
        path_str(fx.root()),
        path_str(out.path()),
        "--like-syntax",
        "--namespace",
        "com.%",
    ]);
    assert!(!o.status.success());
    assert!(String::from_utf8_lossy(&o.stderr).contains("InvalidQuery"));
}

#[test]
fn like_syntax_matches_raw_domain() {
    let fx = sample();
    let out = TempDir::new().unwrap();
    let o = ibak(&[
        "export",
        path_str(fx.root()),
        path_str(out.path()),
        "--like-syntax",
        "--domain",
        "AppDomain-com.example",
        "--no-progress",
    ]);
    ok(&o);
    assert!(out.path().join("AppDomain/com.example/Library/prefs.plist").is_file());
    assert!(!out.path().join("AppDomain/com.mojang.minecraftpe").exists());
}

#[test]
fn inspect_domains_and_namespaces() {
    let fx = sample();
    let o = ibak(&["inspect", "domains", path_str(fx.root())]);
    ok(&o);
    assert_eq!(stdout(&o), "AppDomain\nCameraRollDomain\n");

    let o = ibak(&["inspect", "namespaces", "AppDomain", path_str(fx.root())]);
    ok(&o);
    assert_eq!(stdout(&o), "com.example\ncom.mojang.minecraftpe\n");
}

#[test]
fn inspect_files_lists_sorted_rows() {
    let fx = sample();
    let o = ibak(&["inspect", "files", path_str(fx.root()), "--domain", "AppDomain"]);
    ok(&o);
    let text = stdout(&o);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("T  MODIFIED"));
    assert!(lines[1].ends_with("Library/prefs.plist"));
    assert!(lines[2].starts_with("D "));
    assert!(lines[3].ends_with("Documents/world.dat"));
}

#[test]
fn inspect_info_prints_summary() {
    let fx = sample();
    fx.write_manifest(false).unwrap();
    fx.write_info(&Info {
        device_name: Some("Test Phone".into()),
        product_version: Some("17.1".into()),
        last_backup_date: Some((SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)).into()),
        ..Default::default()
    })
    .unwrap();

    let o = ibak(&["inspect", "info", path_str(fx.root())]);
    ok(&o);
    let text = stdout(&o);
    assert!(text.contains(&format!("{:<25}Test Phone", "Device Name")));
    assert!(text.contains("2023-11-14 22:13:20"));
    assert!(text.contains(&format!("{:<25}No", "Encrypted")));
}

#[test]
fn encrypted_backups_are_refused() {
    let fx = sample();
    fx.write_manifest(true).unwrap();
    let o = ibak(&["inspect", "domains", path_str(fx.root())]);
    assert!(!o.status.success());
    assert!(String::from_utf8_lossy(&o.stderr).contains("Encrypted"));
}

#[test]
fn get_by_path_and_by_id() {
    let mut fx = sample();
    let id = fx
        .add_file("HomeDomain", "Library/SMS/sms.db", b"messages", None)
        .unwrap();
    // Lookups never touch the catalog.
    fs::remove_file(fx.root().join("Manifest.db")).unwrap();
    let out = TempDir::new().unwrap();

    let dest = out.path().join("sms.db");
    let o = ibak(&[
        "get",
        path_str(fx.root()),
        path_str(&dest),
        "--domain",
        "HomeDomain",
        "--path",
        "Library/SMS/sms.db",
    ]);
    ok(&o);
    assert_eq!(fs::read(&dest).unwrap(), b"messages");

    let o = ibak(&["get", path_str(fx.root()), path_str(out.path()), "--id", &id]);
    ok(&o);
    assert_eq!(fs::read(out.path().join(&id)).unwrap(), b"messages");
}

#[test]
fn get_requires_a_selector() {
    let fx = sample();
    let out = TempDir::new().unwrap();
    let o = ibak(&["get", path_str(fx.root()), path_str(out.path())]);
    assert!(!o.status.success());
}
