use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use filetime::FileTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{CatalogRecord, EntryKind, RecordWarning};
use crate::error::{BackupError, Result};
use crate::progress::Progress;
use crate::resolve::ContentResolver;

/// Records handed to the worker pool per batch, per worker.
const BATCH_PER_WORKER: usize = 64;

/// Shared flag for stopping an export between records.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub restore_dates: bool,
    pub restore_symlinks: bool,
    /// Skip records whose content (or symlink target) is missing instead of failing.
    pub ignore_missing: bool,
    /// Known size of the selection; forwarded to the progress reporter.
    pub total_count: Option<u64>,
    /// Records copied concurrently; 0 or 1 means one at a time.
    pub workers: usize,
    pub cancel: Option<CancelToken>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            restore_dates: false,
            restore_symlinks: false,
            ignore_missing: false,
            total_count: None,
            workers: 1,
            cancel: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    ContentMissing,
    SymlinkTargetMissing,
    SymlinksDisabled,
    UnsupportedPlatform,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub identity: String,
    pub domain: String,
    pub namespace: String,
    pub relative_path: String,
    pub reason: SkipReason,
}

impl SkippedRecord {
    fn new(record: &CatalogRecord, reason: SkipReason) -> Self {
        Self {
            identity: record.identity.clone(),
            domain: record.domain.clone(),
            namespace: record.namespace.clone(),
            relative_path: record.relative_path.clone(),
            reason,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportWarning {
    Record {
        identity: String,
        warning: RecordWarning,
    },
    Timestamp {
        path: PathBuf,
        reason: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub exported_count: u64,
    pub skipped_count: u64,
    pub skipped_records: Vec<SkippedRecord>,
    pub warnings: Vec<ExportWarning>,
    /// Set when a cancel token stopped the export early.
    pub cancelled: bool,
    /// Records not reached because of cancellation, when the total was known.
    pub pending: Option<u64>,
}

impl ExportReport {
    pub fn processed(&self) -> u64 {
        self.exported_count + self.skipped_count
    }

    /// Nothing skipped, nothing degraded, not cancelled.
    pub fn is_clean(&self) -> bool {
        self.skipped_count == 0 && self.warnings.is_empty() && !self.cancelled
    }
}

enum Outcome {
    Exported {
        dir_mtime: Option<(PathBuf, i64)>,
        warnings: Vec<ExportWarning>,
    },
    Skipped(SkipReason),
}

#[derive(Default)]
struct Tally {
    report: ExportReport,
    dir_times: Vec<(PathBuf, i64)>,
}

impl Tally {
    fn absorb(&mut self, record: &CatalogRecord, outcome: Outcome) {
        for w in &record.warnings {
            self.report.warnings.push(ExportWarning::Record {
                identity: record.identity.clone(),
                warning: w.clone(),
            });
        }
        match outcome {
            Outcome::Exported {
                dir_mtime,
                warnings,
            } => {
                self.report.exported_count += 1;
                self.report.warnings.extend(warnings);
                self.dir_times.extend(dir_mtime);
            }
            Outcome::Skipped(reason) => {
                self.report.skipped_count += 1;
                self.report
                    .skipped_records
                    .push(SkippedRecord::new(record, reason));
            }
        }
    }
}

/// Reconstructed location of a record: `root/domain[/namespace]/relative_path`.
///
/// Domain and namespace must each be a single plain path component and the
/// relative path may not climb out with `..`.
pub fn output_path(root: &Path, record: &CatalogRecord) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    push_single(&mut out, &record.domain)?;
    if !record.namespace.is_empty() {
        push_single(&mut out, &record.namespace)?;
    }
    for part in record.relative_path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(BackupError::UnsafePath(format!(
                    "{}: {}",
                    record.identity, record.relative_path
                )));
            }
            p => out.push(p),
        }
    }
    Ok(out)
}

fn push_single(out: &mut PathBuf, name: &str) -> Result<()> {
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => {
            out.push(name);
            Ok(())
        }
        _ => Err(BackupError::UnsafePath(format!("domain component {name:?}"))),
    }
}

pub struct Exporter {
    resolver: ContentResolver,
    options: ExportOptions,
}

impl Exporter {
    pub fn new(resolver: ContentResolver, options: ExportOptions) -> Self {
        Self { resolver, options }
    }

    /// Materializes every record of `selection` under `output_root`.
    ///
    /// A missing content file stops the export with `ContentMissing` unless
    /// `ignore_missing` is set. Files already written stay on disk either way.
    pub fn export<I>(
        &self,
        selection: I,
        output_root: &Path,
        progress: Option<&dyn Progress>,
    ) -> Result<ExportReport>
    where
        I: Iterator<Item = Result<CatalogRecord>>,
    {
        fs::create_dir_all(output_root)?;
        if let (Some(p), Some(total)) = (progress, self.options.total_count) {
            p.start(total);
        }

        let mut tally = Tally::default();
        let run = if self.options.workers > 1 {
            self.run_pool(selection, output_root, progress, &mut tally)
        } else {
            self.run_sequential(selection, output_root, progress, &mut tally)
        };
        if let Some(p) = progress {
            p.finish();
        }
        run?;

        // Directory times last: populating a directory bumps its mtime.
        if self.options.restore_dates {
            for (path, mtime) in std::mem::take(&mut tally.dir_times) {
                if let Err(e) = set_times(&path, mtime, false) {
                    warn!(path = %path.display(), error = %e, "failed to restore directory date");
                    tally.report.warnings.push(ExportWarning::Timestamp {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut report = tally.report;
        if report.cancelled {
            report.pending = self
                .options
                .total_count
                .map(|t| t.saturating_sub(report.processed()));
        }
        info!(
            exported = report.exported_count,
            skipped = report.skipped_count,
            warnings = report.warnings.len(),
            cancelled = report.cancelled,
            "export finished"
        );
        Ok(report)
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    fn run_sequential<I>(
        &self,
        selection: I,
        root: &Path,
        progress: Option<&dyn Progress>,
        tally: &mut Tally,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<CatalogRecord>>,
    {
        let mut selection = selection;
        loop {
            if self.cancelled() {
                tally.report.cancelled = true;
                break;
            }
            let Some(item) = selection.next() else {
                break;
            };
            let record = item?;
            let outcome = self.process(&record, root)?;
            tally.absorb(&record, outcome);
            if let Some(p) = progress {
                p.tick();
            }
        }
        Ok(())
    }

    fn run_pool<I>(
        &self,
        mut selection: I,
        root: &Path,
        progress: Option<&dyn Progress>,
        tally: &mut Tally,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<CatalogRecord>>,
    {
        let workers = self.options.workers;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| BackupError::WorkerPool(e.to_string()))?;
        let batch_size = workers * BATCH_PER_WORKER;

        loop {
            if self.cancelled() {
                tally.report.cancelled = true;
                break;
            }
            // Catalog reads and the fatal checks stay on this thread, so a
            // batch ends right before the record a sequential run would stop at.
            let mut batch = Vec::with_capacity(batch_size);
            let mut links = Vec::new();
            let mut fatal = None;
            while batch.len() < batch_size {
                match selection.next() {
                    None => break,
                    Some(Err(e)) => {
                        fatal = Some(e);
                        break;
                    }
                    Some(Ok(record)) => match self.preflight(&record, root, &mut links) {
                        Ok(()) => batch.push(record),
                        Err(e) => {
                            fatal = Some(e);
                            break;
                        }
                    },
                }
            }
            if batch.is_empty() && fatal.is_none() {
                break;
            }

            let stop = AtomicBool::new(false);
            let outcomes: Vec<Option<Result<Outcome>>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|record| {
                        if stop.load(Ordering::SeqCst) {
                            return None;
                        }
                        let outcome = self.process(record, root);
                        match (&outcome, progress) {
                            (Ok(_), Some(p)) => p.tick(),
                            (Err(_), _) => stop.store(true, Ordering::SeqCst),
                            _ => {}
                        }
                        Some(outcome)
                    })
                    .collect()
            });
            for (record, outcome) in batch.iter().zip(outcomes) {
                if let Some(outcome) = outcome {
                    tally.absorb(record, outcome?);
                }
            }
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs the checks that end a sequential export without touching the
    /// output tree. `links` collects symlink destinations earlier in the
    /// batch; nothing later in the batch may be written beneath them.
    fn preflight(&self, record: &CatalogRecord, root: &Path, links: &mut Vec<PathBuf>) -> Result<()> {
        let dest = output_path(root, record)?;
        if self.options.restore_symlinks {
            // A directory may not reuse a link's path either; files replace links.
            let under = |link: &PathBuf| {
                dest.starts_with(link) && (dest != *link || record.kind == EntryKind::Directory)
            };
            if let Some(link) = links.iter().find(|&l| under(l)) {
                return Err(BackupError::UnsafePath(format!(
                    "{} is a restored symlink",
                    link.display()
                )));
            }
        }
        match record.kind {
            EntryKind::Regular if !self.options.ignore_missing => {
                let src_path = self.resolver.resolve(&record.identity);
                if matches!(fs::metadata(&src_path), Err(e) if e.kind() == io::ErrorKind::NotFound) {
                    return Err(content_missing(record, src_path));
                }
            }
            EntryKind::Symlink if self.options.restore_symlinks => {
                match record.symlink_target() {
                    Some(_) => links.push(dest),
                    None if !self.options.ignore_missing => {
                        return Err(symlink_target_missing(record));
                    }
                    None => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn process(&self, record: &CatalogRecord, root: &Path) -> Result<Outcome> {
        let dest = output_path(root, record)?;
        debug!(identity = %record.identity, kind = ?record.kind, dest = %dest.display(), "export record");
        match record.kind {
            EntryKind::Directory => {
                if self.options.restore_symlinks {
                    reject_symlinked_ancestor(root, &dest)?;
                }
                fs::create_dir_all(&dest)?;
                let dir_mtime = if self.options.restore_dates {
                    record.last_modified().map(|t| (dest, t))
                } else {
                    None
                };
                Ok(Outcome::Exported {
                    dir_mtime,
                    warnings: Vec::new(),
                })
            }
            EntryKind::Regular => self.copy_regular(record, root, dest),
            EntryKind::Symlink => self.restore_symlink(record, root, dest),
        }
    }

    fn copy_regular(&self, record: &CatalogRecord, root: &Path, dest: PathBuf) -> Result<Outcome> {
        let src_path = self.resolver.resolve(&record.identity);
        let mut src = match File::open(&src_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.options.ignore_missing {
                    warn!(identity = %record.identity, path = %record.relative_path, "content missing, skipped");
                    return Ok(Outcome::Skipped(SkipReason::ContentMissing));
                }
                return Err(content_missing(record, src_path));
            }
            Err(e) => return Err(e.into()),
        };

        self.prepare_target(root, &dest)?;
        {
            let mut out = File::create(&dest)?;
            io::copy(&mut src, &mut out)?;
        }

        let mut warnings = Vec::new();
        if self.options.restore_dates {
            restore_record_times(record, &dest, false, &mut warnings);
        }
        Ok(Outcome::Exported {
            dir_mtime: None,
            warnings,
        })
    }

    fn restore_symlink(&self, record: &CatalogRecord, root: &Path, dest: PathBuf) -> Result<Outcome> {
        if !self.options.restore_symlinks {
            return Ok(Outcome::Skipped(SkipReason::SymlinksDisabled));
        }
        let Some(target) = record.symlink_target() else {
            if self.options.ignore_missing {
                warn!(identity = %record.identity, path = %record.relative_path, "symlink target missing, skipped");
                return Ok(Outcome::Skipped(SkipReason::SymlinkTargetMissing));
            }
            return Err(symlink_target_missing(record));
        };

        self.prepare_target(root, &dest)?;
        if !create_symlink(target, &dest)? {
            warn!(identity = %record.identity, "symbolic links are not supported on this platform");
            return Ok(Outcome::Skipped(SkipReason::UnsupportedPlatform));
        }

        let mut warnings = Vec::new();
        if self.options.restore_dates {
            restore_record_times(record, &dest, true, &mut warnings);
        }
        Ok(Outcome::Exported {
            dir_mtime: None,
            warnings,
        })
    }

    /// Creates the parent of `dest` and clears a previous non-directory entry
    /// at `dest`, so links and files replace each other across runs.
    fn prepare_target(&self, root: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if self.options.restore_symlinks {
                reject_symlinked_ancestor(root, parent)?;
            }
            fs::create_dir_all(parent)?;
        }
        match fs::symlink_metadata(dest) {
            Ok(md) if !md.is_dir() => fs::remove_file(dest)?,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

fn content_missing(record: &CatalogRecord, content_path: PathBuf) -> BackupError {
    BackupError::ContentMissing {
        identity: record.identity.clone(),
        domain: record.domain.clone(),
        namespace: record.namespace.clone(),
        relative_path: record.relative_path.clone(),
        content_path,
    }
}

fn symlink_target_missing(record: &CatalogRecord) -> BackupError {
    BackupError::SymlinkTargetMissing {
        identity: record.identity.clone(),
        relative_path: record.relative_path.clone(),
    }
}

// A restored link must not redirect later writes outside the output root.
fn reject_symlinked_ancestor(root: &Path, dir: &Path) -> Result<()> {
    let Ok(rel) = dir.strip_prefix(root) else {
        return Ok(());
    };
    let mut cur = root.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        match fs::symlink_metadata(&cur) {
            Ok(md) if md.file_type().is_symlink() => {
                return Err(BackupError::UnsafePath(format!(
                    "{} is a restored symlink",
                    cur.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn restore_record_times(
    record: &CatalogRecord,
    dest: &Path,
    symlink: bool,
    warnings: &mut Vec<ExportWarning>,
) {
    let Some(mtime) = record.last_modified() else {
        return;
    };
    if let Err(e) = set_times(dest, mtime, symlink) {
        warn!(path = %dest.display(), error = %e, "failed to restore modified date");
        warnings.push(ExportWarning::Timestamp {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        });
    }
    if record.created().is_some() {
        debug!(path = %dest.display(), "creation time is not restorable here");
    }
}

fn set_times(path: &Path, unix_secs: i64, symlink: bool) -> io::Result<()> {
    let t = FileTime::from_unix_time(unix_secs, 0);
    if symlink {
        filetime::set_symlink_file_times(path, t, t)
    } else {
        filetime::set_file_times(path, t, t)
    }
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> io::Result<bool> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(true)
}

#[cfg(not(unix))]
fn create_symlink(_target: &str, _link: &Path) -> io::Result<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FLAG_DIRECTORY, FLAG_REGULAR, FLAG_SYMLINK, RawRow};
    use crate::progress::CountingProgress;
    use crate::selection::ExportSelection;
    use tempfile::TempDir;

    fn rec(raw_domain: &str, path: &str, flags: i64) -> CatalogRecord {
        CatalogRecord::decode(RawRow::new("ab12", raw_domain, path, flags, None)).unwrap()
    }

    #[test]
    fn output_path_omits_empty_namespace() {
        let root = Path::new("/out");
        assert_eq!(
            output_path(root, &rec("CameraRollDomain", "Media/DCIM/a.MOV", FLAG_REGULAR)).unwrap(),
            PathBuf::from("/out/CameraRollDomain/Media/DCIM/a.MOV")
        );
        assert_eq!(
            output_path(root, &rec("AppDomain-com.example", "Documents", FLAG_DIRECTORY)).unwrap(),
            PathBuf::from("/out/AppDomain/com.example/Documents")
        );
        assert_eq!(
            output_path(root, &rec("HomeDomain", "", FLAG_DIRECTORY)).unwrap(),
            PathBuf::from("/out/HomeDomain")
        );
    }

    #[test]
    fn output_path_rejects_escapes() {
        let root = Path::new("/out");
        assert!(matches!(
            output_path(root, &rec("HomeDomain", "Library/../../etc/passwd", FLAG_REGULAR)),
            Err(BackupError::UnsafePath(_))
        ));
        assert!(matches!(
            output_path(root, &rec("..-x", "a", FLAG_REGULAR)),
            Err(BackupError::UnsafePath(_))
        ));
        assert!(matches!(
            output_path(root, &rec("AppDomain-a/b", "a", FLAG_REGULAR)),
            Err(BackupError::UnsafePath(_))
        ));
    }

    #[test]
    fn directories_are_idempotent_and_ticked() {
        let out = TempDir::new().unwrap();
        let rows = vec![
            RawRow::new("d1", "HomeDomain", "Library", FLAG_DIRECTORY, None),
            RawRow::new("d2", "HomeDomain", "Library", FLAG_DIRECTORY, None),
        ];
        let progress = CountingProgress::default();
        let exporter = Exporter::new(
            ContentResolver::new(out.path().join("archive")),
            ExportOptions {
                total_count: Some(2),
                ..Default::default()
            },
        );
        let report = exporter
            .export(ExportSelection::from_rows(rows), out.path(), Some(&progress))
            .unwrap();
        assert_eq!(report.exported_count, 2);
        assert!(report.is_clean());
        assert!(out.path().join("HomeDomain/Library").is_dir());
        assert_eq!(progress.total(), 2);
        assert_eq!(progress.done(), 2);
    }

    #[test]
    fn symlinks_skipped_unless_enabled() {
        let out = TempDir::new().unwrap();
        let rows = vec![RawRow::new("s1", "HomeDomain", "link", FLAG_SYMLINK, None)];
        let exporter = Exporter::new(
            ContentResolver::new(out.path()),
            ExportOptions {
                ignore_missing: true,
                restore_dates: true,
                ..Default::default()
            },
        );
        let report = exporter
            .export(ExportSelection::from_rows(rows), out.path(), None)
            .unwrap();
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.skipped_records[0].reason, SkipReason::SymlinksDisabled);
    }

    #[test]
    fn symlink_without_target_follows_missing_policy() {
        let out = TempDir::new().unwrap();
        let rows = || vec![RawRow::new("s1", "HomeDomain", "link", FLAG_SYMLINK, None)];
        let strict = Exporter::new(
            ContentResolver::new(out.path()),
            ExportOptions {
                restore_symlinks: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            strict.export(ExportSelection::from_rows(rows()), out.path(), None),
            Err(BackupError::SymlinkTargetMissing { .. })
        ));

        let lenient = Exporter::new(
            ContentResolver::new(out.path()),
            ExportOptions {
                restore_symlinks: true,
                ignore_missing: true,
                ..Default::default()
            },
        );
        let report = lenient
            .export(ExportSelection::from_rows(rows()), out.path(), None)
            .unwrap();
        assert_eq!(report.skipped_records[0].reason, SkipReason::SymlinkTargetMissing);
    }

    #[test]
    fn cancelled_before_start_reports_everything_pending() {
        let out = TempDir::new().unwrap();
        let rows = vec![
            RawRow::new("d1", "HomeDomain", "a", FLAG_DIRECTORY, None),
            RawRow::new("d2", "HomeDomain", "b", FLAG_DIRECTORY, None),
        ];
        let cancel = CancelToken::new();
        cancel.cancel();
        for workers in [1, 4] {
            let exporter = Exporter::new(
                ContentResolver::new(out.path()),
                ExportOptions {
                    total_count: Some(2),
                    workers,
                    cancel: Some(cancel.clone()),
                    ..Default::default()
                },
            );
            let report = exporter
                .export(ExportSelection::from_rows(rows.clone()), out.path(), None)
                .unwrap();
            assert!(report.cancelled);
            assert_eq!(report.processed(), 0);
            assert_eq!(report.pending, Some(2));
        }
    }

    #[test]
    fn record_warnings_reach_the_report() {
        let out = TempDir::new().unwrap();
        let rows = vec![RawRow::new(
            "d1",
            "HomeDomain",
            "a",
            FLAG_DIRECTORY,
            Some(b"not a plist".to_vec()),
        )];
        let exporter = Exporter::new(ContentResolver::new(out.path()), ExportOptions::default());
        let report = exporter
            .export(ExportSelection::from_rows(rows), out.path(), None)
            .unwrap();
        assert_eq!(report.exported_count, 1);
        assert!(!report.is_clean());
        assert!(matches!(
            &report.warnings[0],
            ExportWarning::Record {
                warning: RecordWarning::MetadataDecode(_),
                ..
            }
        ));
    }
}
