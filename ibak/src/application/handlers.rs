use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use ibak_core::error::{BackupError, Result};
use ibak_core::{
    Backup, CatalogQuery, CatalogRecord, ExportOptions, ExportReport, ExportWarning, Progress,
    RecordFilter,
};
use time::OffsetDateTime;
use tracing::info;

use crate::presentation::cli::FilterArgs;
use crate::presentation::progress::BarProgress;
use crate::presentation::table::{write_apps, write_files, write_summary};

/// Listings longer than this ask before printing on a terminal.
const LARGE_LISTING: u64 = 1000;

fn query_from(filter: FilterArgs) -> Result<CatalogQuery> {
    if filter.like_syntax {
        if filter.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
            return Err(BackupError::InvalidQuery(
                "--like-syntax cannot be used with --namespace; \
                 put the namespace pattern in --domain instead"
                    .into(),
            ));
        }
        return Ok(CatalogQuery::Like {
            domain: filter.domain,
            path: filter.path,
        });
    }
    Ok(CatalogQuery::Prefix(RecordFilter {
        domain: filter.domain,
        namespace: filter.namespace,
        path: filter.path,
    }))
}

#[allow(clippy::too_many_arguments)]
pub fn handle_export(
    backup: PathBuf,
    output: PathBuf,
    filter: FilterArgs,
    ignore_missing: bool,
    restore_dates: bool,
    restore_symlinks: bool,
    workers: usize,
    no_progress: bool,
    json: bool,
) -> Result<()> {
    let query = query_from(filter)?;
    let backup = Backup::open(backup)?;
    let total = backup.count(&query)?;

    let options = ExportOptions {
        restore_dates,
        restore_symlinks,
        ignore_missing,
        total_count: Some(total),
        workers,
        cancel: None,
    };
    let bar = (!no_progress).then(|| BarProgress::new("Exporting files"));
    let report = backup.export(
        backup.select(&query)?,
        &output,
        &options,
        bar.as_ref().map(|b| b as &dyn Progress),
    )?;

    let mut out = io::stdout().lock();
    if json {
        let text = serde_json::to_string_pretty(&report).map_err(io::Error::from)?;
        writeln!(out, "{text}")?;
    } else {
        write_report(&mut out, &report)?;
    }
    info!("{total} entries processed");
    Ok(())
}

fn write_report(out: &mut impl Write, report: &ExportReport) -> io::Result<()> {
    writeln!(
        out,
        "{} exported, {} skipped",
        report.exported_count, report.skipped_count
    )?;
    for s in &report.skipped_records {
        let logical = [s.domain.as_str(), s.namespace.as_str(), s.relative_path.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        writeln!(out, "  skipped {logical} ({:?}, {})", s.reason, s.identity)?;
    }
    for w in &report.warnings {
        match w {
            ExportWarning::Record { identity, warning } => {
                writeln!(out, "  warning {identity}: {warning:?}")?
            }
            ExportWarning::Timestamp { path, reason } => {
                writeln!(out, "  warning {}: {reason}", path.display())?
            }
        }
    }
    Ok(())
}

pub fn handle_inspect_info(backup: PathBuf) -> Result<()> {
    let summary = Backup::without_catalog(backup).summary()?;
    write_summary(&mut io::stdout().lock(), &summary)?;
    Ok(())
}

pub fn handle_inspect_apps(backup: PathBuf) -> Result<()> {
    let apps = Backup::without_catalog(backup).apps()?;
    write_apps(&mut io::stdout().lock(), &apps)?;
    Ok(())
}

pub fn handle_inspect_domains(backup: PathBuf) -> Result<()> {
    let domains = Backup::open(backup)?.domains()?;
    let mut out = io::stdout().lock();
    for d in domains {
        writeln!(out, "{d}")?;
    }
    Ok(())
}

pub fn handle_inspect_namespaces(domain: String, backup: PathBuf) -> Result<()> {
    let namespaces = Backup::open(backup)?.namespaces(&domain)?;
    let mut out = io::stdout().lock();
    for ns in namespaces {
        writeln!(out, "{ns}")?;
    }
    Ok(())
}

pub fn handle_inspect_files(backup: PathBuf, filter: FilterArgs, yes: bool) -> Result<()> {
    let query = query_from(filter)?;
    let backup = Backup::open(backup)?;
    let count = backup.count(&query)?;

    if count > LARGE_LISTING && !yes && io::stdin().is_terminal() && !confirm_listing(count)? {
        return Ok(());
    }

    let mut records = backup.select(&query)?.collect::<Result<Vec<CatalogRecord>>>()?;
    records.sort_by(|a, b| {
        (&a.domain, &a.namespace, &a.relative_path).cmp(&(&b.domain, &b.namespace, &b.relative_path))
    });
    write_files(&mut io::stdout().lock(), &records, OffsetDateTime::now_utc())?;
    info!("{count} entries found");
    Ok(())
}

fn confirm_listing(count: u64) -> Result<bool> {
    let mut out = io::stdout().lock();
    writeln!(out, "Warning: this query will return {count} records.")?;
    write!(out, "Are you sure you want to print them [Y/n]? ")?;
    out.flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "" | "y" | "yes"
    ))
}

pub fn handle_get(
    backup: PathBuf,
    out: PathBuf,
    id: Option<String>,
    domain: Option<String>,
    path: Option<String>,
) -> Result<()> {
    let backup = Backup::without_catalog(backup);
    let src = match (id, domain, path) {
        (Some(id), _, _) => backup.file_by_id(&id)?,
        (None, Some(domain), Some(path)) => backup.file_by_path(&domain, &path)?,
        _ => {
            return Err(BackupError::InvalidQuery(
                "either --id or both --domain and --path are required".into(),
            ));
        }
    };

    let dest = match src.file_name() {
        Some(name) if out.is_dir() => out.join(name),
        _ => out,
    };
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&src, &dest)?;
    info!(from = %src.display(), to = %dest.display(), "copied");
    Ok(())
}
