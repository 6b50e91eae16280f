use std::io::{self, Write};

use ibak_core::info::AppInfo;
use ibak_core::{CatalogRecord, EntryKind};
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

const SIZE_SUFFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// Human-readable size in powers of 1024: `512B`, `1.5K`, `2.0M`.
pub fn natural_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut idx = 0;
    while value >= 1024.0 && idx + 1 < SIZE_SUFFIXES.len() {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.1}{}", SIZE_SUFFIXES[idx])
}

/// `ls -l` style timestamp (UTC): time of day for the last half year, the
/// year otherwise.
pub fn ls_style_time(unix_secs: i64, now: OffsetDateTime) -> String {
    let Ok(t) = OffsetDateTime::from_unix_timestamp(unix_secs) else {
        return String::new();
    };
    let recent = (now - t).abs() < Duration::days(183);
    let formatted = if recent {
        t.format(format_description!("[month repr:short] [day] [hour]:[minute]"))
    } else {
        t.format(format_description!("[month repr:short] [day]  [year]"))
    };
    formatted.unwrap_or_default()
}

pub struct Column {
    pub title: &'static str,
    pub width: usize,
    pub right: bool,
}

const fn left(title: &'static str, width: usize) -> Column {
    Column {
        title,
        width,
        right: false,
    }
}

const fn right(title: &'static str, width: usize) -> Column {
    Column {
        title,
        width,
        right: true,
    }
}

/// One fixed-width line. Cells are clipped to leave a one-space gutter; the
/// last column, when left-aligned, may run long.
pub fn render_row(columns: &[Column], cells: &[&str]) -> String {
    let mut line = String::new();
    let last = columns.len().saturating_sub(1);
    for (i, (col, cell)) in columns.iter().zip(cells).enumerate() {
        let room = col.width.saturating_sub(1);
        let len = cell.chars().count();
        if col.right {
            // Keep the tail: sizes and times read from the right.
            let clipped: String = cell.chars().skip(len.saturating_sub(room)).collect();
            line.push_str(&format!("{clipped:>room$} "));
        } else if i == last {
            line.push_str(cell);
        } else {
            let clipped: String = cell.chars().take(room).collect();
            line.push_str(&format!("{clipped:<width$}", width = col.width));
        }
    }
    line.trim_end().to_owned()
}

fn write_header(out: &mut impl Write, columns: &[Column]) -> io::Result<()> {
    let titles: Vec<&str> = columns.iter().map(|c| c.title).collect();
    writeln!(out, "{}", render_row(columns, &titles))
}

const FILE_COLUMNS: [Column; 6] = [
    left("T", 3),
    left("MODIFIED", 14),
    right("SIZE", 8),
    left("DOMAIN", 18),
    left("NAMESPACE", 32),
    left("PATH", 5),
];

pub fn write_files<'a>(
    out: &mut impl Write,
    records: impl IntoIterator<Item = &'a CatalogRecord>,
    now: OffsetDateTime,
) -> io::Result<()> {
    write_header(out, &FILE_COLUMNS)?;
    for r in records {
        let kind = r.kind.code().to_string();
        let modified = r
            .last_modified()
            .map(|t| ls_style_time(t, now))
            .unwrap_or_default();
        let size = match (r.kind, r.size()) {
            (EntryKind::Regular, Some(s)) => natural_size(s),
            _ => String::new(),
        };
        writeln!(
            out,
            "{}",
            render_row(
                &FILE_COLUMNS,
                &[
                    kind.as_str(),
                    modified.as_str(),
                    size.as_str(),
                    r.domain.as_str(),
                    r.namespace.as_str(),
                    r.relative_path.as_str(),
                ]
            )
        )?;
    }
    Ok(())
}

const APP_COLUMNS: [Column; 5] = [
    left("NAME", 32),
    left("TITLE", 24),
    left("VERSION", 10),
    left("TYPE", 16),
    left("BUNDLE ID", 10),
];

/// Apps sorted by name.
pub fn write_apps(out: &mut impl Write, apps: &[AppInfo]) -> io::Result<()> {
    let mut sorted: Vec<&AppInfo> = apps.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.bundle_id.cmp(&b.bundle_id)));
    write_header(out, &APP_COLUMNS)?;
    for a in sorted {
        writeln!(
            out,
            "{}",
            render_row(
                &APP_COLUMNS,
                &[
                    a.name.as_str(),
                    a.title.as_str(),
                    a.version.as_str(),
                    a.genre.as_str(),
                    a.bundle_id.as_str(),
                ]
            )
        )?;
    }
    Ok(())
}

const SUMMARY_COLUMNS: [Column; 2] = [left("PROPERTY", 25), left("VALUE", 10)];

pub fn write_summary(out: &mut impl Write, summary: &[(String, String)]) -> io::Result<()> {
    for (k, v) in summary {
        writeln!(out, "{}", render_row(&SUMMARY_COLUMNS, &[k.as_str(), v.as_str()]))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibak_core::RawRow;
    use ibak_core::fixture::metadata_blob;
    use ibak_core::metadata::RecordMetadata;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    #[test]
    fn sizes() {
        assert_eq!(natural_size(0), "0B");
        assert_eq!(natural_size(1023), "1023B");
        assert_eq!(natural_size(1536), "1.5K");
        assert_eq!(natural_size(2 * 1024 * 1024), "2.0M");
        assert_eq!(natural_size(5 * 1024 * 1024 * 1024), "5.0G");
    }

    #[test]
    fn recent_times_show_clock_old_ones_year() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let recent = datetime!(2024-05-20 08:05 UTC).unix_timestamp();
        let old = datetime!(2021-03-04 08:05 UTC).unix_timestamp();
        assert_eq!(ls_style_time(recent, now), "May 20 08:05");
        assert_eq!(ls_style_time(old, now), "Mar 04  2021");
    }

    #[test]
    fn rows_clip_all_but_the_last_column() {
        let cols = [left("A", 4), right("B", 5), left("C", 2)];
        assert_eq!(render_row(&cols, &["abcdef", "123456", "long tail"]), "abc 3456 long tail");
    }

    #[test]
    fn file_listing() {
        let meta = RecordMetadata {
            last_modified: Some(datetime!(2024-05-20 08:05 UTC).unix_timestamp()),
            size: Some(2048),
            ..Default::default()
        };
        let record = CatalogRecord::decode(RawRow::new(
            "ab12",
            "AppDomain-com.example",
            "Documents/a.txt",
            1,
            Some(metadata_blob(&meta)),
        ))
        .unwrap();

        let mut buf = Vec::new();
        write_files(&mut buf, [&record], datetime!(2024-06-01 12:00 UTC)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("T  MODIFIED"));
        assert!(lines[1].starts_with("F  May 20 08:05     2.0K AppDomain "));
        assert!(lines[1].ends_with(&format!("{:<32}Documents/a.txt", "com.example")));
    }
}
