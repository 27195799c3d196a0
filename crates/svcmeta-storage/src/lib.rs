//! Report workbook persistence + week-stamped report archive.

use std::path::{Path, PathBuf};

use anyhow::Context;
use calamine::{Data, Reader};
use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use sha2::{Digest, Sha256};
use svcmeta_core::{
    normalize_cell, Sheet, Snapshot, SnapshotRow, Workbook, COL_DATA_NUMBER, COL_LAST_EDITED,
    COL_SERVICE_ID, COL_TITLE, COL_URL,
};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "svcmeta-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sheet `{sheet}` not found in {path}")]
    SheetNotFound { sheet: String, path: String },
    #[error("sheet `{sheet}` has no `{column}` column")]
    MissingColumn { sheet: String, column: String },
    #[error("unsupported workbook format: {0}")]
    UnsupportedFormat(String),
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `{YYYYMMDD}_{HHMM}_Week_{iso week}` used to name archived reports.
pub fn week_stamp(at: DateTime<Local>) -> String {
    use chrono::Datelike;
    format!(
        "{}_{}_Week_{}",
        at.format("%Y%m%d"),
        at.format("%H%M"),
        at.iso_week().week()
    )
}

/// Week stamp of a file's last modification time.
pub async fn file_week_stamp(path: &Path) -> anyhow::Result<String> {
    let meta = fs::metadata(path)
        .await
        .with_context(|| format!("reading metadata of {}", path.display()))?;
    let modified = meta
        .modified()
        .with_context(|| format!("reading modification time of {}", path.display()))?;
    Ok(week_stamp(DateTime::<Local>::from(modified)))
}

/// Write bytes through a temp file in the same directory, then rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!("renaming {} -> {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ArchivedReport {
    pub path: PathBuf,
    pub stamp: String,
    pub content_hash: String,
    pub deduplicated: bool,
}

/// Keeps week-stamped copies of earlier reports.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    root: PathBuf,
}

impl ReportArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn archived_path(&self, stamp: &str, report: &Path) -> PathBuf {
        let name = report
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "report.json".to_string());
        self.root.join(format!("{stamp}_{name}"))
    }

    /// Copy `report` into the archive under its modification-time stamp.
    ///
    /// Returns `None` when there is no report yet. An archive entry with the
    /// same content is left untouched.
    pub async fn archive_report(&self, report: &Path) -> anyhow::Result<Option<ArchivedReport>> {
        if !fs::try_exists(report)
            .await
            .with_context(|| format!("checking {}", report.display()))?
        {
            debug!(report = %report.display(), "no previous report to archive");
            return Ok(None);
        }

        let stamp = file_week_stamp(report).await?;
        let bytes = fs::read(report)
            .await
            .with_context(|| format!("reading {}", report.display()))?;
        let content_hash = sha256_hex(&bytes);
        let path = self.archived_path(&stamp, report);

        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            let existing = fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            if sha256_hex(&existing) == content_hash {
                return Ok(Some(ArchivedReport {
                    path,
                    stamp,
                    content_hash,
                    deduplicated: true,
                }));
            }
            warn!(path = %path.display(), "archive entry differs from report, overwriting");
        }

        write_atomic(&path, &bytes).await?;
        info!(
            from = %report.display(),
            to = %path.display(),
            bytes = bytes.len(),
            "archived previous report"
        );
        Ok(Some(ArchivedReport {
            path,
            stamp,
            content_hash,
            deduplicated: false,
        }))
    }
}

pub async fn write_workbook(path: &Path, workbook: &Workbook) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(workbook).context("serializing workbook")?;
    write_atomic(path, &bytes).await?;
    debug!(path = %path.display(), sheets = workbook.sheets.len(), "wrote workbook");
    Ok(())
}

pub async fn read_workbook(path: &Path) -> anyhow::Result<Workbook> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xlsm" | "xls" | "ods"))
        .unwrap_or(false)
}

/// Read one sheet from either a workbook written by [`write_workbook`] or a
/// spreadsheet file.
pub async fn read_sheet(path: &Path, sheet_name: &str) -> anyhow::Result<Sheet> {
    if is_spreadsheet(path) {
        return read_spreadsheet_sheet(path, sheet_name);
    }
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Err(StorageError::UnsupportedFormat(path.display().to_string()).into());
    }
    let workbook = read_workbook(path).await?;
    workbook
        .sheets
        .into_iter()
        .find(|s| s.name == sheet_name)
        .ok_or_else(|| {
            StorageError::SheetNotFound {
                sheet: sheet_name.to_string(),
                path: path.display().to_string(),
            }
            .into()
        })
}

/// Load the comparison projection of one sheet.
pub async fn load_snapshot(path: &Path, sheet_name: &str) -> anyhow::Result<Snapshot> {
    let sheet = read_sheet(path, sheet_name).await?;
    Ok(project_snapshot(&sheet)?)
}

/// Store a snapshot as a sheet, keeping any other sheets already in the file.
pub async fn persist_snapshot(
    snapshot: &Snapshot,
    path: &Path,
    sheet_name: &str,
) -> anyhow::Result<()> {
    let mut workbook = if fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        read_workbook(path).await?
    } else {
        Workbook::default()
    };
    workbook.push_sheet(Sheet::from_snapshot_rows(sheet_name, &snapshot.rows));
    write_workbook(path, &workbook).await
}

/// Reduce a sheet to the five comparison columns, located by header.
///
/// Cells are taken as stored, so an empty string stays distinct from a
/// missing value. Rows without a service id are dropped.
pub fn project_snapshot(sheet: &Sheet) -> Result<Snapshot, StorageError> {
    let index = |column: &str| {
        sheet
            .column_index(column)
            .ok_or_else(|| StorageError::MissingColumn {
                sheet: sheet.name.clone(),
                column: column.to_string(),
            })
    };
    let id_idx = index(COL_SERVICE_ID)?;
    let title_idx = index(COL_TITLE)?;
    let edited_idx = index(COL_LAST_EDITED)?;
    let number_idx = index(COL_DATA_NUMBER)?;
    let url_idx = index(COL_URL)?;

    let cell = |row: &[Option<String>], idx: usize| row.get(idx).cloned().flatten();

    let mut rows = Vec::with_capacity(sheet.rows.len());
    for row in &sheet.rows {
        let Some(service_id) = cell(row, id_idx).filter(|id| !id.is_empty()) else {
            debug!(sheet = %sheet.name, "skipping row without service id");
            continue;
        };
        rows.push(SnapshotRow {
            service_id,
            title: cell(row, title_idx),
            last_edited: cell(row, edited_idx),
            data_number: cell(row, number_idx),
            url: cell(row, url_idx),
        });
    }

    Ok(Snapshot {
        name: sheet.name.clone(),
        rows,
    })
}

fn read_spreadsheet_sheet(path: &Path, sheet_name: &str) -> anyhow::Result<Sheet> {
    let mut workbook = calamine::open_workbook_auto(path)
        .with_context(|| format!("opening spreadsheet {}", path.display()))?;
    if !workbook.sheet_names().iter().any(|s| s == sheet_name) {
        return Err(StorageError::SheetNotFound {
            sheet: sheet_name.to_string(),
            path: path.display().to_string(),
        }
        .into());
    }
    let range = workbook
        .worksheet_range(sheet_name)
        .with_context(|| format!("reading sheet {sheet_name} of {}", path.display()))?;

    let mut rows = range.rows();
    let columns = rows
        .next()
        .map(|header| {
            header
                .iter()
                .map(|c| cell_text(c).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let rows = rows
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .collect();

    Ok(Sheet {
        name: sheet_name.to_string(),
        columns,
        rows,
    })
}

fn excel_serial_to_date(serial: f64) -> Option<String> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    if !serial.is_finite() {
        return None;
    }
    let date = epoch.checked_add_signed(TimeDelta::try_days(serial.floor() as i64)?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Float(f) => float_text(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())?,
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        other => {
            warn!(cell = ?other, "unreadable spreadsheet cell");
            return None;
        }
    };
    normalize_cell(Some(text))
}
