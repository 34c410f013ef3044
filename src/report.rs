//! Tabular output of background checks.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::DiscrepancyReport;

const FITS_SUFFIXES: &[&str] = &[".fits.fz", ".fits.gz", ".fits", ".fit", ".fts"];

/// File name of `input` with directories and FITS suffix removed.
pub fn output_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    FITS_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| name[..name.len() - suffix.len()].to_string())
        .unwrap_or(name)
}

/// Table written for `input` inside `dest_dir`: `bkg_<stem>.csv`.
pub fn table_path(input: &Path, dest_dir: &Path) -> PathBuf {
    dest_dir.join(format!("bkg_{}.csv", output_stem(input)))
}

/// Rendered image written for `input` inside `dest_dir`: `bkg_<stem>.jpg`.
pub fn image_path(input: &Path, dest_dir: &Path) -> PathBuf {
    dest_dir.join(format!("bkg_{}.jpg", output_stem(input)))
}

/// Write the report as a one-row table, replacing any previous table.
pub fn write_report(report: &DiscrepancyReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.serialize(report)?;
    writer.flush()?;
    tracing::debug!("Wrote background table {}", path.display());
    Ok(())
}

/// Append rows to a table, writing the header only when the file is new.
pub fn append_reports(reports: &[DiscrepancyReport], path: &Path) -> Result<()> {
    let exists = path.exists() && fs::metadata(path)?.len() > 0;
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!exists)
        .from_writer(file);
    for report in reports {
        writer.serialize(report)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every row of a background table.
pub fn read_reports(path: &Path) -> Result<Vec<DiscrepancyReport>> {
    let file = File::open(path).map_err(|e| Error::load(path, e.to_string()))?;
    let mut reader = csv::Reader::from_reader(file);
    reader
        .deserialize()
        .map(|row| row.map_err(Error::from))
        .collect()
}
