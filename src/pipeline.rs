//! Single-file background check and batch processing.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::background::{global_background, global_stats, local_stats};
use crate::config::CheckConfig;
use crate::discrepancy::Comparison;
use crate::error::{Error, Result};
use crate::fits_image::load_image;
use crate::models::{Annulus, DiscrepancyReport, SkyPosition};
use crate::units::coords::parse_position;
use crate::{render, report};

/// Output produced after the report itself was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Table,
    Image,
    Display,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffect::Table => write!(f, "table"),
            SideEffect::Image => write!(f, "image"),
            SideEffect::Display => write!(f, "display"),
        }
    }
}

/// A best-effort output that failed without invalidating the report.
#[derive(Debug)]
pub struct SideEffectFailure {
    pub effect: SideEffect,
    pub error: Error,
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub report: DiscrepancyReport,
    pub table_path: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
    pub failures: Vec<SideEffectFailure>,
}

impl CheckOutcome {
    fn record(&mut self, effect: SideEffect, path: &Path, error: Error) {
        tracing::warn!("Failed to produce {} for {}: {}", effect, path.display(), error);
        self.failures.push(SideEffectFailure { effect, error });
    }
}

/// Compare the annulus background around `position` with the global
/// background of the image at `path`, then write the table and the
/// annotated rendering to `config.dest_dir`.
///
/// The configuration is validated before the image is opened. Table and
/// rendering are independent: a failure of either is recorded in the
/// outcome while the other still runs.
pub fn check_background(
    path: &Path,
    position: SkyPosition,
    config: &CheckConfig,
) -> Result<CheckOutcome> {
    config.validate()?;
    let annulus = Annulus::new(position, config.r_in, config.r_out)?;

    let start = Instant::now();
    let image = load_image(path, config.hdu)?;
    image.require_wcs()?;

    let model = global_background(&image, &config.mesh)?;
    let clipped = global_stats(&image, &config.clip)?;
    let local = local_stats(&image, &annulus, config.percentile)?;

    let file = image.file_name();
    let report = DiscrepancyReport::assemble(Comparison {
        file: &file,
        position,
        r_in: config.r_in,
        r_out: config.r_out,
        method: config.method,
        model: &model,
        clipped: &clipped,
        local: &local,
    })?;

    tracing::info!(
        "{}: model difference {:.2} sigma, clipped ({}) difference {:.2} sigma",
        file,
        report.model_diff,
        report.method,
        report.clipped_diff
    );
    if report.needs_template(config.template_threshold) {
        tracing::info!(
            "{}: annulus background deviates by more than {} sigma, \
             template subtraction recommended",
            file,
            config.template_threshold
        );
    }

    let mut outcome = CheckOutcome {
        report,
        table_path: None,
        image_path: None,
        failures: Vec::new(),
    };

    let table = report::table_path(path, &config.dest_dir);
    match report::write_report(&outcome.report, &table) {
        Ok(()) => outcome.table_path = Some(table),
        Err(e) => outcome.record(SideEffect::Table, &table, e),
    }

    let jpg = report::image_path(path, &config.dest_dir);
    let rendered = render::render_annulus(&image, &annulus, &outcome.report, &config.render)
        .and_then(|canvas| render::save(&canvas, &jpg));
    match rendered {
        Ok(()) => outcome.image_path = Some(jpg),
        Err(e) => outcome.record(SideEffect::Image, &jpg, e),
    }

    if config.show_plot {
        if let Some(jpg) = outcome.image_path.clone() {
            if let Err(e) = render::display(&jpg, config.viewer.as_deref()) {
                outcome.record(SideEffect::Display, &jpg, e);
            }
        }
    }

    tracing::debug!(
        "Checked {} in {}",
        file,
        humantime::format_duration(truncate_to_millis(start.elapsed()))
    );
    Ok(outcome)
}

/// One file to check together with its target.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub path: PathBuf,
    pub position: SkyPosition,
}

impl BatchItem {
    pub fn new(path: impl Into<PathBuf>, position: SkyPosition) -> Self {
        Self {
            path: path.into(),
            position,
        }
    }
}

#[derive(Debug)]
pub struct ItemResult {
    pub path: PathBuf,
    pub outcome: Result<CheckOutcome>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<ItemResult>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &Error)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.path.as_path(), e)))
    }

    pub fn reports(&self) -> impl Iterator<Item = &DiscrepancyReport> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok().map(|o| &o.report))
    }

    /// Append every successful report to one combined table.
    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let reports: Vec<DiscrepancyReport> = self.reports().cloned().collect();
        report::append_reports(&reports, path)
    }
}

/// Check every item independently; a failing item never stops the batch.
pub fn run_batch(items: &[BatchItem], config: &CheckConfig) -> BatchReport {
    let start = Instant::now();
    let mut results = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        tracing::info!("[{}/{}] {}", i + 1, items.len(), item.path.display());
        let outcome = check_background(&item.path, item.position, config);
        if let Err(e) = &outcome {
            tracing::error!("{} failed ({}): {}", item.path.display(), e.kind(), e);
        }
        results.push(ItemResult {
            path: item.path.clone(),
            outcome,
        });
    }

    let batch = BatchReport {
        results,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        "Batch finished in {}: {} succeeded, {} failed",
        humantime::format_duration(truncate_to_millis(batch.elapsed)),
        batch.succeeded(),
        batch.failed()
    );
    batch
}

/// Same target for every file.
pub fn items_at(paths: Vec<PathBuf>, position: SkyPosition) -> Vec<BatchItem> {
    paths
        .into_iter()
        .map(|path| BatchItem::new(path, position))
        .collect()
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    file: String,
    ra: String,
    dec: String,
}

/// Read a `file,ra,dec` table. Coordinates may be decimal degrees or
/// sexagesimal; relative file names are resolved against the table's
/// directory.
pub fn read_positions(path: &Path) -> Result<Vec<BatchItem>> {
    let file = File::open(path).map_err(|e| Error::load(path, e.to_string()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);

    let mut items = Vec::new();
    for (line, row) in reader.deserialize::<PositionRow>().enumerate() {
        let row = row?;
        let position = parse_position(&row.ra, &row.dec).map_err(|e| {
            Error::Parse(format!("{} row {}: {}", path.display(), line + 1, e))
        })?;
        let file = Path::new(&row.file);
        let file = if file.is_absolute() {
            file.to_path_buf()
        } else {
            base.join(file)
        };
        items.push(BatchItem::new(file, position));
    }
    Ok(items)
}

fn truncate_to_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
