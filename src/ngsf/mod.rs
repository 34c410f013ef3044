//! Working files for a Next Generation SuperFit (NGSF) spectral fit.
//!
//! NGSF reads its settings from `parameters.json`, the peak epochs of its
//! template supernovae from `NGSF/mjd_of_maximum_brightness.csv` and the
//! template bank from a `bank` directory next to them. [`write_workspace`]
//! lays these out, [`run`] starts the fit and [`clean`] removes them again.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PARAMETERS_FILE: &str = "parameters.json";
pub const RUN_FILE: &str = "run.py";
pub const NGSF_DIR: &str = "NGSF";
pub const PEAKS_FILE: &str = "mjd_of_maximum_brightness.csv";
pub const BANK_LINK: &str = "bank";

const RUN_SCRIPT: &str =
    "from NGSF.sf_class import Superfit\n\nsupernova = Superfit()\nsupernova.superfit()";

const PEAK_EPOCHS: &str = include_str!("mjd_of_maximum_brightness.csv");

/// Supernova template classes fitted against.
pub const SN_TEMPLATES: &[&str] = &[
    "IIb-flash",
    "computed",
    "Ia 02es-like",
    "Ia-02cx like",
    "TDE He",
    "Ca-Ia",
    "Ia-CSM-(ambigious)",
    "II",
    "super_chandra",
    "SLSN-II",
    "IIn",
    "FBOT",
    "Ibn",
    "SLSN-IIn",
    "Ia 91T-like",
    "IIb",
    "TDE H",
    "SN - Imposter",
    "II-flash",
    "ILRT",
    "Ia 99aa-like",
    "Ic",
    "SLSN-I",
    "Ia-pec",
    "Ib",
    "Ia-CSM",
    "Ia-norm",
    "SLSN-Ib",
    "TDE H+He",
    "Ia 91bg-like",
    "Ca-Ib",
    "Ia-rapid",
    "Ic-BL",
    "Ic-pec",
    "SLSN-IIb",
];

/// Host galaxy template classes.
pub const GALAXY_TEMPLATES: &[&str] = &[
    "E", "S0", "Sa", "Sb", "SB1", "SB2", "SB3", "SB4", "SB5", "SB6", "Sc",
];

/// Fit settings, serialized under the key names NGSF expects. Flags are
/// `0`/`1` integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NgsfParameters {
    pub object_to_fit: String,
    pub use_exact_z: u8,
    pub z_exact: f64,
    pub z_range_begin: f64,
    pub z_range_end: f64,
    pub z_int: f64,
    /// Fit resolution in Angstrom
    pub resolution: f64,
    pub lower_lam: f64,
    pub upper_lam: f64,
    pub error_spectrum: String,
    pub saving_results_path: String,
    pub minimum_overlap: f64,
    pub show_plot: u8,
    pub how_many_plots: u32,
    pub mask_galaxy_lines: u8,
    pub mask_telluric: u8,
    pub epoch_high: i32,
    pub epoch_low: i32,
    #[serde(rename = "Alam_high")]
    pub alam_high: f64,
    #[serde(rename = "Alam_low")]
    pub alam_low: f64,
    #[serde(rename = "Alam_interval")]
    pub alam_interval: f64,
    pub bank_dir: String,
}

impl Default for NgsfParameters {
    fn default() -> Self {
        Self {
            object_to_fit: String::new(),
            use_exact_z: 1,
            z_exact: 0.127,
            z_range_begin: 0.0,
            z_range_end: 0.1,
            z_int: 0.01,
            resolution: 10.0,
            lower_lam: 0.0,
            upper_lam: 9500.0,
            error_spectrum: "sg".to_string(),
            saving_results_path: String::new(),
            minimum_overlap: 0.7,
            show_plot: 1,
            how_many_plots: 5,
            mask_galaxy_lines: 1,
            mask_telluric: 1,
            epoch_high: 0,
            epoch_low: 0,
            alam_high: 2.0,
            alam_low: -2.0,
            alam_interval: 0.2,
            bank_dir: BANK_LINK.to_string(),
        }
    }
}

impl NgsfParameters {
    pub fn validate(&self) -> Result<()> {
        if self.object_to_fit.trim().is_empty() {
            return Err(Error::invalid("No spectrum given to fit"));
        }
        let flags = [
            ("use_exact_z", self.use_exact_z),
            ("show_plot", self.show_plot),
            ("mask_galaxy_lines", self.mask_galaxy_lines),
            ("mask_telluric", self.mask_telluric),
        ];
        if let Some((name, value)) = flags.iter().find(|(_, v)| *v > 1) {
            return Err(Error::invalid(format!("{} must be 0 or 1, got: {}", name, value)));
        }
        if self.use_exact_z == 1 && !(self.z_exact >= 0.0) {
            return Err(Error::invalid(format!(
                "Redshift must be non-negative, got: {}",
                self.z_exact
            )));
        }
        if self.use_exact_z == 0 {
            if !(self.z_range_begin >= 0.0) || !(self.z_range_end >= self.z_range_begin) {
                return Err(Error::invalid(format!(
                    "Redshift range must satisfy 0 <= begin <= end, got {} to {}",
                    self.z_range_begin, self.z_range_end
                )));
            }
            if !(self.z_int > 0.0) {
                return Err(Error::invalid(format!(
                    "Redshift step must be positive, got: {}",
                    self.z_int
                )));
            }
        }
        if !(self.resolution > 0.0) {
            return Err(Error::invalid(format!(
                "Resolution must be positive, got: {}",
                self.resolution
            )));
        }
        if !(self.upper_lam >= self.lower_lam) {
            return Err(Error::invalid(format!(
                "Upper wavelength bound {} is below the lower bound {}",
                self.upper_lam, self.lower_lam
            )));
        }
        if !(self.minimum_overlap > 0.0 && self.minimum_overlap <= 1.0) {
            return Err(Error::invalid(format!(
                "Minimum overlap must be within (0, 1], got: {}",
                self.minimum_overlap
            )));
        }
        if self.epoch_high < self.epoch_low {
            return Err(Error::invalid(format!(
                "Upper epoch {} is below the lower epoch {}",
                self.epoch_high, self.epoch_low
            )));
        }
        if !(self.alam_high >= self.alam_low) || !(self.alam_interval > 0.0) {
            return Err(Error::invalid(format!(
                "Extinction grid {} to {} in steps of {} is empty",
                self.alam_low, self.alam_high, self.alam_interval
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ParameterFile<'a> {
    #[serde(flatten)]
    parameters: &'a NgsfParameters,
    temp_sn_tr: &'a [&'a str],
    temp_gal_tr: &'a [&'a str],
}

/// Epoch of maximum light of one template supernova; `-1` when unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakEpoch {
    #[serde(rename = "Name")]
    pub name: String,
    pub mjd_peak: f64,
    pub band_peak: String,
    pub isupperlimit: u8,
}

/// Peak epochs of the template supernovae shipped with the bank.
pub fn peak_epochs() -> Result<Vec<PeakEpoch>> {
    csv::Reader::from_reader(PEAK_EPOCHS.as_bytes())
        .deserialize()
        .map(|row| row.map_err(Error::from))
        .collect()
}

/// Files laid out for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub dir: PathBuf,
    pub parameters: PathBuf,
    pub run_script: PathBuf,
    pub peaks: PathBuf,
    /// Link to the template bank, when one had to be created
    pub bank_link: Option<PathBuf>,
}

/// Write `parameters.json`, `run.py` and the peak epoch table into `dir` and
/// link the template bank as `dir/bank` when it lives elsewhere.
pub fn write_workspace(parameters: &NgsfParameters, dir: &Path) -> Result<Workspace> {
    parameters.validate()?;
    fs::create_dir_all(dir)?;

    let parameters_path = dir.join(PARAMETERS_FILE);
    let mut writer = BufWriter::new(File::create(&parameters_path)?);
    serde_json::to_writer(
        &mut writer,
        &ParameterFile {
            parameters,
            temp_sn_tr: SN_TEMPLATES,
            temp_gal_tr: GALAXY_TEMPLATES,
        },
    )?;
    writer.flush()?;

    let run_script = dir.join(RUN_FILE);
    fs::write(&run_script, RUN_SCRIPT)?;

    let peaks = dir.join(NGSF_DIR).join(PEAKS_FILE);
    fs::create_dir_all(dir.join(NGSF_DIR))?;
    let mut table = csv::Writer::from_path(&peaks)?;
    for epoch in peak_epochs()? {
        table.serialize(epoch)?;
    }
    table.flush()?;

    let bank_link = link_bank(Path::new(&parameters.bank_dir), dir)?;
    tracing::debug!("NGSF workspace ready in {}", dir.display());

    Ok(Workspace {
        dir: dir.to_path_buf(),
        parameters: parameters_path,
        run_script,
        peaks,
        bank_link,
    })
}

fn link_bank(bank: &Path, dir: &Path) -> Result<Option<PathBuf>> {
    let link = dir.join(BANK_LINK);
    let target = fs::canonicalize(bank).unwrap_or_else(|_| bank.to_path_buf());
    if fs::canonicalize(&link).ok().as_deref() == Some(target.as_path()) {
        return Ok(None);
    }
    if link.symlink_metadata().is_ok() {
        tracing::warn!(
            "{} already exists, not linking it to {}",
            link.display(),
            bank.display()
        );
        return Ok(None);
    }
    if !target.is_dir() {
        tracing::warn!("Template bank {} does not exist, not linking it", bank.display());
        return Ok(None);
    }
    symlink_dir(&target, &link)?;
    Ok(Some(link))
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Run `python run.py parameters.json` inside the workspace.
pub fn run(workspace: &Workspace, python: &str) -> Result<()> {
    tracing::info!("Running NGSF in {}", workspace.dir.display());
    let status = Command::new(python)
        .arg(RUN_FILE)
        .arg(PARAMETERS_FILE)
        .current_dir(&workspace.dir)
        .status()?;
    if !status.success() {
        return Err(Error::Io(std::io::Error::other(format!(
            "NGSF exited with {}",
            status
        ))));
    }
    Ok(())
}

/// Remove the files written by [`write_workspace`]. The `NGSF` directory is
/// kept when the fit left other files in it.
pub fn clean(workspace: &Workspace) -> Result<()> {
    for path in [&workspace.parameters, &workspace.run_script, &workspace.peaks] {
        remove_if_present(path)?;
    }
    let ngsf_dir = workspace.dir.join(NGSF_DIR);
    if let Err(e) = fs::remove_dir(&ngsf_dir) {
        if e.kind() != ErrorKind::NotFound {
            tracing::debug!("Keeping {}: {}", ngsf_dir.display(), e);
        }
    }
    if let Some(link) = &workspace.bank_link {
        remove_if_present(link)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
