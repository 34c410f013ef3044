use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CheckOverrides;
use crate::ngsf::NgsfParameters;

#[derive(Parser)]
#[command(name = "bkg-check")]
#[command(about = "Background diagnostics for transient imaging and astronomy unit conversions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

/// Options shared by the single-file and batch background checks.
#[derive(Args, Debug, Clone, Default)]
pub struct CheckOptions {
    /// Inner annulus radius in arcsec [default: 3]
    #[arg(long)]
    pub r_in: Option<f64>,

    /// Outer annulus radius in arcsec [default: 6]
    #[arg(long)]
    pub r_out: Option<f64>,

    /// Statistic of the clipped background to compare against: mean or median [default: mean]
    #[arg(short, long)]
    pub method: Option<String>,

    /// Percentile of the annulus pixels used as local background [default: 90]
    #[arg(short, long)]
    pub percent: Option<f64>,

    /// Cutout size in arcmin [default: 1.0]
    #[arg(short, long)]
    pub size: Option<f64>,

    /// Open the rendered cutout in an image viewer [default: true]
    #[arg(long)]
    pub show_plot: Option<bool>,

    /// Directory for tables and renderings [default: .]
    #[arg(short, long)]
    pub dest_dir: Option<String>,

    /// Sigma-clipping threshold [default: 3]
    #[arg(long)]
    pub sigma: Option<f64>,

    /// HDU holding the image: primary, auto or an index [default: auto]
    #[arg(long)]
    pub hdu: Option<String>,

    /// TrueType font for the statistics box
    #[arg(long)]
    pub font: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl CheckOptions {
    pub fn overrides(&self) -> CheckOverrides {
        CheckOverrides {
            r_in: self.r_in,
            r_out: self.r_out,
            method: self.method.clone(),
            percentile: self.percent,
            size_arcmin: self.size,
            show_plot: self.show_plot,
            dest_dir: self.dest_dir.clone(),
            sigma: self.sigma,
            hdu: self.hdu.clone(),
            font: self.font.clone(),
        }
    }
}

/// NGSF fit settings; anything left out keeps the NGSF default.
#[derive(Args, Debug, Clone, Default)]
pub struct NgsfOptions {
    /// Use the exact redshift (1) or search a redshift range (0) [default: 1]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub use_exact_z: Option<u8>,

    /// Redshift used when use_exact_z is 1 [default: 0.127]
    #[arg(long)]
    pub z_exact: Option<f64>,

    /// First redshift of the search range [default: 0]
    #[arg(long)]
    pub z_range_begin: Option<f64>,

    /// Last redshift of the search range [default: 0.1]
    #[arg(long)]
    pub z_range_end: Option<f64>,

    /// Redshift step of the search range [default: 0.01]
    #[arg(long)]
    pub z_int: Option<f64>,

    /// Fit resolution in Angstrom [default: 10]
    #[arg(short, long)]
    pub resolution: Option<f64>,

    /// Lower wavelength bound of the fit [default: 0]
    #[arg(long)]
    pub lower_lam: Option<f64>,

    /// Upper wavelength bound of the fit [default: 9500]
    #[arg(long)]
    pub upper_lam: Option<f64>,

    /// Error spectrum estimate: sg, linear or included [default: sg]
    #[arg(long)]
    pub error_spectrum: Option<String>,

    /// Directory for the fit results
    #[arg(short, long)]
    pub saving_results_path: Option<String>,

    /// Minimum overlap between template and object [default: 0.7]
    #[arg(long)]
    pub minimum_overlap: Option<f64>,

    /// Show the best fits (1) or not (0) [default: 1]
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub show_plot: Option<u8>,

    /// Number of fits to plot [default: 5]
    #[arg(long)]
    pub how_many_plots: Option<u32>,

    /// Mask host galaxy lines (1) or not (0) [default: 1]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub mask_galaxy_lines: Option<u8>,

    /// Mask the telluric band at 7594-7680 Angstrom (1) or not (0) [default: 1]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub mask_telluric: Option<u8>,

    /// Upper epoch for phase truncation [default: 0]
    #[arg(long, allow_negative_numbers = true)]
    pub epoch_high: Option<i32>,

    /// Lower epoch for phase truncation [default: 0]
    #[arg(long, allow_negative_numbers = true)]
    pub epoch_low: Option<i32>,

    /// Upper extinction law constant [default: 2]
    #[arg(long = "alam-high", allow_negative_numbers = true)]
    pub alam_high: Option<f64>,

    /// Lower extinction law constant [default: -2]
    #[arg(long = "alam-low", allow_negative_numbers = true)]
    pub alam_low: Option<f64>,

    /// Step of the extinction grid [default: 0.2]
    #[arg(long = "alam-interval")]
    pub alam_interval: Option<f64>,

    /// Template bank directory [default: bank]
    #[arg(long)]
    pub bank_dir: Option<String>,
}

impl NgsfOptions {
    pub fn parameters(&self, object_to_fit: &str) -> NgsfParameters {
        let d = NgsfParameters::default();
        NgsfParameters {
            object_to_fit: object_to_fit.to_string(),
            use_exact_z: self.use_exact_z.unwrap_or(d.use_exact_z),
            z_exact: self.z_exact.unwrap_or(d.z_exact),
            z_range_begin: self.z_range_begin.unwrap_or(d.z_range_begin),
            z_range_end: self.z_range_end.unwrap_or(d.z_range_end),
            z_int: self.z_int.unwrap_or(d.z_int),
            resolution: self.resolution.unwrap_or(d.resolution),
            lower_lam: self.lower_lam.unwrap_or(d.lower_lam),
            upper_lam: self.upper_lam.unwrap_or(d.upper_lam),
            error_spectrum: self.error_spectrum.clone().unwrap_or(d.error_spectrum),
            saving_results_path: self
                .saving_results_path
                .clone()
                .unwrap_or(d.saving_results_path),
            minimum_overlap: self.minimum_overlap.unwrap_or(d.minimum_overlap),
            show_plot: self.show_plot.unwrap_or(d.show_plot),
            how_many_plots: self.how_many_plots.unwrap_or(d.how_many_plots),
            mask_galaxy_lines: self.mask_galaxy_lines.unwrap_or(d.mask_galaxy_lines),
            mask_telluric: self.mask_telluric.unwrap_or(d.mask_telluric),
            epoch_high: self.epoch_high.unwrap_or(d.epoch_high),
            epoch_low: self.epoch_low.unwrap_or(d.epoch_low),
            alam_high: self.alam_high.unwrap_or(d.alam_high),
            alam_low: self.alam_low.unwrap_or(d.alam_low),
            alam_interval: self.alam_interval.unwrap_or(d.alam_interval),
            bank_dir: self.bank_dir.clone().unwrap_or(d.bank_dir),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compare the background around a target with the global image background
    Check {
        /// FITS image
        file: PathBuf,

        /// Right ascension (decimal degrees or HH:MM:SS.s)
        #[arg(allow_hyphen_values = true)]
        ra: String,

        /// Declination (decimal degrees or ±DD:MM:SS.s)
        #[arg(allow_hyphen_values = true)]
        dec: String,

        #[command(flatten)]
        options: CheckOptions,
    },

    /// Run the background check on many images
    Batch {
        /// FITS files, directories, whitespace-separated lists or .list files
        inputs: Vec<String>,

        /// CSV with file,ra,dec columns giving a target per image
        #[arg(long, conflicts_with_all = ["ra", "dec"])]
        positions: Option<PathBuf>,

        /// Right ascension shared by every image
        #[arg(long, allow_hyphen_values = true, requires = "dec")]
        ra: Option<String>,

        /// Declination shared by every image
        #[arg(long, allow_hyphen_values = true, requires = "ra")]
        dec: Option<String>,

        /// Also append every successful row to this combined table
        #[arg(long)]
        summary: Option<PathBuf>,

        #[command(flatten)]
        options: CheckOptions,
    },

    /// Convert coordinates between sexagesimal and decimal degrees
    Coords {
        /// RA and Dec (J2000), e.g. "23 00 13.96 +15 58 25.95" or "345.058 15.974"
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        radec: Vec<String>,

        /// Output format: degrees or hmsdms
        #[arg(short, long, default_value = "degrees")]
        to: String,
    },

    /// Convert a time between ISO, ISOT, MJD and JD
    Mjd {
        /// Time value, e.g. "2023-06-15 08:30:00" or 60000.5
        #[arg(required = true, num_args = 1..)]
        time: Vec<String>,

        /// Input format: iso, isot, mjd or jd
        #[arg(short, long, default_value = "iso")]
        from: String,
    },

    /// Print the current JD and MJD
    MjdNow,

    /// Move a blind-offset star from J2000 to the observing date by its proper motion
    BlindOffset {
        /// RA and Dec (J2000) of the offset star, e.g. "23 00 13.96 +15 58 25.95"
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        radec: Vec<String>,

        /// Proper motion in right ascension, mas/yr
        #[arg(long, allow_negative_numbers = true)]
        pm_ra: f64,

        /// Proper motion in declination, mas/yr
        #[arg(long, allow_negative_numbers = true)]
        pm_dec: f64,

        /// Year of the observation
        #[arg(long)]
        year: i32,

        /// Month of the observation (1-12)
        #[arg(long)]
        month: u32,
    },

    /// Distance modulus and luminosity distance at a redshift
    Distmod {
        /// Redshift
        z: f64,

        /// Apparent magnitude, to report the absolute magnitude
        #[arg(short, long, allow_hyphen_values = true)]
        magnitude: Option<f64>,

        /// Hubble constant in km/s/Mpc
        #[arg(long, default_value_t = 70.0)]
        h0: f64,

        /// Matter density parameter
        #[arg(long, default_value_t = 0.3)]
        om0: f64,
    },

    /// Convert between angular size and projected distance at a redshift
    Angular {
        /// Redshift
        z: f64,

        /// Angle in arcsec (mode arcsec) or distance in parsec (mode dist)
        value: f64,

        /// Conversion: arcsec (angle to distance) or dist (distance to angle)
        #[arg(short, long, default_value = "arcsec")]
        mode: String,
    },

    /// Convert FITS spectra to two-column ASCII (.dat)
    Fits2ascii {
        /// FITS files, directories, whitespace-separated lists or .list files
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Render a FITS image in grey levels between mean - std and mean + std
    Plot {
        /// FITS image
        file: PathBuf,

        /// Output image; the format follows the extension [default: <stem>.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// HDU holding the image: primary, auto or an index
        #[arg(long, default_value = "auto")]
        hdu: String,

        /// Longest edge of the rendering in pixels
        #[arg(long, default_value_t = 2048)]
        max_px: u32,

        /// Open the rendering in an image viewer
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        show_plot: bool,
    },

    /// Write the working files for an NGSF spectral fit and optionally run it
    Ngsf {
        /// Spectrum to fit
        object_to_fit: String,

        #[command(flatten)]
        options: NgsfOptions,

        /// Directory to write parameters.json, run.py and NGSF/ into
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Run the fit, then remove the working files
        #[arg(long)]
        run: bool,

        /// Keep the working files after --run
        #[arg(long, requires = "run")]
        keep: bool,

        /// Python interpreter used with --run
        #[arg(long, default_value = "python")]
        python: String,
    },
}
