use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::background::{ClipParams, MeshParams};
use crate::error::Error;
use crate::fits_image::HduSelection;
use crate::models::{validate_radii, ComparisonMethod};
use crate::render::RenderOptions;

/// Configuration file for background checks. Every field is optional;
/// missing values take the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Annulus and comparison settings
    pub annulus: AnnulusConfig,
    /// Global background estimation settings
    pub background: BackgroundConfig,
    /// Rendering settings
    pub render: RenderConfig,
    /// Output settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnulusConfig {
    /// Inner radius in arcsec (default: 3)
    pub r_in: Option<f64>,
    /// Outer radius in arcsec (default: 6)
    pub r_out: Option<f64>,
    /// "mean" or "median" (default: "mean")
    pub method: Option<String>,
    /// Percentile of the annulus pixels used as local level (default: 90)
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Clipping threshold in standard deviations (default: 3)
    pub sigma: Option<f64>,
    /// Maximum clipping iterations, 0 = until convergence (default: 5)
    pub max_iters: Option<usize>,
    /// Background model tile size in pixels (default: 64)
    pub mesh_size: Option<usize>,
    /// Median filter window over the tiles (default: 3)
    pub filter_size: Option<usize>,
    /// "primary", "auto" or an HDU index (default: "auto")
    pub hdu: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Cutout field of view in arcmin (default: 1.0)
    pub size_arcmin: Option<f64>,
    /// Open the rendering in a viewer (default: true)
    pub show_plot: Option<bool>,
    /// Rendered image edge in pixels (default: 800)
    pub output_px: Option<u32>,
    /// TrueType font for the statistics box
    pub font: Option<String>,
    /// Viewer program (default: platform opener)
    pub viewer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving tables and renderings (default: ".")
    pub dest_dir: Option<String>,
    /// Score above which a template is flagged as needed (default: 3)
    pub template_threshold: Option<f64>,
}

/// Values given on the command line; `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct CheckOverrides {
    pub r_in: Option<f64>,
    pub r_out: Option<f64>,
    pub method: Option<String>,
    pub percentile: Option<f64>,
    pub size_arcmin: Option<f64>,
    pub show_plot: Option<bool>,
    pub dest_dir: Option<String>,
    pub sigma: Option<f64>,
    pub hdu: Option<String>,
    pub font: Option<String>,
}

/// Fully resolved and validated settings of one background check.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub r_in: f64,
    pub r_out: f64,
    pub method: ComparisonMethod,
    pub percentile: f64,
    pub clip: ClipParams,
    pub mesh: MeshParams,
    pub hdu: HduSelection,
    pub render: RenderOptions,
    pub show_plot: bool,
    pub viewer: Option<String>,
    pub dest_dir: PathBuf,
    pub template_threshold: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            r_in: 3.0,
            r_out: 6.0,
            method: ComparisonMethod::Mean,
            percentile: 90.0,
            clip: ClipParams::default(),
            mesh: MeshParams::default(),
            hdu: HduSelection::Auto,
            render: RenderOptions::default(),
            show_plot: true,
            viewer: None,
            dest_dir: PathBuf::from("."),
            template_threshold: 3.0,
        }
    }
}

impl CheckConfig {
    /// Reject settings no computation can use. Runs before any image I/O.
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_radii(self.r_in, self.r_out)?;
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(Error::invalid(format!(
                "Percentile must be within [0, 100], got: {}",
                self.percentile
            )));
        }
        if !(self.clip.sigma > 0.0) {
            return Err(Error::invalid(format!(
                "Clipping sigma must be positive, got: {}",
                self.clip.sigma
            )));
        }
        if self.mesh.mesh_size == 0 {
            return Err(Error::invalid("Background mesh size must be at least 1 pixel"));
        }
        if self.mesh.filter_size == 0 || self.mesh.filter_size % 2 == 0 {
            return Err(Error::invalid(format!(
                "Background filter size must be odd, got: {}",
                self.mesh.filter_size
            )));
        }
        if !(self.render.size_arcmin > 0.0) {
            return Err(Error::invalid(format!(
                "Display size must be positive, got: {} arcmin",
                self.render.size_arcmin
            )));
        }
        if self.render.output_px == 0 {
            return Err(Error::invalid("Rendered image size must be at least 1 pixel"));
        }
        if !(self.template_threshold >= 0.0) {
            return Err(Error::invalid(format!(
                "Template threshold must not be negative, got: {}",
                self.template_threshold
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml_edit::de::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml_edit::ser::to_string_pretty(self)
            .context("Failed to serialize configuration to TOML")?;

        std::fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Merge command line values into the configuration, prioritizing CLI values
    pub fn merge_with_cli(&mut self, cli: CheckOverrides) {
        let CheckOverrides {
            r_in,
            r_out,
            method,
            percentile,
            size_arcmin,
            show_plot,
            dest_dir,
            sigma,
            hdu,
            font,
        } = cli;

        self.annulus.r_in = r_in.or(self.annulus.r_in);
        self.annulus.r_out = r_out.or(self.annulus.r_out);
        self.annulus.method = method.or(self.annulus.method.take());
        self.annulus.percentile = percentile.or(self.annulus.percentile);
        self.render.size_arcmin = size_arcmin.or(self.render.size_arcmin);
        self.render.show_plot = show_plot.or(self.render.show_plot);
        self.render.font = font.or(self.render.font.take());
        self.output.dest_dir = dest_dir.or(self.output.dest_dir.take());
        self.background.sigma = sigma.or(self.background.sigma);
        self.background.hdu = hdu.or(self.background.hdu.take());
    }

    /// Apply defaults, parse enumerated choices and validate.
    pub fn resolve(&self) -> crate::error::Result<CheckConfig> {
        let defaults = CheckConfig::default();

        let method = match self.annulus.method.as_deref() {
            Some(method) => method.parse()?,
            None => defaults.method,
        };
        let hdu = match self.background.hdu.as_deref() {
            Some(hdu) => hdu.parse()?,
            None => defaults.hdu,
        };
        let max_iters = match self.background.max_iters {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.clip.max_iters,
        };

        let resolved = CheckConfig {
            r_in: self.annulus.r_in.unwrap_or(defaults.r_in),
            r_out: self.annulus.r_out.unwrap_or(defaults.r_out),
            method,
            percentile: self.annulus.percentile.unwrap_or(defaults.percentile),
            clip: ClipParams {
                sigma: self.background.sigma.unwrap_or(defaults.clip.sigma),
                max_iters,
            },
            mesh: MeshParams {
                mesh_size: self.background.mesh_size.unwrap_or(defaults.mesh.mesh_size),
                filter_size: self.background.filter_size.unwrap_or(defaults.mesh.filter_size),
                clip_sigma: defaults.mesh.clip_sigma,
            },
            hdu,
            render: RenderOptions {
                size_arcmin: self.render.size_arcmin.unwrap_or(defaults.render.size_arcmin),
                output_px: self.render.output_px.unwrap_or(defaults.render.output_px),
                font: self.render.font.as_ref().map(PathBuf::from),
            },
            show_plot: self.render.show_plot.unwrap_or(defaults.show_plot),
            viewer: self.render.viewer.clone(),
            dest_dir: self
                .output
                .dest_dir
                .as_ref()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.dest_dir),
            template_threshold: self
                .output
                .template_threshold
                .unwrap_or(defaults.template_threshold),
        };

        resolved.validate()?;
        Ok(resolved)
    }
}
