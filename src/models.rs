use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Right ascension and declination (J2000) in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    pub fn new(ra: f64, dec: f64) -> Result<Self> {
        if !ra.is_finite() || !dec.is_finite() {
            return Err(Error::invalid(format!(
                "Coordinates must be finite, got RA={} Dec={}",
                ra, dec
            )));
        }
        if !(-90.0..=90.0).contains(&dec) {
            return Err(Error::invalid(format!(
                "Declination must be within [-90, 90] degrees, got: {}",
                dec
            )));
        }
        Ok(Self {
            ra: ra.rem_euclid(360.0),
            dec,
        })
    }

    /// Great-circle separation in degrees (haversine).
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        let (ra1, dec1) = (self.ra.to_radians(), self.dec.to_radians());
        let (ra2, dec2) = (other.ra.to_radians(), other.dec.to_radians());
        let sin_ddec = ((dec2 - dec1) / 2.0).sin();
        let sin_dra = ((ra2 - ra1) / 2.0).sin();
        let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
        (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
    }
}

/// Ring-shaped sky region; radii in arcseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annulus {
    pub center: SkyPosition,
    pub r_in: f64,
    pub r_out: f64,
}

impl Annulus {
    pub fn new(center: SkyPosition, r_in: f64, r_out: f64) -> Result<Self> {
        validate_radii(r_in, r_out)?;
        Ok(Self {
            center,
            r_in,
            r_out,
        })
    }
}

pub(crate) fn validate_radii(r_in: f64, r_out: f64) -> Result<()> {
    if !r_in.is_finite() || r_in <= 0.0 {
        return Err(Error::invalid(format!(
            "Inner annulus radius must be positive, got: {}",
            r_in
        )));
    }
    if !r_out.is_finite() || r_out <= r_in {
        return Err(Error::invalid(format!(
            "Outer annulus radius must be larger than the inner radius ({}), got: {}",
            r_in, r_out
        )));
    }
    Ok(())
}

/// Which estimator produced a [`BackgroundEstimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Tiled source-extraction style background model.
    Model,
    /// Whole-image sigma-clipped statistics.
    Clipped,
    /// Pixels inside an annulus around the target.
    Annulus,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Provenance::Model => "model",
            Provenance::Clipped => "clipped",
            Provenance::Annulus => "annulus",
        };
        f.write_str(tag)
    }
}

/// Statistic of a global estimate the local level is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMethod {
    #[default]
    Mean,
    Median,
}

impl FromStr for ComparisonMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(ComparisonMethod::Mean),
            "median" => Ok(ComparisonMethod::Median),
            other => Err(Error::invalid(format!(
                "Unsupported comparison method '{}', expected 'mean' or 'median'",
                other
            ))),
        }
    }
}

impl fmt::Display for ComparisonMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMethod::Mean => f.write_str("mean"),
            ComparisonMethod::Median => f.write_str("median"),
        }
    }
}

/// Percentile of the annulus pixels used as the local level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileLevel {
    pub percent: f64,
    pub value: f64,
}

/// Background statistics produced once by one estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundEstimate {
    pub provenance: Provenance,
    pub mean: f64,
    pub median: Option<f64>,
    pub std: f64,
    pub percentile: Option<PercentileLevel>,
    /// Number of finite pixels that contributed.
    pub pixels: usize,
}

impl BackgroundEstimate {
    /// Representative level: the percentile when one was computed, else the mean.
    pub fn level(&self) -> f64 {
        self.percentile.map(|p| p.value).unwrap_or(self.mean)
    }

    /// Value compared against a local level. Estimates without a median
    /// (the background model) always answer with their mean.
    pub fn reference(&self, method: ComparisonMethod) -> f64 {
        match (method, self.median) {
            (ComparisonMethod::Median, Some(median)) => median,
            _ => self.mean,
        }
    }
}

/// One row of the background check table.
///
/// Column names follow the established output format; `sep_*` columns hold
/// the tiled background model and `astro_*` columns the sigma-clipped
/// statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub file: String,
    pub ra: f64,
    pub dec: f64,
    pub r_in: f64,
    pub r_out: f64,
    pub method: ComparisonMethod,
    #[serde(rename = "sep_diff")]
    pub model_diff: f64,
    #[serde(rename = "astro_diff")]
    pub clipped_diff: f64,
    #[serde(rename = "sep_mean")]
    pub model_mean: f64,
    #[serde(rename = "sep_std")]
    pub model_std: f64,
    #[serde(rename = "astro_mean")]
    pub clipped_mean: f64,
    #[serde(rename = "astro_median")]
    pub clipped_median: f64,
    #[serde(rename = "astro_std")]
    pub clipped_std: f64,
    pub annulus_bkg: f64,
    pub annulus_std: f64,
    pub annulus_percent: f64,
}

impl DiscrepancyReport {
    /// Larger of the two discrepancy scores.
    pub fn max_diff(&self) -> f64 {
        self.model_diff.max(self.clipped_diff)
    }

    /// Whether the local background departs from the global one by more than
    /// `threshold` standard deviations, i.e. a template is needed for
    /// image subtraction.
    pub fn needs_template(&self, threshold: f64) -> bool {
        self.max_diff() > threshold
    }
}
