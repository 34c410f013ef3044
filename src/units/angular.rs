//! Angular size versus projected physical distance at a redshift.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::units::cosmology::FlatLambdaCdm;

const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_36;

/// Direction of the angular conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngularMode {
    /// Angle in arcsec to projected distance in parsec
    #[default]
    Arcsec,
    /// Projected distance in parsec to angle in arcsec
    Dist,
}

impl FromStr for AngularMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            // "arsec" is accepted for compatibility with older scripts
            "" | "arcsec" | "arsec" => Ok(AngularMode::Arcsec),
            "dist" => Ok(AngularMode::Dist),
            other => Err(Error::invalid(format!(
                "Unknown conversion '{}', expected 'arcsec' or 'dist'",
                other
            ))),
        }
    }
}

impl fmt::Display for AngularMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngularMode::Arcsec => write!(f, "arcsec"),
            AngularMode::Dist => write!(f, "dist"),
        }
    }
}

/// Projected distance in parsec subtended by `arcsec` at redshift `z`,
/// `d_L * tan(theta)`.
pub fn arcsec_to_parsec(cosmology: &FlatLambdaCdm, z: f64, arcsec: f64) -> Result<f64> {
    if !arcsec.is_finite() || arcsec < 0.0 {
        return Err(Error::invalid(format!(
            "Angle must be finite and non-negative, got: {} arcsec",
            arcsec
        )));
    }
    let distance = cosmology.luminosity_distance_pc(z)?;
    Ok(distance * (arcsec / ARCSEC_PER_RADIAN).tan())
}

/// Angle in arcsec subtended by `parsec` at redshift `z`, `atan(pc / d_L)`.
pub fn parsec_to_arcsec(cosmology: &FlatLambdaCdm, z: f64, parsec: f64) -> Result<f64> {
    if !parsec.is_finite() || parsec < 0.0 {
        return Err(Error::invalid(format!(
            "Distance must be finite and non-negative, got: {} pc",
            parsec
        )));
    }
    let distance = cosmology.luminosity_distance_pc(z)?;
    if distance <= 0.0 {
        return Err(Error::invalid("Angle is undefined at redshift 0"));
    }
    Ok((parsec / distance).atan() * ARCSEC_PER_RADIAN)
}
