//! Sexagesimal and decimal-degree sky coordinates.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::models::SkyPosition;

/// Target representation of the `coords` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordFormat {
    #[default]
    Degrees,
    Hmsdms,
}

impl FromStr for CoordFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "degrees" | "deg" => Ok(CoordFormat::Degrees),
            "hmsdms" => Ok(CoordFormat::Hmsdms),
            other => Err(Error::invalid(format!(
                "Unknown coordinate format '{}', expected 'degrees' or 'hmsdms'",
                other
            ))),
        }
    }
}

impl fmt::Display for CoordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordFormat::Degrees => write!(f, "degrees"),
            CoordFormat::Hmsdms => write!(f, "hmsdms"),
        }
    }
}

/// Characters accepted between sexagesimal fields besides whitespace.
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[:hHdDmMsS°'"]"#).expect("separator pattern is valid"));

/// Split `[+-]D[:M[:S]]` into its sign and up to three components.
fn components(value: &str) -> Result<(f64, Vec<f64>)> {
    let trimmed = value.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let normalized = SEPARATORS.replace_all(body, " ");
    let parts = normalized
        .split_whitespace()
        .map(|part| {
            part.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| {
                    Error::Parse(format!(
                        "Invalid sexagesimal component '{}' in '{}'",
                        part, value
                    ))
                })
        })
        .collect::<Result<Vec<f64>>>()?;

    if parts.is_empty() || parts.len() > 3 {
        return Err(Error::Parse(format!(
            "Expected 1 to 3 sexagesimal components, got '{}'",
            value
        )));
    }
    if let Some(&minutes) = parts.get(1) {
        if minutes >= 60.0 {
            return Err(Error::invalid(format!(
                "Minutes must be between 0 and 60, got: {}",
                minutes
            )));
        }
    }
    if let Some(&seconds) = parts.get(2) {
        if seconds >= 60.0 {
            return Err(Error::invalid(format!(
                "Seconds must be between 0 and 60, got: {}",
                seconds
            )));
        }
    }
    Ok((sign, parts))
}

fn sexagesimal_to_decimal(value: &str) -> Result<f64> {
    let (sign, parts) = components(value)?;
    let magnitude = parts
        .iter()
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, divisor)| part / divisor)
        .sum::<f64>();
    Ok(sign * magnitude)
}

/// Right ascension given as hour angle (`HH MM SS.s`, `HH:MM:SS.s`,
/// `HHhMMmSS.ss`) in degrees.
pub fn parse_hour_angle(value: &str) -> Result<f64> {
    let hours = sexagesimal_to_decimal(value)?;
    if !(0.0..24.0).contains(&hours) {
        return Err(Error::invalid(format!(
            "Right ascension must be within [0, 24) hours, got: {}",
            value.trim()
        )));
    }
    Ok(hours * 15.0)
}

/// Declination given as `±DD MM SS.s` (or decimal degrees) in degrees.
pub fn parse_declination(value: &str) -> Result<f64> {
    let degrees = sexagesimal_to_decimal(value)?;
    if !(-90.0..=90.0).contains(&degrees) {
        return Err(Error::invalid(format!(
            "Declination must be within [-90, 90] degrees, got: {}",
            value.trim()
        )));
    }
    Ok(degrees)
}

/// Sexagesimal right ascension (hours) and declination (degrees) to decimal
/// degrees.
pub fn parse_sexagesimal(ra: &str, dec: &str) -> Result<(f64, f64)> {
    Ok((parse_hour_angle(ra)?, parse_declination(dec)?))
}

fn is_plain_number(value: &str) -> bool {
    !value.trim().is_empty() && value.trim().parse::<f64>().is_ok()
}

/// Right ascension in degrees: a plain number is taken as decimal degrees,
/// anything else as a sexagesimal hour angle.
pub fn parse_ra(value: &str) -> Result<f64> {
    if is_plain_number(value) {
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Parse(format!("Invalid right ascension '{}': {}", value, e)))
    } else {
        parse_hour_angle(value)
    }
}

/// Target position from right ascension and declination in either decimal
/// degrees or sexagesimal notation.
pub fn parse_position(ra: &str, dec: &str) -> Result<SkyPosition> {
    SkyPosition::new(parse_ra(ra)?, parse_declination(dec)?)
}

/// Split a single `RA DEC` line into its two halves.
///
/// Accepts `ra dec`, six space-separated sexagesimal fields, or any split
/// where the declination starts with an explicit sign.
pub fn split_radec(input: &str) -> Result<(String, String)> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    match tokens.len() {
        2 => Ok((tokens[0].to_string(), tokens[1].to_string())),
        6 => Ok((tokens[..3].join(" "), tokens[3..].join(" "))),
        _ => tokens
            .iter()
            .skip(1)
            .position(|t| t.starts_with('+') || t.starts_with('-'))
            .map(|i| (tokens[..=i].join(" "), tokens[i + 1..].join(" ")))
            .ok_or_else(|| {
                Error::Parse(format!(
                    "Cannot split '{}' into right ascension and declination",
                    input.trim()
                ))
            }),
    }
}

/// Split `value` (hours or degrees, non-negative) into whole units, minutes,
/// seconds and the seconds fraction in units of 10^-`decimals`, rounding
/// once so carries propagate. With `wrap`, the whole units wrap at that value.
fn sexagesimal_fields(value: f64, decimals: u32, wrap: Option<u64>) -> (u64, u64, u64, u64) {
    let scale = 10u64.pow(decimals);
    let per_unit = 3600 * scale;
    let mut ticks = (value * per_unit as f64).round() as u64;
    if let Some(wrap) = wrap {
        ticks %= wrap * per_unit;
    }
    let rest = ticks % per_unit;
    (
        ticks / per_unit,
        rest / (60 * scale),
        rest % (60 * scale) / scale,
        rest % scale,
    )
}

/// `23h00m13.96s +15d58m25.95s`, seconds rounded to two decimals.
pub fn format_hmsdms(ra: f64, dec: f64) -> String {
    let (h, m, s, cs) = sexagesimal_fields(ra.rem_euclid(360.0) / 15.0, 2, Some(24));
    let sign = if dec < 0.0 { '-' } else { '+' };
    let (d, dm, ds, dcs) = sexagesimal_fields(dec.abs(), 2, None);
    format!(
        "{:02}h{:02}m{:02}.{:02}s {}{:02}d{:02}m{:02}.{:02}s",
        h, m, s, cs, sign, d, dm, ds, dcs
    )
}

/// `23 00 14.136 +15 58 25.959`, seconds rounded to three decimals.
pub fn format_sexagesimal(position: &SkyPosition) -> String {
    let (h, m, s, ms) = sexagesimal_fields(position.ra / 15.0, 3, Some(24));
    let sign = if position.dec < 0.0 { '-' } else { '+' };
    let (d, dm, ds, dms) = sexagesimal_fields(position.dec.abs(), 3, None);
    format!(
        "{:02} {:02} {:02}.{:03} {}{:02} {:02} {:02}.{:03}",
        h, m, s, ms, sign, d, dm, ds, dms
    )
}

/// Years elapsed since J2000 at the start of the given month, as
/// `year - 2000 + month / 12`.
pub fn years_since_j2000(year: i32, month: u32) -> Result<f64> {
    if !(1..=12).contains(&month) {
        return Err(Error::invalid(format!(
            "Month must be within 1 to 12, got: {}",
            month
        )));
    }
    Ok(f64::from(year - 2000) + f64::from(month) / 12.0)
}

/// Blind-offset star moved from its catalogue epoch to the observing date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProperMotionCorrection {
    pub initial: SkyPosition,
    pub corrected: SkyPosition,
    /// Shift added to the right ascension seconds field, in seconds of time
    pub ra_seconds: f64,
    /// Shift added to the declination seconds field, in arcsec
    pub dec_arcsec: f64,
}

impl ProperMotionCorrection {
    /// Total shift on the sky in arcsec.
    pub fn offset_arcsec(&self) -> f64 {
        self.initial.separation_deg(&self.corrected) * 3600.0
    }
}

/// Apply a proper motion in mas/yr over `years` to a J2000 position.
///
/// The right ascension shift is `years * pm_ra / 1500` seconds of time and the
/// declination shift `years * pm_dec / 1000` arcsec.
pub fn correct_proper_motion(
    position: SkyPosition,
    pm_ra_mas: f64,
    pm_dec_mas: f64,
    years: f64,
) -> Result<ProperMotionCorrection> {
    if !pm_ra_mas.is_finite() || !pm_dec_mas.is_finite() || !years.is_finite() {
        return Err(Error::invalid(format!(
            "Proper motion and epoch must be finite, got {} {} mas/yr over {} yr",
            pm_ra_mas, pm_dec_mas, years
        )));
    }
    let ra_seconds = years * pm_ra_mas / 1500.0;
    let dec_arcsec = years * pm_dec_mas / 1000.0;
    let corrected = SkyPosition::new(
        position.ra + ra_seconds * 15.0 / 3600.0,
        position.dec + dec_arcsec / 3600.0,
    )?;
    Ok(ProperMotionCorrection {
        initial: position,
        corrected,
        ra_seconds,
        dec_arcsec,
    })
}
