//! Calendar, Julian Date and Modified Julian Date conversions (UTC).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// Julian Date of the Unix epoch, 1970-01-01T00:00:00 UTC.
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Offset between Julian Date and Modified Julian Date.
pub const MJD_OFFSET: f64 = 2_400_000.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Representation of an input time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    /// `yyyy-mm-dd hh:mm:ss`
    #[default]
    Iso,
    /// `yyyy-mm-ddThh:mm:ss`
    Isot,
    Mjd,
    Jd,
}

impl FromStr for TimeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "iso" => Ok(TimeFormat::Iso),
            "isot" => Ok(TimeFormat::Isot),
            "mjd" => Ok(TimeFormat::Mjd),
            "jd" => Ok(TimeFormat::Jd),
            other => Err(Error::invalid(format!(
                "Unknown time format '{}', expected one of: iso, isot, mjd, jd",
                other
            ))),
        }
    }
}

impl fmt::Display for TimeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeFormat::Iso => "iso",
            TimeFormat::Isot => "isot",
            TimeFormat::Mjd => "mjd",
            TimeFormat::Jd => "jd",
        };
        write!(f, "{}", name)
    }
}

/// An instant on the UTC time scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(DateTime<Utc>);

impl Epoch {
    pub fn now() -> Self {
        Epoch(Utc::now())
    }

    pub fn from_jd(jd: f64) -> Result<Self> {
        if !jd.is_finite() {
            return Err(Error::invalid(format!("Julian Date must be finite, got: {}", jd)));
        }
        let seconds = (jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY;
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
            .map(Epoch)
            .ok_or_else(|| Error::invalid(format!("Julian Date {} is out of range", jd)))
    }

    pub fn from_mjd(mjd: f64) -> Result<Self> {
        Self::from_jd(mjd + MJD_OFFSET)
    }

    pub fn jd(&self) -> f64 {
        let seconds = self.0.timestamp() as f64 + self.0.timestamp_subsec_nanos() as f64 * 1e-9;
        UNIX_EPOCH_JD + seconds / SECONDS_PER_DAY
    }

    pub fn mjd(&self) -> f64 {
        self.jd() - MJD_OFFSET
    }

    /// ISO 8601 with a `T` separator; fractional seconds only when present.
    pub fn isot(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    }
}

fn parse_calendar(value: &str, separator: char) -> Result<Epoch> {
    let trimmed = value.trim();
    let with_seconds = format!("%Y-%m-%d{}%H:%M:%S%.f", separator);
    let with_minutes = format!("%Y-%m-%d{}%H:%M", separator);

    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, &with_seconds)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, &with_minutes))
    {
        return Ok(Epoch(datetime.and_utc()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(datetime) = date.and_hms_opt(0, 0, 0) {
            return Ok(Epoch(datetime.and_utc()));
        }
    }
    Err(Error::Parse(format!(
        "Invalid time '{}', expected yyyy-mm-dd{}hh:mm:ss",
        trimmed, separator
    )))
}

fn parse_day_number(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Parse(format!("Invalid day number '{}': {}", value.trim(), e)))
}

/// Interpret `value` in the given format.
pub fn parse_time(value: &str, format: TimeFormat) -> Result<Epoch> {
    match format {
        TimeFormat::Iso => parse_calendar(value, ' '),
        TimeFormat::Isot => parse_calendar(value, 'T'),
        TimeFormat::Mjd => Epoch::from_mjd(parse_day_number(value)?),
        TimeFormat::Jd => Epoch::from_jd(parse_day_number(value)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjd_zero_point() {
        let epoch = parse_time("1858-11-17 00:00:00", TimeFormat::Iso).unwrap();
        assert!(epoch.mjd().abs() < 1e-9);
        assert!((epoch.jd() - 2_400_000.5).abs() < 1e-9);
    }

    #[test]
    fn test_j2000() {
        let epoch = parse_time("2000-01-01T12:00:00", TimeFormat::Isot).unwrap();
        assert!((epoch.jd() - 2_451_545.0).abs() < 1e-9);
        assert!((epoch.mjd() - 51_544.5).abs() < 1e-9);
    }

    #[test]
    fn test_day_numbers_to_calendar() {
        let epoch = parse_time("60000", TimeFormat::Mjd).unwrap();
        assert_eq!(epoch.isot(), "2023-02-25T00:00:00");

        let epoch = parse_time("2451545.25", TimeFormat::Jd).unwrap();
        assert_eq!(epoch.isot(), "2000-01-01T18:00:00");
    }

    #[test]
    fn test_iso_variants() {
        let full = parse_time("2023-06-15 08:30:15.5", TimeFormat::Iso).unwrap();
        assert_eq!(full.isot(), "2023-06-15T08:30:15.500");
        let date_only = parse_time("2023-06-15", TimeFormat::Iso).unwrap();
        assert_eq!(date_only.isot(), "2023-06-15T00:00:00");
        assert!(matches!(
            parse_time("2023-06-15T08:30:15", TimeFormat::Iso),
            Err(Error::Parse(_))
        ));
        assert!(matches!(parse_time("tomorrow", TimeFormat::Mjd), Err(Error::Parse(_))));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("".parse::<TimeFormat>().unwrap(), TimeFormat::Iso);
        assert_eq!("JD".parse::<TimeFormat>().unwrap(), TimeFormat::Jd);
        assert!(matches!(
            "unix".parse::<TimeFormat>(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(Epoch::now().mjd() > 58_849.0);
    }
}
