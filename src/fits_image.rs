//! Image loading from FITS files.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fitrs::{Fits, FitsData, Hdu};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wcs::Wcs;

/// Keywords copied out of the FITS header when an HDU is opened.
const KEYWORDS: &[&str] = &[
    "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "BSCALE", "BZERO", "BUNIT", "EXTNAME",
    "CTYPE1", "CTYPE2", "CRVAL1", "CRVAL2", "CRPIX1", "CRPIX2", "CD1_1", "CD1_2", "CD2_1",
    "CD2_2", "CDELT1", "CDELT2", "PC1_1", "PC1_2", "PC2_1", "PC2_2", "CROTA2", "RADESYS",
    "RADECSYS", "EQUINOX", "DC-FLAG", "OBJECT", "DATE-OBS", "MJD-OBS", "EXPTIME", "FILTER",
    "TELESCOP", "INSTRUME", "RA", "DEC", "GAIN", "SATURATE",
];

/// Which header-data unit supplies the pixels.
///
/// Survey products differ: some carry the image in the primary HDU, others
/// leave the primary empty and store pixels in an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HduSelection {
    /// Primary HDU only; an empty primary is a load error.
    Primary,
    /// Primary HDU, or the first extension with data when the primary is empty.
    #[default]
    Auto,
    /// A specific HDU (0 = primary).
    Index(usize),
}

impl FromStr for HduSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(HduSelection::Primary),
            "auto" | "" => Ok(HduSelection::Auto),
            other => other.parse::<usize>().map(HduSelection::Index).map_err(|_| {
                Error::invalid(format!(
                    "Unsupported HDU selection '{}', expected 'primary', 'auto' or an index",
                    other
                ))
            }),
        }
    }
}

impl fmt::Display for HduSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HduSelection::Primary => f.write_str("primary"),
            HduSelection::Auto => f.write_str("auto"),
            HduSelection::Index(index) => write!(f, "{}", index),
        }
    }
}

impl Serialize for HduSelection {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HduSelection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Logical(bool),
    Integer(i64),
    Real(f64),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(s) => f.write_str(s),
            HeaderValue::Logical(b) => f.write_str(if *b { "T" } else { "F" }),
            HeaderValue::Integer(i) => write!(f, "{}", i),
            HeaderValue::Real(r) => write!(f, "{}", r),
        }
    }
}

/// Header keywords of one HDU.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: BTreeMap<String, HeaderValue>,
}

impl Header {
    fn from_hdu(hdu: &Hdu) -> Self {
        let mut header = Header::default();
        for &key in KEYWORDS {
            let value = match hdu.value(key) {
                Some(fitrs::HeaderValue::CharacterString(s)) => {
                    HeaderValue::Text(s.trim().to_string())
                }
                Some(fitrs::HeaderValue::Logical(b)) => HeaderValue::Logical(*b),
                Some(fitrs::HeaderValue::IntegerNumber(i)) => HeaderValue::Integer(*i as i64),
                Some(fitrs::HeaderValue::RealFloatingNumber(r)) => HeaderValue::Real(*r),
                _ => continue,
            };
            header.insert(key, value);
        }
        header
    }

    pub fn insert(&mut self, key: &str, value: HeaderValue) {
        self.cards.insert(key.to_ascii_uppercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.get(key)
    }

    /// Numeric keyword; integers are widened, numeric strings are parsed.
    pub fn real(&self, key: &str) -> Option<f64> {
        match self.cards.get(key)? {
            HeaderValue::Real(r) => Some(*r),
            HeaderValue::Integer(i) => Some(*i as f64),
            HeaderValue::Text(s) => s.trim().parse().ok(),
            HeaderValue::Logical(_) => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.cards.get(key)? {
            HeaderValue::Integer(i) => Some(*i),
            HeaderValue::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.cards.get(key)? {
            HeaderValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.cards.iter()
    }

    fn naxis(&self) -> i64 {
        self.integer("NAXIS").unwrap_or(0)
    }
}

/// Pixels of one HDU with their header, before any dimensional checks.
#[derive(Debug, Clone)]
pub struct RawHdu {
    pub index: usize,
    pub header: Header,
    /// Axis lengths in FITS order (NAXIS1 first)
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// A two-dimensional image with its header and celestial WCS.
#[derive(Debug, Clone)]
pub struct Image {
    pub path: PathBuf,
    pub hdu_index: usize,
    pub width: usize,
    pub height: usize,
    /// Row-major counts; row 0 is FITS row 1 (the bottom of the image).
    pub data: Vec<f64>,
    pub header: Header,
    pub wcs: Option<Wcs>,
}

impl Image {
    /// Build an in-memory image, e.g. from a simulation.
    pub fn from_pixels(
        width: usize,
        height: usize,
        data: Vec<f64>,
        wcs: Option<Wcs>,
    ) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(Error::invalid(format!(
                "Pixel buffer of {} values does not match a {}x{} image",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            path: PathBuf::new(),
            hdu_index: 0,
            width,
            height,
            data,
            header: Header::default(),
            wcs,
        })
    }

    pub fn pixel(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[f64] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn require_wcs(&self) -> Result<&Wcs> {
        self.wcs.as_ref().ok_or_else(|| {
            Error::Wcs(format!(
                "{} (HDU {}) has no celestial WCS",
                self.path.display(),
                self.hdu_index
            ))
        })
    }

    /// File name without directories, as recorded in reports.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Load a two-dimensional image and its WCS.
pub fn load_image(path: &Path, selection: HduSelection) -> Result<Image> {
    let raw = read_hdu(path, selection, 2)?;

    let width = raw.shape[0];
    let height = raw.shape[1];
    let plane = width * height;
    if raw.shape.len() > 2 {
        tracing::debug!(
            "{} has {} axes, using the first plane",
            path.display(),
            raw.shape.len()
        );
    }

    let mut data = raw.data;
    data.truncate(plane);

    let wcs = match Wcs::from_header(&raw.header) {
        Ok(wcs) => wcs,
        Err(e) => {
            tracing::warn!("Ignoring WCS of {}: {}", path.display(), e);
            None
        }
    };

    tracing::debug!(
        "Loaded {} HDU {}: {}x{} pixels, WCS: {}",
        path.display(),
        raw.index,
        width,
        height,
        wcs.is_some()
    );

    Ok(Image {
        path: path.to_path_buf(),
        hdu_index: raw.index,
        width,
        height,
        data,
        header: raw.header,
        wcs,
    })
}

/// Read the pixels of the HDU chosen by `selection`, requiring at least
/// `min_axes` non-degenerate axes.
pub fn read_hdu(path: &Path, selection: HduSelection, min_axes: usize) -> Result<RawHdu> {
    if !path.exists() {
        return Err(Error::load(path, "file does not exist"));
    }
    check_signature(path)?;

    let fits = Fits::open(path).map_err(|e| Error::load(path, e.to_string()))?;

    let candidates: Vec<usize> = match selection {
        HduSelection::Primary => vec![0],
        HduSelection::Index(index) => vec![index],
        HduSelection::Auto => (0..)
            .take_while(|&i| i == 0 || fits.get(i).is_some())
            .take(16)
            .collect(),
    };

    for index in candidates {
        let Some(mut hdu) = fits.get(index) else {
            return Err(Error::load(path, format!("HDU {} does not exist", index)));
        };
        let header = Header::from_hdu(&hdu);
        if header.naxis() < min_axes as i64 {
            tracing::debug!(
                "{} HDU {} has NAXIS={}, skipping",
                path.display(),
                index,
                header.naxis()
            );
            continue;
        }

        let (shape, data) = read_pixels(&mut hdu, &header).map_err(|reason| {
            Error::load(path, format!("HDU {}: {}", index, reason))
        })?;

        let expected: usize = shape.iter().product();
        if shape.len() < min_axes || shape.iter().any(|&n| n == 0) || data.len() < expected {
            return Err(Error::load(
                path,
                format!("HDU {} has inconsistent shape {:?}", index, shape),
            ));
        }

        if index > 0 {
            tracing::info!("Using extension {} of {}", index, path.display());
        }
        return Ok(RawHdu {
            index,
            header,
            shape,
            data,
        });
    }

    Err(Error::load(
        path,
        format!("no HDU with {}-dimensional data ({} selection)", min_axes, selection),
    ))
}

fn check_signature(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| Error::load(path, e.to_string()))?;
    let mut card = [0u8; 30];
    file.read_exact(&mut card)
        .map_err(|_| Error::load(path, "file is too short to be FITS"))?;

    let keyword = std::str::from_utf8(&card[..8]).unwrap_or("").trim_end();
    let value = std::str::from_utf8(&card[10..30]).unwrap_or("").trim();
    if keyword != "SIMPLE" || card[8] != b'=' || value != "T" {
        return Err(Error::load(path, "not a FITS file (missing SIMPLE = T)"));
    }
    Ok(())
}

fn read_pixels(
    hdu: &mut Hdu,
    header: &Header,
) -> std::result::Result<(Vec<usize>, Vec<f64>), String> {
    let bscale = header.real("BSCALE").unwrap_or(1.0);
    let bzero = header.real("BZERO").unwrap_or(0.0);
    let scaled = |v: f64| v * bscale + bzero;

    #[allow(unreachable_patterns)]
    match hdu.read_data() {
        FitsData::FloatingPoint64(array) => {
            let data = if bscale == 1.0 && bzero == 0.0 {
                array.data.clone()
            } else {
                array.data.iter().map(|&v| scaled(v)).collect()
            };
            Ok((array.shape.clone(), data))
        }
        FitsData::FloatingPoint32(array) => Ok((
            array.shape.clone(),
            array.data.iter().map(|&v| scaled(v as f64)).collect(),
        )),
        FitsData::IntegersI32(array) => Ok((
            array.shape.clone(),
            array
                .data
                .iter()
                .map(|v| v.map(|v| scaled(v as f64)).unwrap_or(f64::NAN))
                .collect(),
        )),
        // BZERO has already been folded into unsigned data
        FitsData::IntegersU32(array) => Ok((
            array.shape.clone(),
            array
                .data
                .iter()
                .map(|v| v.map(|v| v as f64 * bscale).unwrap_or(f64::NAN))
                .collect(),
        )),
        FitsData::Characters(_) => Err("character data is not an image".to_string()),
        _ => Err("unsupported data type".to_string()),
    }
}
