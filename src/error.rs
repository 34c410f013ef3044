use std::path::PathBuf;

use thiserror::Error;

use crate::models::Provenance;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// File missing, unreadable, or not a usable image container.
    #[error("Failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// Rejected at the boundary, before any computation or image I/O.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Degenerate {provenance} background: standard deviation is {std}")]
    DegenerateBackground { provenance: Provenance, std: f64 },

    #[error(
        "Annulus {r_in}\"-{r_out}\" around RA={ra:.6} Dec={dec:.6} contains no finite pixels"
    )]
    EmptyAnnulus {
        ra: f64,
        dec: f64,
        r_in: f64,
        r_out: f64,
    },

    #[error("WCS error: {0}")]
    Wcs(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidParameter(message.into())
    }

    /// Short, stable category name used in batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Load { .. } => "load",
            Error::InvalidParameter(_) => "invalid-parameter",
            Error::DegenerateBackground { .. } => "degenerate-background",
            Error::EmptyAnnulus { .. } => "empty-annulus",
            Error::Wcs(_) => "wcs",
            Error::Parse(_) => "parse",
            Error::Io(_) => "io",
            Error::Csv(_) => "csv",
            Error::Image(_) => "image",
            Error::Json(_) => "json",
        }
    }
}
