pub mod background;
pub mod cli;
pub mod commands;
pub mod config;
pub mod discrepancy;
pub mod error;
pub mod fits_image;
pub mod inputs;
pub mod models;
pub mod ngsf;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod spectrum;
pub mod stats;
pub mod units;
pub mod wcs;

// Main entry point
pub mod cli_main;

// Re-export commonly used items
pub use config::{CheckConfig, Config};
pub use error::{Error, Result};
pub use fits_image::{load_image, HduSelection, Image};
pub use models::{
    Annulus, BackgroundEstimate, ComparisonMethod, DiscrepancyReport, Provenance, SkyPosition,
};
pub use pipeline::{check_background, run_batch, BatchItem, BatchReport, CheckOutcome};
