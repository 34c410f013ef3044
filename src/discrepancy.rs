use crate::error::{Error, Result};
use crate::models::{
    BackgroundEstimate, ComparisonMethod, DiscrepancyReport, Provenance, SkyPosition,
};

/// Distance between a local level and a global estimate, in units of the
/// global standard deviation.
///
/// The background model only exposes a mean, so `method` only matters for
/// estimates that carry a median.
pub fn score(
    local: &BackgroundEstimate,
    global: &BackgroundEstimate,
    method: ComparisonMethod,
) -> Result<f64> {
    if !global.std.is_finite() || global.std <= 0.0 {
        return Err(Error::DegenerateBackground {
            provenance: global.provenance,
            std: global.std,
        });
    }
    Ok((local.level() - global.reference(method)).abs() / global.std)
}

/// Inputs of one background check, kept together for the report row.
#[derive(Debug, Clone, Copy)]
pub struct Comparison<'a> {
    pub file: &'a str,
    pub position: SkyPosition,
    pub r_in: f64,
    pub r_out: f64,
    pub method: ComparisonMethod,
    pub model: &'a BackgroundEstimate,
    pub clipped: &'a BackgroundEstimate,
    pub local: &'a BackgroundEstimate,
}

impl DiscrepancyReport {
    /// Score the local estimate against both global estimates and collect
    /// every raw statistic into one row.
    pub fn assemble(comparison: Comparison<'_>) -> Result<Self> {
        let Comparison {
            file,
            position,
            r_in,
            r_out,
            method,
            model,
            clipped,
            local,
        } = comparison;

        debug_assert_eq!(model.provenance, Provenance::Model);
        debug_assert_eq!(clipped.provenance, Provenance::Clipped);

        let model_diff = score(local, model, ComparisonMethod::Mean)?;
        let clipped_diff = score(local, clipped, method)?;

        Ok(Self {
            file: file.to_string(),
            ra: position.ra,
            dec: position.dec,
            r_in,
            r_out,
            method,
            model_diff,
            clipped_diff,
            model_mean: model.mean,
            model_std: model.std,
            clipped_mean: clipped.mean,
            clipped_median: clipped.median.unwrap_or(clipped.mean),
            clipped_std: clipped.std,
            annulus_bkg: local.level(),
            annulus_std: local.std,
            annulus_percent: local.percentile.map(|p| p.percent).unwrap_or(f64::NAN),
        })
    }
}
