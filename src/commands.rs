use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::{CheckOptions, NgsfOptions};
use crate::config::{CheckConfig, Config};
use crate::fits_image::{load_image, HduSelection};
use crate::inputs::resolve_all;
use crate::models::SkyPosition;
use crate::pipeline::{self, BatchItem, CheckOutcome};
use crate::report::output_stem;
use crate::units::angular::{arcsec_to_parsec, parsec_to_arcsec, AngularMode};
use crate::units::coords::{
    correct_proper_motion, format_hmsdms, format_sexagesimal, parse_position, parse_sexagesimal,
    split_radec, years_since_j2000, CoordFormat,
};
use crate::units::cosmology::{FlatLambdaCdm, CM_PER_PARSEC};
use crate::units::time::{parse_time, Epoch, TimeFormat};
use crate::{ngsf, render, spectrum};

const RULE: &str = "-------------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn output_format(format: &str) -> Result<OutputFormat> {
    match format.trim().to_ascii_lowercase().as_str() {
        "" | "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => bail!("Unknown output format '{}', expected 'text' or 'json'", other),
    }
}

/// Load the configuration file if given, apply command line values and
/// validate the result.
pub fn load_check_config(options: &CheckOptions) -> Result<CheckConfig> {
    let mut config = match &options.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => Config::default(),
    };
    config.merge_with_cli(options.overrides());
    config.resolve().context("Configuration validation failed")
}

fn print_outcome(outcome: &CheckOutcome) {
    let report = &outcome.report;
    println!("{}", RULE);
    println!("File: {}", report.file);
    println!(
        "Model background:   mean={:.3}, std={:.3}",
        report.model_mean, report.model_std
    );
    println!(
        "Clipped background: mean={:.3}, median={:.3}, std={:.3}",
        report.clipped_mean, report.clipped_median, report.clipped_std
    );
    println!(
        "Annulus ({}\"-{}\"): {}th percentile={:.3}, std={:.3}",
        report.r_in, report.r_out, report.annulus_percent, report.annulus_bkg, report.annulus_std
    );
    println!("Model difference:   {:.2} sigma", report.model_diff);
    println!(
        "Clipped difference: {:.2} sigma ({})",
        report.clipped_diff, report.method
    );
    if let Some(table) = &outcome.table_path {
        println!("Table: {}", table.display());
    }
    if let Some(image) = &outcome.image_path {
        println!("Image: {}", image.display());
    }
    for failure in &outcome.failures {
        println!("Warning: {} not produced: {}", failure.effect, failure.error);
    }
}

pub fn check(file: &Path, ra: &str, dec: &str, options: &CheckOptions) -> Result<()> {
    let format = output_format(&options.format)?;
    let config = load_check_config(options)?;
    let position = parse_position(ra, dec).context("Invalid target coordinates")?;

    let outcome = pipeline::check_background(file, position, &config)
        .with_context(|| format!("Background check failed for {}", file.display()))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome.report)?),
        OutputFormat::Text => {
            print_outcome(&outcome);
            if outcome.report.needs_template(config.template_threshold) {
                println!("Template subtraction recommended");
            }
        }
    }
    Ok(())
}

pub fn batch(
    inputs: &[String],
    positions: Option<&Path>,
    ra: Option<&str>,
    dec: Option<&str>,
    summary: Option<&Path>,
    options: &CheckOptions,
) -> Result<()> {
    let format = output_format(&options.format)?;
    let config = load_check_config(options)?;

    let mut items: Vec<BatchItem> = Vec::new();
    if let Some(table) = positions {
        items.extend(
            pipeline::read_positions(table)
                .with_context(|| format!("Failed to read positions from {}", table.display()))?,
        );
    }
    let files = resolve_all(inputs).context("Failed to resolve input files")?;
    match (ra, dec) {
        (Some(ra), Some(dec)) => {
            let position = parse_position(ra, dec).context("Invalid target coordinates")?;
            items.extend(pipeline::items_at(files, position));
        }
        _ if positions.is_some() => {
            // Files given next to a positions table select rows from it
            if !files.is_empty() {
                items.retain(|item| files.iter().any(|f| same_file(f, &item.path)));
            }
        }
        _ => bail!("Batch mode needs either --positions or both --ra and --dec"),
    }

    if items.is_empty() {
        bail!("No images to process");
    }

    let report = pipeline::run_batch(&items, &config);
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = report.reports().collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for result in &report.results {
                if let Ok(outcome) = &result.outcome {
                    print_outcome(outcome);
                }
            }
        }
    }

    if let Some(summary) = summary {
        report
            .write_summary(summary)
            .with_context(|| format!("Failed to write summary table {}", summary.display()))?;
        tracing::info!("Summary table: {}", summary.display());
    }

    if format == OutputFormat::Text {
        println!("{}", RULE);
        println!(
            "Processed {} images: {} succeeded, {} failed",
            report.results.len(),
            report.succeeded(),
            report.failed()
        );
        for (path, error) in report.failures() {
            println!("  {}: {}", path.display(), error);
        }
    }

    if report.failed() > 0 {
        bail!("{} of {} images failed", report.failed(), report.results.len());
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || (a.file_name().is_some() && a.file_name() == b.file_name())
}

pub fn coords(radec: &[String], to: &str) -> Result<()> {
    let format: CoordFormat = to.parse()?;
    let input = radec.join(" ");
    let (ra, dec) = split_radec(&input)?;

    println!("{}", RULE);
    match format {
        CoordFormat::Degrees => {
            let (ra, dec) = parse_sexagesimal(&ra, &dec)?;
            println!("RA DEC (2000): {} {}", ra, dec);
        }
        CoordFormat::Hmsdms => {
            let ra: f64 = ra.parse().with_context(|| format!("Invalid RA in degrees: {}", ra))?;
            let dec: f64 = dec
                .parse()
                .with_context(|| format!("Invalid Dec in degrees: {}", dec))?;
            let position = SkyPosition::new(ra, dec)?;
            println!("RA DEC (2000): {}", format_hmsdms(position.ra, position.dec));
        }
    }
    Ok(())
}

pub fn blind_offset(
    radec: &[String],
    pm_ra: f64,
    pm_dec: f64,
    year: i32,
    month: u32,
) -> Result<()> {
    let input = radec.join(" ");
    let (ra, dec) = split_radec(&input)?;
    let (ra, dec) = parse_sexagesimal(&ra, &dec)?;
    let years = years_since_j2000(year, month)?;
    let correction = correct_proper_motion(SkyPosition::new(ra, dec)?, pm_ra, pm_dec, years)?;

    println!("{}", RULE);
    println!(
        "corrections {:.3} (RA), {:.3} (DEC)",
        correction.ra_seconds, correction.dec_arcsec
    );
    println!("Initial coordinates: {}", input.trim());
    println!(
        "Corrected coordinates: {}",
        format_sexagesimal(&correction.corrected)
    );
    println!("Offset: {:.3} arcsec", correction.offset_arcsec());
    Ok(())
}

pub fn mjd(time: &[String], from: &str) -> Result<()> {
    let format: TimeFormat = from.parse()?;
    let epoch = parse_time(&time.join(" "), format)?;
    println!("{}", RULE);
    println!(
        "ISOT / MJD / JD: {} / {} / {}",
        epoch.isot(),
        epoch.mjd(),
        epoch.jd()
    );
    Ok(())
}

pub fn mjd_now() -> Result<()> {
    let now = Epoch::now();
    println!("JD: {:.2}", now.jd());
    println!("MJD: {:.2}", now.mjd());
    Ok(())
}

pub fn distmod(z: f64, magnitude: Option<f64>, h0: f64, om0: f64) -> Result<()> {
    let cosmology = FlatLambdaCdm::new(h0, om0)?;
    let mu = cosmology.distmod(z)?;
    let distance = cosmology.luminosity_distance_pc(z)?;

    println!("------------------------");
    println!("distance modulus: {:.3} [mag]", mu);
    println!(
        "luminosity distance: {:.3e} [parsec] | {:.3e} [cm]",
        distance,
        distance * CM_PER_PARSEC
    );
    if let Some(m) = magnitude {
        println!("absolute magnitude: {:.3} [mag]", cosmology.absolute_magnitude(m, z)?);
    }
    Ok(())
}

pub fn angular(z: f64, value: f64, mode: &str) -> Result<()> {
    let mode: AngularMode = mode.parse()?;
    let cosmology = FlatLambdaCdm::planck15();

    println!("{}", RULE);
    match mode {
        AngularMode::Arcsec => {
            let distance = arcsec_to_parsec(&cosmology, z, value)?;
            println!("Distance: {} [parsec]", distance);
        }
        AngularMode::Dist => {
            let arcsec = parsec_to_arcsec(&cosmology, z, value)?;
            println!("Arcsec: {}", arcsec);
        }
    }
    Ok(())
}

pub fn fits2ascii(inputs: &[String]) -> Result<()> {
    let files = resolve_all(inputs).context("Failed to resolve input files")?;
    let results = spectrum::convert_all(&files);

    let mut failed = 0;
    for result in &results {
        match &result.output {
            Ok(output) => println!("{}  >  {}", result.input.display(), output.display()),
            Err(_) => {
                println!("{}  failed...", result.input.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} conversions failed", failed, results.len());
    }
    Ok(())
}

/// `<stem>.png` in the working directory.
fn default_plot_path(file: &Path) -> PathBuf {
    PathBuf::from(format!("{}.png", output_stem(file)))
}

pub fn plot(
    file: &Path,
    output: Option<&Path>,
    hdu: &str,
    max_px: u32,
    show_plot: bool,
) -> Result<()> {
    let selection: HduSelection = hdu.parse()?;
    let image = load_image(file, selection)?;
    let frame = render::render_frame(&image, max_px)
        .with_context(|| format!("Failed to render {}", file.display()))?;

    let output = output.map_or_else(|| default_plot_path(file), Path::to_path_buf);
    render::save_gray(&frame, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{}  >  {}", file.display(), output.display());

    if show_plot {
        render::display(&output, None)?;
    }
    Ok(())
}

pub fn ngsf(
    object_to_fit: &str,
    options: &NgsfOptions,
    work_dir: &Path,
    run: bool,
    keep: bool,
    python: &str,
) -> Result<()> {
    let parameters = options.parameters(object_to_fit);
    let workspace = ngsf::write_workspace(&parameters, work_dir)
        .with_context(|| format!("Failed to prepare NGSF files in {}", work_dir.display()))?;
    println!("Parameters: {}", workspace.parameters.display());
    println!("Run script: {}", workspace.run_script.display());
    println!("Peak epochs: {}", workspace.peaks.display());
    if let Some(link) = &workspace.bank_link {
        println!("Template bank: {} -> {}", link.display(), parameters.bank_dir);
    }

    if !run {
        return Ok(());
    }
    let result = ngsf::run(&workspace, python);
    if !keep {
        ngsf::clean(&workspace).context("Failed to remove NGSF working files")?;
    }
    result.context("NGSF fit failed")
}
