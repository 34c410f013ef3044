use bkg_check::config::{CheckConfig, Config};
use bkg_check::fits_image::{load_image, HduSelection};
use bkg_check::models::{ComparisonMethod, Provenance, SkyPosition};
use bkg_check::pipeline::{check_background, run_batch, BatchItem, SideEffect};
use bkg_check::report::read_reports;
use bkg_check::wcs::Wcs;
use bkg_check::Error;
use byteorder::{BigEndian, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BLOCK: usize = 2880;
const SIZE: usize = 100;
const CRVAL: (f64, f64) = (150.0, 2.0);
const SCALE_DEG: f64 = 1.0 / 3600.0;

fn card(key: &str, value: &str) -> String {
    format!("{:<8}= {:>20}{:50}", key, value, "")
}

fn text_card(key: &str, value: &str) -> String {
    format!("{:<8}= {:<70}", key, format!("'{:<8}'", value))
}

fn padded(cards: Vec<String>, fill: u8) -> Vec<u8> {
    let mut bytes = cards.concat().into_bytes();
    bytes.extend(format!("{:<80}", "END").into_bytes());
    bytes.resize(bytes.len().div_ceil(BLOCK) * BLOCK, fill);
    bytes
}

fn data_block(pixels: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(pixels.len() * 8);
    for &v in pixels {
        bytes.write_f64::<BigEndian>(v).unwrap();
    }
    bytes.resize(bytes.len().div_ceil(BLOCK) * BLOCK, 0);
    bytes
}

fn image_cards(width: usize, height: usize, with_wcs: bool) -> Vec<String> {
    let mut cards = vec![
        card("BITPIX", "-64"),
        card("NAXIS", "2"),
        card("NAXIS1", &width.to_string()),
        card("NAXIS2", &height.to_string()),
    ];
    if with_wcs {
        cards.extend([
            text_card("CTYPE1", "RA---TAN"),
            text_card("CTYPE2", "DEC--TAN"),
            card("CRPIX1", &format!("{:.1}", (width as f64 + 1.0) / 2.0)),
            card("CRPIX2", &format!("{:.1}", (height as f64 + 1.0) / 2.0)),
            card("CRVAL1", &format!("{:.6}", CRVAL.0)),
            card("CRVAL2", &format!("{:.6}", CRVAL.1)),
            card("CD1_1", &format!("{:.15}", -SCALE_DEG)),
            card("CD1_2", "0.0"),
            card("CD2_1", "0.0"),
            card("CD2_2", &format!("{:.15}", SCALE_DEG)),
        ]);
    }
    cards
}

/// Single-HDU image with pixels in the primary array.
fn write_primary_image(path: &Path, width: usize, height: usize, pixels: &[f64], with_wcs: bool) {
    let mut cards = vec![card("SIMPLE", "T")];
    cards.extend(image_cards(width, height, with_wcs));
    let mut bytes = padded(cards, b' ');
    bytes.extend(data_block(pixels));
    fs::write(path, bytes).unwrap();
}

/// Empty primary HDU followed by an image extension.
fn write_extension_image(path: &Path, width: usize, height: usize, pixels: &[f64]) {
    let primary = vec![
        card("SIMPLE", "T"),
        card("BITPIX", "8"),
        card("NAXIS", "0"),
        card("EXTEND", "T"),
    ];
    let mut extension = vec![text_card("XTENSION", "IMAGE")];
    extension.extend(image_cards(width, height, true));
    extension.extend([card("PCOUNT", "0"), card("GCOUNT", "1")]);

    let mut bytes = padded(primary, b' ');
    bytes.extend(padded(extension, b' '));
    bytes.extend(data_block(pixels));
    fs::write(path, bytes).unwrap();
}

/// Gaussian sky with an optional flat-topped bright source at the image centre.
fn sky(seed: u64, mean: f64, sigma: f64, source: Option<(f64, f64)>) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centre = (SIZE as f64 - 1.0) / 2.0;
    let mut pixels = Vec::with_capacity(SIZE * SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let (dx, dy) = (x as f64 - centre, y as f64 - centre);
            match source {
                Some((level, radius)) if dx * dx + dy * dy <= radius * radius => pixels.push(level),
                _ => {
                    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
                    let u2: f64 = rng.random();
                    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                    pixels.push(mean + sigma * z);
                }
            }
        }
    }
    pixels
}

fn target() -> SkyPosition {
    SkyPosition::new(CRVAL.0, CRVAL.1).unwrap()
}

/// Sky position `offset` pixels to the right of the image centre.
fn offset_target(offset: f64) -> SkyPosition {
    let crpix = (SIZE as f64 + 1.0) / 2.0;
    let wcs = Wcs::from_scale((crpix, crpix), CRVAL, 1.0).unwrap();
    let centre = (SIZE as f64 - 1.0) / 2.0;
    let (ra, dec) = wcs.pixel_to_sky(centre + offset, centre);
    SkyPosition::new(ra, dec).unwrap()
}

fn quiet_config(dest: &Path) -> CheckConfig {
    CheckConfig {
        show_plot: false,
        dest_dir: dest.to_path_buf(),
        ..CheckConfig::default()
    }
}

#[test]
fn test_bright_annulus_is_flagged_and_reported() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("sn2024abc_r.fits");
    write_primary_image(&frame, SIZE, SIZE, &sky(1, 100.0, 5.0, Some((1000.0, 10.0))), true);
    let out = dir.path().join("out");

    let outcome = check_background(&frame, target(), &quiet_config(&out)).unwrap();
    let report = &outcome.report;

    assert_eq!(report.file, "sn2024abc_r.fits");
    assert_eq!(report.method, ComparisonMethod::Mean);
    assert_eq!(report.annulus_bkg, 1000.0);
    assert!(report.clipped_diff > 3.0, "clipped diff {}", report.clipped_diff);
    assert!(report.model_diff > 3.0, "model diff {}", report.model_diff);
    assert!((report.clipped_mean - 100.0).abs() < 1.0);
    assert!((report.model_mean - 100.0).abs() < 2.0);
    assert!(report.needs_template(3.0));

    let table = outcome.table_path.clone().unwrap();
    assert_eq!(table, out.join("bkg_sn2024abc_r.csv"));
    assert_eq!(read_reports(&table).unwrap(), vec![report.clone()]);

    let image = outcome.image_path.clone().unwrap();
    assert_eq!(image, out.join("bkg_sn2024abc_r.jpg"));
    assert!(fs::metadata(&image).unwrap().len() > 0);
    assert!(outcome.failures.is_empty());
}

#[test]
fn test_unwritable_table_keeps_image() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("blocked.fits");
    write_primary_image(&frame, SIZE, SIZE, &sky(7, 100.0, 5.0, Some((1000.0, 10.0))), true);
    let out = dir.path().join("out");
    fs::create_dir_all(out.join("bkg_blocked.csv")).unwrap();

    let outcome = check_background(&frame, target(), &quiet_config(&out)).unwrap();
    assert_eq!(outcome.report.file, "blocked.fits");
    assert!(outcome.table_path.is_none());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].effect, SideEffect::Table);

    let image = outcome.image_path.unwrap();
    assert_eq!(image, out.join("bkg_blocked.jpg"));
    assert!(fs::metadata(&image).unwrap().len() > 0);
}

#[test]
fn test_unwritable_image_keeps_table() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("blocked.fits");
    write_primary_image(&frame, SIZE, SIZE, &sky(8, 100.0, 5.0, Some((1000.0, 10.0))), true);
    let out = dir.path().join("out");
    fs::create_dir_all(out.join("bkg_blocked.jpg")).unwrap();

    let outcome = check_background(&frame, target(), &quiet_config(&out)).unwrap();
    assert!(outcome.image_path.is_none());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].effect, SideEffect::Image);

    let table = outcome.table_path.clone().unwrap();
    assert_eq!(table, out.join("bkg_blocked.csv"));
    assert_eq!(read_reports(&table).unwrap(), vec![outcome.report]);
}

#[test]
fn test_quiet_sky_is_consistent() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("field.fits");
    write_primary_image(&frame, SIZE, SIZE, &sky(2, 100.0, 5.0, Some((1000.0, 10.0))), true);

    let config = CheckConfig {
        method: ComparisonMethod::Median,
        ..quiet_config(dir.path())
    };
    let outcome = check_background(&frame, offset_target(30.0), &config).unwrap();
    assert!(outcome.report.clipped_diff < 3.0, "{:?}", outcome.report);
    assert!(outcome.report.model_diff < 3.0, "{:?}", outcome.report);
    assert!(!outcome.report.needs_template(3.0));
}

#[test]
fn test_unsupported_method_rejected_before_io() {
    let mut config = Config::default();
    config.annulus.method = Some("mode".to_string());
    assert!(matches!(config.resolve(), Err(Error::InvalidParameter(_))));

    let dir = TempDir::new().unwrap();
    let bad_radii = CheckConfig {
        r_in: 0.0,
        ..quiet_config(dir.path())
    };
    let result = check_background(Path::new("/nonexistent/frame.fits"), target(), &bad_radii);
    assert!(matches!(result, Err(Error::InvalidParameter(_))));
}

#[test]
fn test_missing_file_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let result = check_background(
        &dir.path().join("missing.fits"),
        target(),
        &quiet_config(dir.path()),
    );
    assert!(matches!(result, Err(Error::Load { .. })));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_image_extension_fallback() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("survey.fits");
    write_extension_image(&frame, SIZE, SIZE, &sky(3, 50.0, 2.0, None));

    let image = load_image(&frame, HduSelection::Auto).unwrap();
    assert_eq!(image.hdu_index, 1);
    assert_eq!((image.width, image.height), (SIZE, SIZE));
    assert!(image.wcs.is_some());

    assert!(matches!(
        load_image(&frame, HduSelection::Primary),
        Err(Error::Load { .. })
    ));

    let outcome = check_background(&frame, target(), &quiet_config(dir.path())).unwrap();
    assert!((outcome.report.clipped_mean - 50.0).abs() < 0.5);
}

#[test]
fn test_image_without_wcs() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("raw.fits");
    write_primary_image(&frame, SIZE, SIZE, &sky(4, 100.0, 5.0, None), false);

    let result = check_background(&frame, target(), &quiet_config(dir.path()));
    assert!(matches!(result, Err(Error::Wcs(_))));
}

#[test]
fn test_flat_image_is_degenerate() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("flat.fits");
    write_primary_image(&frame, SIZE, SIZE, &vec![100.0; SIZE * SIZE], true);

    match check_background(&frame, target(), &quiet_config(dir.path())) {
        Err(Error::DegenerateBackground { provenance, std }) => {
            assert_eq!(provenance, Provenance::Model);
            assert_eq!(std, 0.0);
        }
        other => panic!("expected degenerate background, got {:?}", other.map(|o| o.report)),
    }
}

#[test]
fn test_batch_continues_past_failures() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.fits");
    let second = dir.path().join("second.fits");
    write_primary_image(&first, SIZE, SIZE, &sky(5, 100.0, 5.0, Some((1000.0, 10.0))), true);
    write_primary_image(&second, SIZE, SIZE, &sky(6, 100.0, 5.0, None), true);

    let items = vec![
        BatchItem::new(&first, target()),
        BatchItem::new(dir.path().join("missing.fits"), target()),
        BatchItem::new(&second, target()),
    ];
    let out = dir.path().join("out");
    let batch = run_batch(&items, &quiet_config(&out));

    assert_eq!(batch.succeeded(), 2);
    assert_eq!(batch.failed(), 1);
    let failures: Vec<(PathBuf, &'static str)> = batch
        .failures()
        .map(|(path, error)| (path.to_path_buf(), error.kind()))
        .collect();
    assert_eq!(failures, vec![(dir.path().join("missing.fits"), "load")]);

    let summary = out.join("summary.csv");
    batch.write_summary(&summary).unwrap();
    let rows = read_reports(&summary).unwrap();
    let files: Vec<&str> = rows.iter().map(|r| r.file.as_str()).collect();
    assert_eq!(files, ["first.fits", "second.fits"]);
    assert!(out.join("bkg_first.csv").exists());
    assert!(out.join("bkg_second.csv").exists());
}
