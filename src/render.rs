//! Annotated cutout of the target with the background annulus overlaid.

use std::path::{Path, PathBuf};
use std::process::Command;

use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_text_mut, text_size};

use crate::background::PixelAnnulus;
use crate::error::{Error, Result};
use crate::fits_image::Image;
use crate::models::{Annulus, DiscrepancyReport};
use crate::stats;

/// Fonts tried when no explicit font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const ANNULUS_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Largest cutout edge, in image pixels, the renderer will sample.
pub const MAX_CUTOUT_SIDE: usize = 8192;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Field of view of the cutout, in arcminutes
    pub size_arcmin: f64,
    /// Edge length of the rendered image in pixels
    pub output_px: u32,
    pub font: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            size_arcmin: 1.0,
            output_px: 800,
            font: None,
        }
    }
}

/// Statistics text shown in the summary box.
pub fn summary_lines(report: &DiscrepancyReport) -> Vec<String> {
    vec![
        "Background stats".to_string(),
        format!("Model: mean={:.2}, std={:.2}", report.model_mean, report.model_std),
        format!(
            "Clipped: mean={:.2}, median={:.2}, std={:.2}",
            report.clipped_mean, report.clipped_median, report.clipped_std
        ),
        format!(
            "Annulus: percentile ({}%)={:.2}, std={:.2}",
            report.annulus_percent, report.annulus_bkg, report.annulus_std
        ),
        format!(
            "Δ(model): {:.2}σ, Δ(clipped, {}): {:.2}σ",
            report.model_diff, report.method, report.clipped_diff
        ),
    ]
}

/// Arcsinh stretch between the 0.25 and 99.75 percentiles.
fn stretch(values: &[f64]) -> impl Fn(f64) -> u8 {
    let vmin = stats::percentile(values, 0.25).unwrap_or(0.0);
    let vmax = stats::percentile(values, 99.75).unwrap_or(1.0);
    let range = if vmax > vmin { vmax - vmin } else { 1.0 };
    const SOFTENING: f64 = 0.1;
    let norm = (1.0 / SOFTENING).asinh();

    move |v: f64| {
        if !v.is_finite() {
            return 0;
        }
        let t = ((v - vmin) / range).clamp(0.0, 1.0);
        ((t / SOFTENING).asinh() / norm * 255.0).round() as u8
    }
}

/// Edge length in image pixels and half-width of the cutout.
///
/// A cutout wider than twice the image only adds blank border, so the
/// half-width is clamped to the longer image axis.
fn cutout_extent(image: &Image, size_arcmin: f64, scale_arcsec: f64) -> Result<(f64, usize)> {
    let half = (size_arcmin * 60.0 / 2.0 / scale_arcsec)
        .max(4.0)
        .min(image.width.max(image.height).max(4) as f64);
    let side = (2.0 * half).ceil() as usize;
    if side > MAX_CUTOUT_SIDE {
        return Err(Error::invalid(format!(
            "Cutout of {} arcmin spans {} pixels, more than the {} pixel limit",
            size_arcmin, side, MAX_CUTOUT_SIDE
        )));
    }
    Ok((half, side))
}

/// Render a cutout centred on the annulus with FITS y pointing up (north-up
/// when the WCS has no rotation), both radii drawn and the statistics of
/// `report` in a text box.
pub fn render_annulus(
    image: &Image,
    annulus: &Annulus,
    report: &DiscrepancyReport,
    options: &RenderOptions,
) -> Result<RgbImage> {
    if !(options.size_arcmin > 0.0) || options.output_px == 0 {
        return Err(Error::invalid(format!(
            "Cutout size must be positive, got {} arcmin at {} px",
            options.size_arcmin, options.output_px
        )));
    }

    let scale = image.require_wcs()?.pixel_scale_arcsec();
    let (half, side) = cutout_extent(image, options.size_arcmin, scale)?;
    let ring = PixelAnnulus::project(image, annulus)?;

    let x0 = (ring.x - half).round() as i64;
    let y_top = (ring.y + half).round() as i64;

    let mut cutout = Vec::with_capacity(side * side);
    for row in 0..side as i64 {
        let y = y_top - row;
        for col in 0..side as i64 {
            let x = x0 + col;
            let inside =
                x >= 0 && y >= 0 && (x as usize) < image.width && (y as usize) < image.height;
            cutout.push(if inside {
                image.pixel(x as usize, y as usize)
            } else {
                f64::NAN
            });
        }
    }

    let to_gray = stretch(&cutout);
    let side_px = side as u32;
    let gray = GrayImage::from_fn(side_px, side_px, |col, row| {
        Luma([to_gray(cutout[row as usize * side + col as usize])])
    });
    let gray = imageops::resize(&gray, options.output_px, options.output_px, FilterType::Nearest);
    let mut canvas = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let Luma([v]) = *gray.get_pixel(x, y);
        Rgb([v, v, v])
    });

    let zoom = options.output_px as f64 / side as f64;
    let center = (
        ((ring.x - x0 as f64 + 0.5) * zoom).round() as i32,
        ((y_top as f64 - ring.y + 0.5) * zoom).round() as i32,
    );
    for radius in [ring.r_in, ring.r_out] {
        let r = (radius * zoom).round() as i32;
        draw_hollow_circle_mut(&mut canvas, center, r, ANNULUS_COLOR);
        draw_hollow_circle_mut(&mut canvas, center, r + 1, ANNULUS_COLOR);
    }

    match load_font(options.font.as_deref()) {
        Some(font) => draw_summary(&mut canvas, &font, &summary_lines(report)),
        None => tracing::warn!("No usable font found, rendering without the statistics box"),
    }

    Ok(canvas)
}

/// Whole frame in grey levels, linear between mean - std and mean + std of
/// the finite pixels, FITS y up. Frames longer than `max_px` on either axis
/// are scaled down keeping their aspect ratio.
pub fn render_frame(image: &Image, max_px: u32) -> Result<GrayImage> {
    if max_px == 0 {
        return Err(Error::invalid("Rendered frame size must be positive"));
    }
    let (mean, std) = match (stats::mean(&image.data), stats::std_dev(&image.data)) {
        (Some(mean), Some(std)) => (mean, std),
        _ => {
            return Err(Error::load(
                image.path.clone(),
                "frame has no finite pixels to display",
            ))
        }
    };
    let (vmin, vmax) = (mean - std, mean + std);
    let range = if vmax > vmin { vmax - vmin } else { 1.0 };

    let too_large = || {
        Error::invalid(format!(
            "{}x{} frame is too large to render",
            image.width, image.height
        ))
    };
    let width = u32::try_from(image.width).map_err(|_| too_large())?;
    let height = u32::try_from(image.height).map_err(|_| too_large())?;

    let gray = GrayImage::from_fn(width, height, |x, row| {
        let v = image.pixel(x as usize, image.height - 1 - row as usize);
        if !v.is_finite() {
            return Luma([0]);
        }
        Luma([(((v - vmin) / range).clamp(0.0, 1.0) * 255.0).round() as u8])
    });

    let longest = width.max(height);
    if longest <= max_px {
        return Ok(gray);
    }
    let shrink = max_px as f64 / longest as f64;
    let new_w = ((width as f64 * shrink).round() as u32).max(1);
    let new_h = ((height as f64 * shrink).round() as u32).max(1);
    Ok(imageops::resize(&gray, new_w, new_h, FilterType::Triangle))
}

/// Save a grey frame; the format follows the file extension.
pub fn save_gray(frame: &GrayImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    frame.save(path)?;
    tracing::debug!("Saved frame {}", path.display());
    Ok(())
}

fn load_font(explicit: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<&Path> = match explicit {
        Some(path) => vec![path],
        None => SYSTEM_FONTS.iter().map(Path::new).collect(),
    };
    candidates.into_iter().find_map(|path| {
        let bytes = std::fs::read(path).ok()?;
        match FontVec::try_from_vec(bytes) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!("Cannot use font {}: {}", path.display(), e);
                None
            }
        }
    })
}

/// Translucent white box in the lower-left corner holding `lines`.
fn draw_summary(canvas: &mut RgbImage, font: &FontVec, lines: &[String]) {
    let scale = PxScale::from((canvas.height() as f32 / 40.0).max(10.0));
    let line_height = (scale.y * 1.25).ceil() as u32;
    let padding = line_height / 2;
    let text_width = lines
        .iter()
        .map(|line| text_size(scale, font, line).0)
        .max()
        .unwrap_or(0);

    let box_w = (text_width + 2 * padding).min(canvas.width());
    let box_h = (line_height * lines.len() as u32 + 2 * padding).min(canvas.height());
    let left = canvas.width() / 25;
    let top = canvas.height().saturating_sub(box_h + canvas.height() / 25);

    for y in top..(top + box_h).min(canvas.height()) {
        for x in left..(left + box_w).min(canvas.width()) {
            let Rgb([r, g, b]) = *canvas.get_pixel(x, y);
            let blend = |c: u8| (c as f32 * 0.3 + 255.0 * 0.7) as u8;
            canvas.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
        }
    }

    for (i, line) in lines.iter().enumerate() {
        let y = top + padding + i as u32 * line_height;
        draw_text_mut(
            canvas,
            Rgb([0, 0, 0]),
            (left + padding) as i32,
            y as i32,
            scale,
            font,
            line,
        );
    }
}

/// Save the rendering; the format follows the file extension.
pub fn save(canvas: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(path)?;
    tracing::debug!("Saved rendering {}", path.display());
    Ok(())
}

/// Open `path` in an image viewer and wait for it to exit.
pub fn display(path: &Path, viewer: Option<&str>) -> Result<()> {
    let mut command = match viewer {
        Some(program) => Command::new(program),
        None if cfg!(target_os = "macos") => Command::new("open"),
        None if cfg!(target_os = "windows") => {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "/WAIT", ""]);
            command
        }
        None => Command::new("xdg-open"),
    };
    let status = command.arg(path).status()?;
    if !status.success() {
        return Err(Error::Io(std::io::Error::other(format!(
            "Viewer exited with {} for {}",
            status,
            path.display()
        ))));
    }
    Ok(())
}
