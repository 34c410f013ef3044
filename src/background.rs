//! Global and local background estimation.
//!
//! Three independent estimators:
//! - [`global_background`]: tiled source-extraction style background model
//! - [`global_stats`]: whole-image sigma-clipped statistics
//! - [`local_stats`]: statistics of the pixels inside an annulus around a target
//!
//! Non-finite pixels are excluded from every estimate.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fits_image::Image;
use crate::models::{Annulus, BackgroundEstimate, PercentileLevel, Provenance};
use crate::stats;

/// Parameters of the tiled background model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    /// Tile edge length in pixels
    pub mesh_size: usize,
    /// Median filter window over the tile grid (odd)
    pub filter_size: usize,
    /// Clipping threshold used inside each tile
    pub clip_sigma: f64,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            mesh_size: 64,
            filter_size: 3,
            clip_sigma: 3.0,
        }
    }
}

/// Parameters of the whole-image sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipParams {
    pub sigma: f64,
    /// `None` iterates until no more pixels are rejected
    pub max_iters: Option<usize>,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iters: Some(5),
        }
    }
}

/// Background level and noise of one tile, `None` when the tile is unusable.
fn tile_background(samples: &[f64], area: usize, clip_sigma: f64) -> Option<(f64, f64)> {
    // Tiles dominated by masked or blank pixels do not describe the sky
    if samples.len() * 2 < area {
        return None;
    }
    let clipped = stats::sigma_clipped_stats(samples, clip_sigma, None)?;

    // Mode estimate, falling back to the median for crowded tiles
    let level = if clipped.std > 0.0 && (clipped.mean - clipped.median) / clipped.std < 0.3 {
        2.5 * clipped.median - 1.5 * clipped.mean
    } else {
        clipped.median
    };
    Some((level, clipped.std))
}

/// Global background from a tiled background model.
///
/// The image is split into `mesh_size` tiles; each tile's level is a
/// clipped mode estimate and its noise the clipped standard deviation.
/// Unusable tiles take the values of the nearest usable tile, both grids are
/// median filtered, and the global level and noise are the medians of the
/// filtered grids.
pub fn global_background(image: &Image, params: &MeshParams) -> Result<BackgroundEstimate> {
    let mesh = params.mesh_size.max(1);
    let (width, height) = (image.width, image.height);
    let nx = width.div_ceil(mesh);
    let ny = height.div_ceil(mesh);

    let mut levels: Vec<Option<(f64, f64)>> = Vec::with_capacity(nx * ny);
    let mut finite_pixels = 0;
    let mut samples = Vec::with_capacity(mesh * mesh);

    for ty in 0..ny {
        let y0 = ty * mesh;
        let y1 = (y0 + mesh).min(height);
        for tx in 0..nx {
            let x0 = tx * mesh;
            let x1 = (x0 + mesh).min(width);

            samples.clear();
            for y in y0..y1 {
                samples.extend(image.row(y)[x0..x1].iter().copied().filter(|v| v.is_finite()));
            }
            finite_pixels += samples.len();
            levels.push(tile_background(&samples, (y1 - y0) * (x1 - x0), params.clip_sigma));
        }
    }

    if levels.iter().all(Option::is_none) {
        return Err(Error::DegenerateBackground {
            provenance: Provenance::Model,
            std: f64::NAN,
        });
    }

    let filled = fill_from_nearest(&levels, nx, ny);
    let back: Vec<f64> = filled.iter().map(|&(level, _)| level).collect();
    let sigma: Vec<f64> = filled.iter().map(|&(_, sigma)| sigma).collect();

    let back = median_filter(&back, nx, ny, params.filter_size);
    let sigma = median_filter(&sigma, nx, ny, params.filter_size);

    let mean = stats::median(&back).unwrap_or(f64::NAN);
    let std = stats::median(&sigma).unwrap_or(f64::NAN);

    tracing::debug!(
        "Background model: {}x{} tiles of {} px, level={:.3}, rms={:.3}",
        nx,
        ny,
        mesh,
        mean,
        std
    );

    Ok(BackgroundEstimate {
        provenance: Provenance::Model,
        mean,
        median: None,
        std,
        percentile: None,
        pixels: finite_pixels,
    })
}

/// Replace unusable tiles by the nearest usable tile (Manhattan distance).
fn fill_from_nearest(levels: &[Option<(f64, f64)>], nx: usize, ny: usize) -> Vec<(f64, f64)> {
    let mut filled = Vec::with_capacity(levels.len());
    for cy in 0..ny {
        for cx in 0..nx {
            if let Some(value) = levels[cy * nx + cx] {
                filled.push(value);
                continue;
            }
            let nearest = levels
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (cx.abs_diff(i % nx) + cy.abs_diff(i / nx), v)))
                .min_by_key(|&(distance, _)| distance)
                .map(|(_, v)| v);
            // at least one tile is usable, checked by the caller
            filled.push(nearest.unwrap_or((f64::NAN, f64::NAN)));
        }
    }
    filled
}

fn median_filter(grid: &[f64], nx: usize, ny: usize, size: usize) -> Vec<f64> {
    if size <= 1 {
        return grid.to_vec();
    }
    let half = size / 2;
    let mut window = Vec::with_capacity(size * size);
    let mut out = Vec::with_capacity(grid.len());
    for cy in 0..ny {
        for cx in 0..nx {
            window.clear();
            for sy in cy.saturating_sub(half)..(cy + half + 1).min(ny) {
                for sx in cx.saturating_sub(half)..(cx + half + 1).min(nx) {
                    window.push(grid[sy * nx + sx]);
                }
            }
            out.push(stats::median(&window).unwrap_or(grid[cy * nx + cx]));
        }
    }
    out
}

/// Sigma-clipped mean, median and standard deviation of the whole image.
pub fn global_stats(image: &Image, params: &ClipParams) -> Result<BackgroundEstimate> {
    let clipped = stats::sigma_clipped_stats(&image.data, params.sigma, params.max_iters).ok_or(
        Error::DegenerateBackground {
            provenance: Provenance::Clipped,
            std: f64::NAN,
        },
    )?;

    tracing::debug!(
        "Sigma-clipped stats after {} iterations: {} of {} pixels kept",
        clipped.iterations,
        clipped.retained,
        image.data.len()
    );

    Ok(BackgroundEstimate {
        provenance: Provenance::Clipped,
        mean: clipped.mean,
        median: Some(clipped.median),
        std: clipped.std,
        percentile: None,
        pixels: clipped.retained,
    })
}

/// Pixel-space geometry of an annulus on a particular image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelAnnulus {
    pub x: f64,
    pub y: f64,
    pub r_in: f64,
    pub r_out: f64,
}

impl PixelAnnulus {
    /// Project a sky annulus onto the image through its WCS.
    pub fn project(image: &Image, annulus: &Annulus) -> Result<Self> {
        let wcs = image.require_wcs()?;
        let (x, y) = wcs
            .sky_to_pixel(annulus.center.ra, annulus.center.dec)
            .ok_or_else(|| {
                Error::Wcs(format!(
                    "RA={} Dec={} cannot be projected onto {}",
                    annulus.center.ra,
                    annulus.center.dec,
                    image.path.display()
                ))
            })?;
        let scale = wcs.pixel_scale_arcsec();
        Ok(Self {
            x,
            y,
            r_in: annulus.r_in / scale,
            r_out: annulus.r_out / scale,
        })
    }

    /// Values of the pixels whose centres lie inside the ring, edges inclusive.
    pub fn collect(&self, image: &Image) -> Vec<f64> {
        let reach = self.r_out.ceil() as isize;
        let (cx, cy) = (self.x.round() as isize, self.y.round() as isize);
        let x_min = (cx - reach).max(0);
        let x_max = (cx + reach + 1).min(image.width as isize);
        let y_min = (cy - reach).max(0);
        let y_max = (cy + reach + 1).min(image.height as isize);

        let (r_in_sq, r_out_sq) = (self.r_in * self.r_in, self.r_out * self.r_out);
        let mut values = Vec::new();
        for y in y_min..y_max {
            for x in x_min..x_max {
                let dx = x as f64 - self.x;
                let dy = y as f64 - self.y;
                let d_sq = dx * dx + dy * dy;
                if d_sq >= r_in_sq && d_sq <= r_out_sq {
                    values.push(image.pixel(x as usize, y as usize));
                }
            }
        }
        values
    }
}

/// Background statistics inside an annulus around a sky position.
///
/// The representative level is the `percent` percentile of the enclosed
/// pixels rather than their mean, so a bright source spilling into the ring
/// raises the level instead of being averaged away.
pub fn local_stats(image: &Image, annulus: &Annulus, percent: f64) -> Result<BackgroundEstimate> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(Error::invalid(format!(
            "Percentile must be within [0, 100], got: {}",
            percent
        )));
    }

    let ring = PixelAnnulus::project(image, annulus)?;
    let values = stats::finite_values(&ring.collect(image));

    let empty = || Error::EmptyAnnulus {
        ra: annulus.center.ra,
        dec: annulus.center.dec,
        r_in: annulus.r_in,
        r_out: annulus.r_out,
    };
    let level = stats::percentile(&values, percent).ok_or_else(empty)?;
    let mean = stats::mean(&values).ok_or_else(empty)?;

    tracing::debug!(
        "Annulus at pixel ({:.2}, {:.2}), radii {:.2}-{:.2} px: {} pixels",
        ring.x,
        ring.y,
        ring.r_in,
        ring.r_out,
        values.len()
    );

    Ok(BackgroundEstimate {
        provenance: Provenance::Annulus,
        mean,
        median: stats::median(&values),
        std: stats::std_dev(&values).unwrap_or(0.0),
        percentile: Some(PercentileLevel {
            percent,
            value: level,
        }),
        pixels: values.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SkyPosition;
    use crate::wcs::Wcs;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const RA: f64 = 150.0;
    const DEC: f64 = 2.0;

    fn noise_image(size: usize, mean: f64, sigma: f64, seed: u64) -> Image {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..size * size)
            .map(|_| {
                let u1: f64 = rng.random::<f64>().max(1e-15);
                let u2: f64 = rng.random();
                mean + sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
            .collect();
        let center = (size as f64 + 1.0) / 2.0;
        let wcs = Wcs::from_scale((center, center), (RA, DEC), 1.0).unwrap();
        Image::from_pixels(size, size, data, Some(wcs)).unwrap()
    }

    fn add_source(image: &mut Image, x0: f64, y0: f64, radius: f64, value: f64) {
        for y in 0..image.height {
            for x in 0..image.width {
                let d = ((x as f64 - x0).powi(2) + (y as f64 - y0).powi(2)).sqrt();
                if d <= radius {
                    image.data[y * image.width + x] = value;
                }
            }
        }
    }

    fn annulus(r_in: f64, r_out: f64) -> Annulus {
        Annulus::new(SkyPosition::new(RA, DEC).unwrap(), r_in, r_out).unwrap()
    }

    #[test]
    fn test_estimators_agree_on_pure_background() {
        let image = noise_image(256, 100.0, 5.0, 1);
        let model = global_background(&image, &MeshParams::default()).unwrap();
        let clipped = global_stats(&image, &ClipParams::default()).unwrap();

        assert_eq!(model.provenance, Provenance::Model);
        assert_eq!(clipped.provenance, Provenance::Clipped);
        assert!(model.median.is_none());
        assert!((model.mean - 100.0).abs() < 1.0, "model {}", model.mean);
        assert!((clipped.mean - 100.0).abs() < 0.5, "clipped {}", clipped.mean);
        assert!((model.mean - clipped.mean).abs() < 1.0);
        assert!((model.std - 5.0).abs() < 0.5, "model rms {}", model.std);
        assert!((clipped.std - 5.0).abs() < 0.5, "clipped std {}", clipped.std);
    }

    #[test]
    fn test_estimators_resist_bright_region() {
        let mut image = noise_image(256, 100.0, 5.0, 2);
        add_source(&mut image, 60.0, 140.0, 10.0, 1000.0);

        let model = global_background(&image, &MeshParams::default()).unwrap();
        let clipped = global_stats(&image, &ClipParams::default()).unwrap();
        assert!((model.mean - 100.0).abs() < 2.0, "model {}", model.mean);
        assert!((clipped.mean - 100.0).abs() < 1.0, "clipped {}", clipped.mean);
        assert!(clipped.pixels < image.data.len());
    }

    #[test]
    fn test_local_level_matches_global_on_background() {
        let image = noise_image(200, 100.0, 5.0, 3);
        let global = global_stats(&image, &ClipParams::default()).unwrap();
        let local = local_stats(&image, &annulus(5.0, 15.0), 50.0).unwrap();

        assert_eq!(local.provenance, Provenance::Annulus);
        assert!(local.pixels > 500);
        assert!((local.level() - global.mean).abs() < global.std);

        let p90 = local_stats(&image, &annulus(5.0, 15.0), 90.0).unwrap();
        assert!(p90.level() > local.level());
        assert!((p90.level() - global.mean).abs() < 2.0 * global.std);
    }

    #[test]
    fn test_local_stats_sees_bright_source() {
        let mut image = noise_image(100, 100.0, 5.0, 4);
        // the WCS reference pixel sits at the array centre (49.5, 49.5)
        add_source(&mut image, 49.5, 49.5, 8.0, 1000.0);
        let local = local_stats(&image, &annulus(3.0, 6.0), 90.0).unwrap();
        assert!((local.level() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_annulus_pixel_count() {
        let image = noise_image(100, 0.0, 1.0, 5);
        let ring = PixelAnnulus::project(&image, &annulus(3.0, 6.0)).unwrap();
        assert!((ring.x - 49.5).abs() < 1e-6);
        assert!((ring.r_out - 6.0).abs() < 1e-9);
        let count = ring.collect(&image).len() as f64;
        let expected = std::f64::consts::PI * (36.0 - 9.0);
        assert!((count - expected).abs() < 12.0, "count {}", count);
    }

    #[test]
    fn test_non_finite_pixels_are_excluded() {
        let reference = noise_image(128, 100.0, 5.0, 6);
        let masked: Vec<usize> = (0..reference.data.len()).step_by(37).collect();

        let mut with_nan = reference.clone();
        let mut with_inf = reference.clone();
        for (n, &i) in masked.iter().enumerate() {
            with_nan.data[i] = f64::NAN;
            with_inf.data[i] = if n % 2 == 0 { f64::INFINITY } else { f64::NEG_INFINITY };
        }

        let clip = ClipParams::default();
        let a = global_stats(&with_nan, &clip).unwrap();
        let b = global_stats(&with_inf, &clip).unwrap();
        assert_eq!(a, b);

        let removed: Vec<f64> = reference
            .data
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 37 != 0)
            .map(|(_, v)| *v)
            .collect();
        let direct = stats::sigma_clipped_stats(&removed, clip.sigma, clip.max_iters).unwrap();
        assert_eq!(a.mean, direct.mean);
        assert_eq!(a.median, Some(direct.median));
        assert_eq!(a.std, direct.std);

        let mesh = MeshParams::default();
        assert_eq!(
            global_background(&with_nan, &mesh).unwrap(),
            global_background(&with_inf, &mesh).unwrap()
        );

        let ring = annulus(3.0, 20.0);
        let local_nan = local_stats(&with_nan, &ring, 90.0).unwrap();
        let local_inf = local_stats(&with_inf, &ring, 90.0).unwrap();
        assert_eq!(local_nan, local_inf);
        assert!(local_nan.level().is_finite());
    }

    #[test]
    fn test_mostly_blank_tiles_are_filled() {
        let mut image = noise_image(128, 50.0, 2.0, 7);
        // blank out the lower-left tile entirely
        for y in 0..64 {
            for x in 0..64 {
                image.data[y * 128 + x] = f64::NAN;
            }
        }
        let model = global_background(&image, &MeshParams::default()).unwrap();
        assert!((model.mean - 50.0).abs() < 1.0);
        assert_eq!(model.pixels, 128 * 128 - 64 * 64);
    }

    #[test]
    fn test_all_blank_image_is_degenerate() {
        let image = Image::from_pixels(10, 10, vec![f64::NAN; 100], None).unwrap();
        assert!(matches!(
            global_background(&image, &MeshParams::default()),
            Err(Error::DegenerateBackground { .. })
        ));
        assert!(matches!(
            global_stats(&image, &ClipParams::default()),
            Err(Error::DegenerateBackground { .. })
        ));
    }

    #[test]
    fn test_local_stats_errors() {
        let image = noise_image(50, 10.0, 1.0, 8);
        assert!(matches!(
            local_stats(&image, &annulus(3.0, 6.0), 120.0),
            Err(Error::InvalidParameter(_))
        ));

        let far = Annulus::new(SkyPosition::new(RA + 1.0, DEC).unwrap(), 3.0, 6.0).unwrap();
        assert!(matches!(
            local_stats(&image, &far, 90.0),
            Err(Error::EmptyAnnulus { .. })
        ));

        let no_wcs = Image::from_pixels(10, 10, vec![1.0; 100], None).unwrap();
        assert!(matches!(
            local_stats(&no_wcs, &annulus(3.0, 6.0), 90.0),
            Err(Error::Wcs(_))
        ));
    }

    #[test]
    fn test_median_filter_removes_single_outlier_tile() {
        let mut grid = vec![1.0; 9];
        grid[4] = 100.0;
        let filtered = median_filter(&grid, 3, 3, 3);
        assert_eq!(filtered[4], 1.0);
        assert_eq!(median_filter(&grid, 3, 3, 1), grid);
    }
}
