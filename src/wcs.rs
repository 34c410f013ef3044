//! World coordinate system for celestial images.
//!
//! Only the gnomonic (TAN) projection is supported, which covers the optical
//! survey and follow-up images this tool is used on. Distortion terms (SIP)
//! are ignored.
//!
//! Pixel coordinates in this module are 0-based array coordinates: the centre
//! of the first pixel is `(0.0, 0.0)`, i.e. FITS pixel `(1, 1)`.

use nalgebra::{Matrix2, Vector2};

use crate::error::{Error, Result};
use crate::fits_image::Header;

#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel, FITS 1-based convention (CRPIX1, CRPIX2)
    pub crpix: (f64, f64),
    /// Reference sky position in degrees (CRVAL1 = RA, CRVAL2 = Dec)
    pub crval: (f64, f64),
    /// Linear transform from pixel offset to intermediate coordinates (degrees)
    pub cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: Matrix2<f64>) -> Result<Self> {
        let cd_inv = cd
            .try_inverse()
            .ok_or_else(|| Error::Wcs(format!("CD matrix is singular: {:?}", cd)))?;
        Ok(Self {
            crpix,
            crval,
            cd,
            cd_inv,
        })
    }

    /// North-up, east-left WCS with a square pixel scale in arcsec/pixel.
    pub fn from_scale(crpix: (f64, f64), crval: (f64, f64), pixel_scale: f64) -> Result<Self> {
        let scale = pixel_scale / 3600.0;
        Self::new(crpix, crval, Matrix2::new(-scale, 0.0, 0.0, scale))
    }

    /// Build the WCS described by a FITS header.
    ///
    /// Returns `Ok(None)` when the header carries no celestial WCS at all and
    /// an error when it carries an incomplete or unsupported one.
    pub fn from_header(header: &Header) -> Result<Option<Self>> {
        let ctype1 = header.text("CTYPE1");
        let ctype2 = header.text("CTYPE2");
        let has_reference = header.real("CRVAL1").is_some() && header.real("CRVAL2").is_some();

        if ctype1.is_none() && !has_reference {
            return Ok(None);
        }

        for ctype in [ctype1, ctype2].into_iter().flatten() {
            let ctype = ctype.trim().to_ascii_uppercase();
            if !(ctype.starts_with("RA") || ctype.starts_with("DEC")) {
                return Ok(None);
            }
            if !ctype.contains("-TAN") {
                return Err(Error::Wcs(format!(
                    "Unsupported projection '{}', only TAN is implemented",
                    ctype
                )));
            }
        }

        let crval = (
            require(header, "CRVAL1")?,
            require(header, "CRVAL2")?,
        );
        let crpix = (require(header, "CRPIX1")?, require(header, "CRPIX2")?);

        let cd = if let (Some(cd11), Some(cd22)) = (header.real("CD1_1"), header.real("CD2_2")) {
            Matrix2::new(
                cd11,
                header.real("CD1_2").unwrap_or(0.0),
                header.real("CD2_1").unwrap_or(0.0),
                cd22,
            )
        } else {
            let cdelt1 = require(header, "CDELT1")?;
            let cdelt2 = require(header, "CDELT2")?;
            let has_pc = ["PC1_1", "PC1_2", "PC2_1", "PC2_2"]
                .iter()
                .any(|key| header.real(key).is_some());

            if has_pc {
                let pc = Matrix2::new(
                    header.real("PC1_1").unwrap_or(1.0),
                    header.real("PC1_2").unwrap_or(0.0),
                    header.real("PC2_1").unwrap_or(0.0),
                    header.real("PC2_2").unwrap_or(1.0),
                );
                Matrix2::from_diagonal(&Vector2::new(cdelt1, cdelt2)) * pc
            } else {
                let (sin_r, cos_r) = header.real("CROTA2").unwrap_or(0.0).to_radians().sin_cos();
                Matrix2::new(
                    cdelt1 * cos_r,
                    -cdelt2 * sin_r,
                    cdelt1 * sin_r,
                    cdelt2 * cos_r,
                )
            }
        };

        Self::new(crpix, crval, cd).map(Some)
    }

    /// Convert 0-based pixel coordinates to (RA, Dec) in degrees.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let offset = Vector2::new(x + 1.0 - self.crpix.0, y + 1.0 - self.crpix.1);
        let intermediate = self.cd * offset;
        let xi = intermediate.x.to_radians();
        let eta = intermediate.y.to_radians();

        let ra0 = self.crval.0.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Convert (RA, Dec) in degrees to 0-based pixel coordinates.
    ///
    /// Returns `None` for positions on the far hemisphere, which the
    /// gnomonic projection cannot represent.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (ra - self.crval.0).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return None;
        }

        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let offset = self.cd_inv * Vector2::new(xi, eta);
        Some((
            self.crpix.0 + offset.x - 1.0,
            self.crpix.1 + offset.y - 1.0,
        ))
    }

    /// Mean of the two axis scales, in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[(0, 0)].powi(2) + self.cd[(1, 0)].powi(2)).sqrt();
        let scale_y = (self.cd[(0, 1)].powi(2) + self.cd[(1, 1)].powi(2)).sqrt();
        (scale_x + scale_y) / 2.0 * 3600.0
    }
}

fn require(header: &Header, key: &str) -> Result<f64> {
    header
        .real(key)
        .ok_or_else(|| Error::Wcs(format!("Missing WCS keyword {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits_image::HeaderValue;

    fn tan_header() -> Header {
        let mut header = Header::default();
        header.insert("CTYPE1", HeaderValue::Text("RA---TAN".into()));
        header.insert("CTYPE2", HeaderValue::Text("DEC--TAN".into()));
        header.insert("CRVAL1", HeaderValue::Real(150.0));
        header.insert("CRVAL2", HeaderValue::Real(2.0));
        header.insert("CRPIX1", HeaderValue::Real(50.5));
        header.insert("CRPIX2", HeaderValue::Real(50.5));
        header
    }

    #[test]
    fn test_round_trip_sky_pixel() {
        let wcs = Wcs::from_scale((50.0, 60.0), (150.0, 2.0), 0.25).unwrap();
        for &(x, y) in &[(0.0, 0.0), (49.0, 59.0), (120.5, 7.25), (300.0, 400.0)] {
            let (ra, dec) = wcs.pixel_to_sky(x, y);
            let (px, py) = wcs.sky_to_pixel(ra, dec).unwrap();
            assert!((px - x).abs() < 1e-6, "x {} -> {}", x, px);
            assert!((py - y).abs() < 1e-6, "y {} -> {}", y, py);
        }
    }

    #[test]
    fn test_reference_pixel_maps_to_reference_value() {
        let wcs = Wcs::from_scale((50.5, 50.5), (10.0, -30.0), 1.0).unwrap();
        let (ra, dec) = wcs.pixel_to_sky(49.5, 49.5);
        assert!((ra - 10.0).abs() < 1e-10);
        assert!((dec + 30.0).abs() < 1e-10);
    }

    #[test]
    fn test_east_is_left() {
        let wcs = Wcs::from_scale((50.0, 50.0), (150.0, 0.0), 1.0).unwrap();
        let (ra_right, _) = wcs.pixel_to_sky(60.0, 49.0);
        assert!(ra_right < 150.0);
        let (_, dec_up) = wcs.pixel_to_sky(49.0, 60.0);
        assert!(dec_up > 0.0);
    }

    #[test]
    fn test_ra_wraps_at_zero() {
        let wcs = Wcs::from_scale((50.0, 50.0), (0.0, 0.0), 1.0).unwrap();
        let (ra, _) = wcs.pixel_to_sky(60.0, 49.0);
        assert!(ra > 359.0 && ra < 360.0);
        let (px, _) = wcs.sky_to_pixel(ra, 0.0).unwrap();
        assert!((px - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_header_cd_matrix() {
        let mut header = tan_header();
        header.insert("CD1_1", HeaderValue::Real(-1.0 / 3600.0));
        header.insert("CD2_2", HeaderValue::Real(1.0 / 3600.0));
        let wcs = Wcs::from_header(&header).unwrap().unwrap();
        assert!((wcs.pixel_scale_arcsec() - 1.0).abs() < 1e-9);
        assert_eq!(wcs.crpix, (50.5, 50.5));
    }

    #[test]
    fn test_from_header_cdelt_pc_and_crota() {
        let mut header = tan_header();
        header.insert("CDELT1", HeaderValue::Real(-0.5 / 3600.0));
        header.insert("CDELT2", HeaderValue::Real(0.5 / 3600.0));
        header.insert("PC1_1", HeaderValue::Real(1.0));
        header.insert("PC2_2", HeaderValue::Real(1.0));
        let with_pc = Wcs::from_header(&header).unwrap().unwrap();
        assert!((with_pc.pixel_scale_arcsec() - 0.5).abs() < 1e-9);

        let mut header = tan_header();
        header.insert("CDELT1", HeaderValue::Real(-0.5 / 3600.0));
        header.insert("CDELT2", HeaderValue::Real(0.5 / 3600.0));
        header.insert("CROTA2", HeaderValue::Real(30.0));
        let rotated = Wcs::from_header(&header).unwrap().unwrap();
        assert!((rotated.pixel_scale_arcsec() - 0.5).abs() < 1e-9);
        assert!((rotated.cd[(1, 0)] - (-0.5 / 3600.0) * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_header_without_wcs() {
        assert!(Wcs::from_header(&Header::default()).unwrap().is_none());
    }

    #[test]
    fn test_from_header_rejects_other_projections() {
        let mut header = tan_header();
        header.insert("CTYPE1", HeaderValue::Text("RA---SIN".into()));
        header.insert("CTYPE2", HeaderValue::Text("DEC--SIN".into()));
        header.insert("CDELT1", HeaderValue::Real(-1.0 / 3600.0));
        header.insert("CDELT2", HeaderValue::Real(1.0 / 3600.0));
        assert!(matches!(Wcs::from_header(&header), Err(Error::Wcs(_))));
    }

    #[test]
    fn test_from_header_missing_scale() {
        let header = tan_header();
        let err = Wcs::from_header(&header).unwrap_err();
        assert!(err.to_string().contains("CDELT1"));
    }

    #[test]
    fn test_singular_matrix() {
        assert!(Wcs::new((1.0, 1.0), (0.0, 0.0), Matrix2::zeros()).is_err());
    }

    #[test]
    fn test_far_hemisphere() {
        let wcs = Wcs::from_scale((50.0, 50.0), (0.0, 0.0), 1.0).unwrap();
        assert!(wcs.sky_to_pixel(180.0, 0.0).is_none());
    }
}
