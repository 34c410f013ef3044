//! One-dimensional FITS spectra to two-column ASCII.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fits_image::{read_hdu, HduSelection};
use crate::report::output_stem;

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }
}

/// Read the first row of a one- or two-dimensional FITS image as a spectrum.
///
/// The dispersion axis follows `CRVAL1`, `CRPIX1` and `CDELT1` (or `CD1_1`);
/// `DC-FLAG = 1` marks a log-linear axis.
pub fn read_spectrum(path: &Path) -> Result<Spectrum> {
    let hdu = read_hdu(path, HduSelection::Auto, 1)?;
    let length = hdu.shape[0];
    let flux = hdu.data[..length].to_vec();

    let header = &hdu.header;
    let crval = header.real("CRVAL1").unwrap_or(1.0);
    let crpix = header.real("CRPIX1").unwrap_or(1.0);
    let step = header
        .real("CDELT1")
        .or_else(|| header.real("CD1_1"))
        .unwrap_or(1.0);
    let log_linear = header.integer("DC-FLAG") == Some(1);

    if header.real("CRVAL1").is_none() {
        tracing::warn!("{} has no CRVAL1, using pixel numbers as wavelengths", path.display());
    }

    let wavelength = (0..length)
        .map(|i| {
            let w = crval + (i as f64 + 1.0 - crpix) * step;
            if log_linear {
                10f64.powf(w)
            } else {
                w
            }
        })
        .collect();

    Ok(Spectrum { wavelength, flux })
}

/// Write `wavelength flux` rows, one per pixel.
pub fn write_ascii(spectrum: &Spectrum, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (w, f) in spectrum.wavelength.iter().zip(&spectrum.flux) {
        writeln!(writer, "{:.6} {:.8e}", w, f)?;
    }
    writer.flush()?;
    Ok(())
}

/// `<dir>/<stem>.dat` next to the input.
pub fn ascii_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}.dat", output_stem(input)))
}

/// Convert one FITS spectrum and return the path written.
pub fn convert(input: &Path) -> Result<PathBuf> {
    let spectrum = read_spectrum(input)?;
    if spectrum.is_empty() {
        return Err(Error::load(input, "spectrum has no pixels"));
    }
    let output = ascii_path(input);
    write_ascii(&spectrum, &output)?;
    tracing::info!("{} > {}", input.display(), output.display());
    Ok(output)
}

#[derive(Debug)]
pub struct Conversion {
    pub input: PathBuf,
    pub output: Result<PathBuf>,
}

/// Convert every input independently; failures are logged and kept.
pub fn convert_all(inputs: &[PathBuf]) -> Vec<Conversion> {
    inputs
        .iter()
        .map(|input| {
            let output = convert(input);
            if let Err(e) = &output {
                tracing::error!("{} failed: {}", input.display(), e);
            }
            Conversion {
                input: input.clone(),
                output,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};
    use std::fs;
    use tempfile::TempDir;

    const BLOCK: usize = 2880;

    fn card(key: &str, value: &str) -> String {
        format!("{:<8}= {:>20}{:50}", key, value, "")
    }

    fn write_spectrum_fits(path: &Path, flux: &[f64], keywords: &[(&str, &str)]) {
        let mut header = vec![
            card("SIMPLE", "T"),
            card("BITPIX", "-64"),
            card("NAXIS", "1"),
            card("NAXIS1", &flux.len().to_string()),
        ];
        header.extend(keywords.iter().map(|(k, v)| card(k, v)));
        header.push(format!("{:<80}", "END"));

        let mut bytes: Vec<u8> = header.concat().into_bytes();
        bytes.resize(bytes.len().div_ceil(BLOCK) * BLOCK, b' ');
        for &v in flux {
            bytes.write_f64::<BigEndian>(v).unwrap();
        }
        bytes.resize(bytes.len().div_ceil(BLOCK) * BLOCK, 0);
        fs::write(path, bytes).unwrap();
    }

    fn read_back(path: &Path) -> Vec<(f64, f64)> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| {
                let mut parts = line.split_whitespace().map(|p| p.parse::<f64>().unwrap());
                (parts.next().unwrap(), parts.next().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_linear_dispersion() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("sn_spec.fits");
        write_spectrum_fits(
            &input,
            &[1.0, 2.0, 3.0, 4.0],
            &[("CRVAL1", "4000.0"), ("CRPIX1", "1.0"), ("CDELT1", "2.5")],
        );

        let spectrum = read_spectrum(&input).unwrap();
        assert_eq!(spectrum.wavelength, vec![4000.0, 4002.5, 4005.0, 4007.5]);
        assert_eq!(spectrum.flux, vec![1.0, 2.0, 3.0, 4.0]);

        let output = convert(&input).unwrap();
        assert_eq!(output, dir.path().join("sn_spec.dat"));
        let rows = read_back(&output);
        assert_eq!(rows.len(), 4);
        assert!((rows[3].0 - 4007.5).abs() < 1e-6);
        assert!((rows[3].1 - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_log_linear_dispersion_and_reference_pixel() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("log.fits");
        write_spectrum_fits(
            &input,
            &[0.5, 0.5, 0.5],
            &[("CRVAL1", "3.6"), ("CRPIX1", "2.0"), ("CD1_1", "0.1"), ("DC-FLAG", "1")],
        );

        let spectrum = read_spectrum(&input).unwrap();
        let expected = [10f64.powf(3.5), 10f64.powf(3.6), 10f64.powf(3.7)];
        for (got, want) in spectrum.wavelength.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }
    }

    #[test]
    fn test_convert_all_keeps_going() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.fits");
        write_spectrum_fits(&good, &[1.0, 2.0], &[("CRVAL1", "5000.0"), ("CDELT1", "1.0")]);
        let missing = dir.path().join("missing.fits");

        let results = convert_all(&[missing.clone(), good.clone()]);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].output, Err(Error::Load { .. })));
        assert_eq!(results[1].output.as_ref().unwrap(), &dir.path().join("good.dat"));
    }

    #[test]
    fn test_ascii_path() {
        assert_eq!(ascii_path(Path::new("/d/a.fits")), PathBuf::from("/d/a.dat"));
        assert_eq!(ascii_path(Path::new("b.fit")), PathBuf::from("b.dat"));
    }
}
