//! Flat Lambda-CDM distances.

use crate::error::{Error, Result};

/// Speed of light in km/s.
const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;
/// Centimetres per parsec, as used for reporting luminosity distances.
pub const CM_PER_PARSEC: f64 = 3.086e18;
/// Photon density parameter times h^2 at the reference CMB temperature.
const OMEGA_GAMMA_H2: f64 = 2.472_975e-5;
const REFERENCE_TCMB: f64 = 2.7255;
/// Massless neutrino density per effective species relative to photons,
/// 7/8 * (4/11)^(4/3).
const NEUTRINO_PER_SPECIES: f64 = 0.227_107_317_66;
/// Neutrino to photon temperature ratio, (4/11)^(1/3) with the Neff correction.
const TNU_PER_TCMB: f64 = 0.713_765_855_503_608_2;
const BOLTZMANN_EV_PER_K: f64 = 8.617_333_262e-5;
/// Fitting formula for massive neutrino energy density (Komatsu et al. 2011).
const NU_FIT_P: f64 = 1.83;
const NU_FIT_K: f64 = 0.3173;
const SIMPSON_INTERVALS: usize = 2000;

/// Flat universe with matter, radiation (photons and neutrinos) and a
/// cosmological constant closing the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatLambdaCdm {
    /// Hubble constant in km/s/Mpc
    pub h0: f64,
    /// Matter density parameter today
    pub om0: f64,
    /// CMB temperature today in K
    pub tcmb0: f64,
    /// Effective number of neutrino species
    pub neff: f64,
    /// Masses of the three neutrino species in eV
    pub m_nu: [f64; 3],
}

impl Default for FlatLambdaCdm {
    fn default() -> Self {
        Self {
            h0: 70.0,
            om0: 0.3,
            tcmb0: 2.725,
            neff: 3.04,
            m_nu: [0.0; 3],
        }
    }
}

impl FlatLambdaCdm {
    pub fn new(h0: f64, om0: f64) -> Result<Self> {
        let cosmology = Self {
            h0,
            om0,
            ..Self::default()
        };
        cosmology.validate()?;
        Ok(cosmology)
    }

    /// Planck 2015 parameters (Planck Collaboration XIII, Table 4, last
    /// column), with one massive neutrino of 0.06 eV.
    pub fn planck15() -> Self {
        Self {
            h0: 67.74,
            om0: 0.3075,
            tcmb0: 2.7255,
            neff: 3.046,
            m_nu: [0.0, 0.0, 0.06],
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.h0 > 0.0) || !self.h0.is_finite() {
            return Err(Error::invalid(format!("H0 must be positive, got: {}", self.h0)));
        }
        if !(0.0..=1.0).contains(&self.om0) {
            return Err(Error::invalid(format!(
                "Om0 must be within [0, 1] for a flat universe, got: {}",
                self.om0
            )));
        }
        Ok(())
    }

    /// Hubble distance c/H0 in Mpc.
    pub fn hubble_distance_mpc(&self) -> f64 {
        SPEED_OF_LIGHT_KMS / self.h0
    }

    pub fn ogamma0(&self) -> f64 {
        let h = self.h0 / 100.0;
        OMEGA_GAMMA_H2 * (self.tcmb0 / REFERENCE_TCMB).powi(4) / (h * h)
    }

    pub fn onu0(&self) -> f64 {
        self.ogamma0() * self.nu_relative_density(0.0)
    }

    /// Neutrino energy density relative to photons at redshift `z`.
    ///
    /// Massless species scale like radiation; massive ones follow the
    /// fitting formula and approach matter once they become non-relativistic.
    pub fn nu_relative_density(&self, z: f64) -> f64 {
        let massive: Vec<f64> = self.m_nu.iter().copied().filter(|m| *m > 0.0).collect();
        if massive.is_empty() {
            return NEUTRINO_PER_SPECIES * self.neff;
        }

        let kt_nu = BOLTZMANN_EV_PER_K * TNU_PER_TCMB * self.tcmb0;
        let massive_sum: f64 = massive
            .iter()
            .map(|m| {
                let y = m / kt_nu / (1.0 + z);
                (1.0 + (NU_FIT_K * y).powf(NU_FIT_P)).powf(1.0 / NU_FIT_P)
            })
            .sum();
        let massless = (self.m_nu.len() - massive.len()) as f64;
        let neff_per_species = self.neff / self.m_nu.len() as f64;
        NEUTRINO_PER_SPECIES * neff_per_species * (massive_sum + massless)
    }

    pub fn ode0(&self) -> f64 {
        1.0 - self.om0 - self.ogamma0() - self.onu0()
    }

    /// Dimensionless Hubble parameter E(z) = H(z) / H0.
    pub fn efunc(&self, z: f64) -> f64 {
        let a = 1.0 + z;
        let radiation = self.ogamma0() * (1.0 + self.nu_relative_density(z));
        (self.om0 * a.powi(3) + radiation * a.powi(4) + self.ode0()).sqrt()
    }

    pub fn comoving_distance_mpc(&self, z: f64) -> Result<f64> {
        check_redshift(z)?;
        if z == 0.0 {
            return Ok(0.0);
        }
        let integral = simpson(|x| 1.0 / self.efunc(x), 0.0, z, SIMPSON_INTERVALS);
        Ok(self.hubble_distance_mpc() * integral)
    }

    pub fn luminosity_distance_mpc(&self, z: f64) -> Result<f64> {
        Ok((1.0 + z) * self.comoving_distance_mpc(z)?)
    }

    pub fn luminosity_distance_pc(&self, z: f64) -> Result<f64> {
        Ok(self.luminosity_distance_mpc(z)? * 1e6)
    }

    /// Distance modulus 5 log10(d_L / 10 pc).
    pub fn distmod(&self, z: f64) -> Result<f64> {
        if z == 0.0 {
            return Err(Error::invalid("Distance modulus is undefined at redshift 0"));
        }
        let d_pc = self.luminosity_distance_pc(z)?;
        Ok(5.0 * d_pc.log10() - 5.0)
    }

    pub fn absolute_magnitude(&self, apparent: f64, z: f64) -> Result<f64> {
        Ok(apparent - self.distmod(z)?)
    }
}

fn check_redshift(z: f64) -> Result<()> {
    if !z.is_finite() || z < 0.0 {
        return Err(Error::invalid(format!(
            "Redshift must be finite and non-negative, got: {}",
            z
        )));
    }
    Ok(())
}

/// Composite Simpson rule with `intervals` (rounded up to even) panels.
fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, intervals: usize) -> f64 {
    let n = (intervals.max(2) + 1) & !1;
    let h = (b - a) / n as f64;
    let interior: f64 = (1..n)
        .map(|i| {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            weight * f(a + i as f64 * h)
        })
        .sum();
    (f(a) + interior + f(b)) * h / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simpson_is_exact_for_cubics() {
        let integral = simpson(|x| x * x * x - 2.0 * x, 0.0, 2.0, 4);
        assert!((integral - 0.0).abs() < 1e-12);
        let integral = simpson(|x| x * x, 0.0, 3.0, 3);
        assert!((integral - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_reference_distances() {
        let cosmo = FlatLambdaCdm::default();
        let cases = [
            (0.01, 43.158, 33.1753),
            (0.1, 460.296, 38.3152),
            (0.5, 2832.81, 42.2611),
            (1.0, 6607.05, 44.1000),
        ];
        for (z, d_l, mu) in cases {
            let distance = cosmo.luminosity_distance_mpc(z).unwrap();
            assert!(
                (distance - d_l).abs() / d_l < 1e-4,
                "d_L({}) = {} Mpc, expected {}",
                z,
                distance,
                d_l
            );
            let modulus = cosmo.distmod(z).unwrap();
            assert!((modulus - mu).abs() < 1e-3, "mu({}) = {}, expected {}", z, modulus, mu);
        }
    }

    #[test]
    fn test_planck15_reference_distances() {
        let cosmo = FlatLambdaCdm::planck15();
        assert!((cosmo.onu0() - 1.4363e-3).abs() < 1e-6, "Onu0 = {}", cosmo.onu0());
        let cases = [(0.01, 44.5951), (0.1, 475.337), (1.0, 6791.81)];
        for (z, d_l) in cases {
            let distance = cosmo.luminosity_distance_mpc(z).unwrap();
            assert!(
                (distance - d_l).abs() / d_l < 1e-4,
                "d_L({}) = {} Mpc, expected {}",
                z,
                distance,
                d_l
            );
        }
        assert!((cosmo.distmod(0.1).unwrap() - 38.3850).abs() < 1e-3);
    }

    #[test]
    fn test_massless_neutrinos_scale_as_radiation() {
        let cosmo = FlatLambdaCdm::default();
        let expected = NEUTRINO_PER_SPECIES * 3.04;
        assert_eq!(cosmo.nu_relative_density(0.0), expected);
        assert_eq!(cosmo.nu_relative_density(5.0), expected);

        // a massive species adds density as it becomes non-relativistic
        let planck = FlatLambdaCdm::planck15();
        assert!(planck.nu_relative_density(0.0) > planck.nu_relative_density(10.0));
    }

    #[test]
    fn test_budget_closes() {
        let cosmo = FlatLambdaCdm::default();
        assert!((cosmo.efunc(0.0) - 1.0).abs() < 1e-12);
        assert!(cosmo.ode0() < 0.7 && cosmo.ode0() > 0.699);
    }

    #[test]
    fn test_absolute_magnitude() {
        let cosmo = FlatLambdaCdm::default();
        let m = cosmo.absolute_magnitude(18.0, 0.1).unwrap();
        assert!((m - (18.0 - 38.3152)).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_redshift() {
        let cosmo = FlatLambdaCdm::default();
        for z in [-0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                cosmo.luminosity_distance_mpc(z),
                Err(Error::InvalidParameter(_))
            ));
        }
        assert!(matches!(cosmo.distmod(0.0), Err(Error::InvalidParameter(_))));
        assert_eq!(cosmo.comoving_distance_mpc(0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_new_validates() {
        assert!(FlatLambdaCdm::new(67.7, 0.31).is_ok());
        assert!(FlatLambdaCdm::new(0.0, 0.3).is_err());
        assert!(FlatLambdaCdm::new(70.0, 1.5).is_err());
    }
}
