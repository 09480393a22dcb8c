use std::path::Path;

use ndarray::{Array3, Zip};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::cosmology::{Cosmology, GridGeometry};
use crate::error::{Error, Result};
use crate::fourier::{ifft_3d, FrequencyGrid};
use crate::power::{
    AnisotropicPowerSpectrum, PowerLawPowerSpectrum, PowerSpectrum, PreComputedPowerSpectrum,
};
use crate::units::Length;

/// RNG for field draws. With a seed the draw is reproducible; otherwise the
/// generator is seeded from host entropy.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Ensemble variance of each real-space voxel for constant power `p0` on a
/// grid of `n_total` samples, with the zero mode removed.
///
/// Every mode carries E|a_k|² = p0, the inverse transform divides by N and
/// the real part keeps half the power: p0 (N − 1) / (2 N²).
pub fn constant_power_variance(p0: f64, n_total: usize) -> f64 {
    let n = n_total as f64;
    p0 * (n - 1.0) / (2.0 * n * n)
}

/// A box of density contrast drawn from a Gaussian random field.
#[derive(Debug, Clone)]
pub struct GaussianBox {
    cosmology: Cosmology,
    geometry: GridGeometry,
}

impl GaussianBox {
    pub fn new(cosmology: Cosmology, x_max: [Length; 3], n_samp: [usize; 3]) -> Result<Self> {
        let geometry = GridGeometry::gaussian(&cosmology, x_max, n_samp)?;
        Ok(Self {
            cosmology,
            geometry,
        })
    }

    /// Wrap an existing geometry, e.g. one with distance-unit wavenumbers.
    pub fn with_geometry(cosmology: Cosmology, geometry: GridGeometry) -> Self {
        Self {
            cosmology,
            geometry,
        }
    }

    pub fn cosmology(&self) -> &Cosmology {
        &self.cosmology
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn frequency_grid(&self) -> FrequencyGrid {
        FrequencyGrid::new(&self.geometry)
    }

    /// Draw one real-space realisation for a tabulated power grid.
    ///
    /// Fourier amplitudes are `sqrt(P / 2) (g₁ + i g₂)` with independent
    /// standard normals, the zero mode is set to 0 so the contrast has zero
    /// mean, and the real part of the inverse DFT is returned. No Hermitian
    /// pairing is imposed between `k` and `−k`.
    pub fn gauss_realisation<R: Rng + ?Sized>(
        &self,
        power: &Array3<f64>,
        k_box: &Array3<f64>,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let n = self.geometry.n_samp();
        for (what, grid) in [("power grid", power), ("wavenumber grid", k_box)] {
            if grid.shape() != n.as_slice() {
                return Err(Error::Shape {
                    what,
                    expected: n.to_vec(),
                    found: grid.shape().to_vec(),
                });
            }
        }
        if let Some(bad) = power.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
            return Err(Error::config(format!(
                "power must be finite and non-negative, found {bad}"
            )));
        }

        let mut draw = || -> Array3<f64> {
            Array3::from_shape_simple_fn(power.raw_dim(), || rng.sample(StandardNormal))
        };
        let real = draw();
        let imag = draw();

        let mut gauss_k = Array3::<Complex64>::zeros(power.raw_dim());
        Zip::from(&mut gauss_k)
            .and(power)
            .and(k_box)
            .and(&real)
            .and(&imag)
            .par_for_each(|g, &p, &k, &re, &im| {
                *g = if k == 0.0 {
                    Complex64::new(0.0, 0.0)
                } else {
                    Complex64::new(re, im) * (0.5 * p).sqrt()
                };
            });

        ifft_3d(&mut gauss_k);
        Ok(gauss_k.mapv(|v| v.re))
    }

    /// Realisation for any isotropic spectrum.
    pub fn isotropic_realisation<P, R>(&self, spectrum: &P, rng: &mut R) -> Result<Array3<f64>>
    where
        P: PowerSpectrum,
        R: Rng + ?Sized,
    {
        let k_box = self.frequency_grid().magnitude_grid();
        let power = spectrum.evaluate3d_isotropic(&k_box);
        self.gauss_realisation(&power, &k_box, rng)
    }

    /// Realisation for a spectrum with a mu-polynomial correction.
    pub fn anisotropic_realisation<P, R>(
        &self,
        spectrum: &AnisotropicPowerSpectrum<P>,
        rng: &mut R,
    ) -> Result<Array3<f64>>
    where
        P: PowerSpectrum,
        R: Rng + ?Sized,
    {
        let grid = self.frequency_grid();
        let k_box = grid.magnitude_grid();
        let mu_box = grid.direction_cosine_grid();
        let power = spectrum.evaluate3d_anisotropic(&k_box, &mu_box)?;
        self.gauss_realisation(&power, &k_box, rng)
    }

    pub fn isotropic_power_law_gauss_realisation<R: Rng + ?Sized>(
        &self,
        pow_index: f64,
        pow_pivot: f64,
        pow_amp: f64,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let spectrum = PowerLawPowerSpectrum::new(pow_index, pow_pivot, pow_amp)?;
        self.isotropic_realisation(&spectrum, rng)
    }

    pub fn anisotropic_power_law_gauss_realisation<R: Rng + ?Sized>(
        &self,
        pow_index: f64,
        pow_pivot: f64,
        pow_amp: f64,
        mu_coefficients: Vec<f64>,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let spectrum = PowerLawPowerSpectrum::new(pow_index, pow_pivot, pow_amp)?
            .with_anisotropy(mu_coefficients)?;
        self.anisotropic_realisation(&spectrum, rng)
    }

    pub fn isotropic_pre_computed_gauss_realisation<R: Rng + ?Sized>(
        &self,
        table: &Path,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let spectrum = PreComputedPowerSpectrum::from_file(table)?;
        self.isotropic_realisation(&spectrum, rng)
    }

    pub fn anisotropic_pre_computed_gauss_realisation<R: Rng + ?Sized>(
        &self,
        table: &Path,
        mu_coefficients: Vec<f64>,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let spectrum = PreComputedPowerSpectrum::from_file(table)?.with_anisotropy(mu_coefficients)?;
        self.anisotropic_realisation(&spectrum, rng)
    }
}
