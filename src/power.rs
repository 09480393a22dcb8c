use std::path::Path;

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

use crate::data::loader::load_power_table;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Power spectrum interface
// ---------------------------------------------------------------------------

/// An isotropic power spectrum P(k). The zero mode always evaluates to 0.
pub trait PowerSpectrum: Send + Sync {
    /// Power at wavenumber magnitude `k`.
    fn evaluate(&self, k: f64) -> f64;

    /// Power over a whole |k| grid.
    fn evaluate3d_isotropic(&self, k_box: &Array3<f64>) -> Array3<f64> {
        let mut out = Array3::zeros(k_box.raw_dim());
        Zip::from(&mut out)
            .and(k_box)
            .par_for_each(|p, &k| *p = self.evaluate(k));
        out
    }

    /// Multiply by a polynomial in mu².
    fn with_anisotropy(self, mu_coefficients: Vec<f64>) -> Result<AnisotropicPowerSpectrum<Self>>
    where
        Self: Sized,
    {
        AnisotropicPowerSpectrum::new(self, mu_coefficients)
    }
}

/// P(k) = A (k / k₀)^n.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLawPowerSpectrum {
    pub index: f64,
    pub pivot: f64,
    pub amplitude: f64,
}

impl PowerLawPowerSpectrum {
    pub fn new(index: f64, pivot: f64, amplitude: f64) -> Result<Self> {
        if !(pivot.is_finite() && pivot > 0.0) {
            return Err(Error::config(format!(
                "power-law pivot must be positive, got {pivot}"
            )));
        }
        if !(amplitude.is_finite() && amplitude >= 0.0) {
            return Err(Error::config(format!(
                "power-law amplitude must be non-negative, got {amplitude}"
            )));
        }
        if !index.is_finite() {
            return Err(Error::config("power-law index must be finite"));
        }
        Ok(Self {
            index,
            pivot,
            amplitude,
        })
    }
}

impl PowerSpectrum for PowerLawPowerSpectrum {
    fn evaluate(&self, k: f64) -> f64 {
        if k == 0.0 {
            return 0.0;
        }
        self.amplitude * (k.abs() / self.pivot).powf(self.index)
    }
}

/// Tabulated P(k), interpolated linearly in log k / log P and clamped at the
/// table ends.
#[derive(Debug, Clone, PartialEq)]
pub struct PreComputedPowerSpectrum {
    log_k: Vec<f64>,
    log_p: Vec<f64>,
}

impl PreComputedPowerSpectrum {
    pub fn from_table(k: Vec<f64>, power: Vec<f64>) -> Result<Self> {
        if k.len() != power.len() {
            return Err(Error::Shape {
                what: "power table",
                expected: vec![k.len()],
                found: vec![power.len()],
            });
        }
        if k.is_empty() {
            return Err(Error::config("power table is empty"));
        }
        if k.iter().chain(&power).any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(Error::config(
                "power table wavenumbers and powers must be finite and positive",
            ));
        }
        if k.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::config(
                "power table wavenumbers must be strictly increasing",
            ));
        }
        Ok(Self {
            log_k: k.iter().map(|v| v.ln()).collect(),
            log_p: power.iter().map(|v| v.ln()).collect(),
        })
    }

    /// Load a `(k, power)` table from a `.csv` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let table = load_power_table(path).map_err(|source| Error::PowerTable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_table(table.k, table.power)
    }

    pub fn len(&self) -> usize {
        self.log_k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_k.is_empty()
    }
}

impl PowerSpectrum for PreComputedPowerSpectrum {
    fn evaluate(&self, k: f64) -> f64 {
        if k == 0.0 {
            return 0.0;
        }
        let x = k.abs().ln();
        let n = self.log_k.len();
        if n == 1 || x <= self.log_k[0] {
            return self.log_p[0].exp();
        }
        if x >= self.log_k[n - 1] {
            return self.log_p[n - 1].exp();
        }
        let hi = self.log_k.partition_point(|&lk| lk < x);
        let lo = hi - 1;
        let t = (x - self.log_k[lo]) / (self.log_k[hi] - self.log_k[lo]);
        (self.log_p[lo] + t * (self.log_p[hi] - self.log_p[lo])).exp()
    }
}

// ---------------------------------------------------------------------------
// Anisotropic correction
// ---------------------------------------------------------------------------

/// P(k, mu) = P(k) · Σⱼ cⱼ mu^{2j}.
///
/// `[1, 2β, β²]` reproduces the linear redshift-space factor (1 + β mu²)².
#[derive(Debug, Clone, PartialEq)]
pub struct AnisotropicPowerSpectrum<P> {
    isotropic: P,
    mu_coefficients: Vec<f64>,
}

impl<P: PowerSpectrum> AnisotropicPowerSpectrum<P> {
    pub fn new(isotropic: P, mu_coefficients: Vec<f64>) -> Result<Self> {
        if mu_coefficients.is_empty() {
            return Err(Error::config("at least one mu coefficient is required"));
        }
        Ok(Self {
            isotropic,
            mu_coefficients,
        })
    }

    pub fn mu_factor(&self, mu: f64) -> f64 {
        let mu2 = mu * mu;
        // Horner in mu²
        self.mu_coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * mu2 + c)
    }

    pub fn evaluate(&self, k: f64, mu: f64) -> f64 {
        self.isotropic.evaluate(k) * self.mu_factor(mu)
    }

    pub fn evaluate3d_anisotropic(
        &self,
        k_box: &Array3<f64>,
        mu_box: &Array3<f64>,
    ) -> Result<Array3<f64>> {
        if k_box.shape() != mu_box.shape() {
            return Err(Error::Shape {
                what: "direction cosine grid",
                expected: k_box.shape().to_vec(),
                found: mu_box.shape().to_vec(),
            });
        }
        let mut out = Array3::zeros(k_box.raw_dim());
        Zip::from(&mut out)
            .and(k_box)
            .and(mu_box)
            .par_for_each(|p, &k, &mu| *p = self.evaluate(k, mu));
        Ok(out)
    }
}
