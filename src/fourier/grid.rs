use ndarray::{Array1, Array3};

use crate::cosmology::{GridAxis, GridGeometry};
use crate::units::{FourierUnits, Wavenumber};

// ---------------------------------------------------------------------------
// Per-axis frequencies
// ---------------------------------------------------------------------------

/// Sample frequencies of an `n`-point DFT with sample spacing `d`.
///
/// Ordering matches the transform output: `[0, 1, …, ⌈n/2⌉−1, −⌊n/2⌋, …, −1] / (n·d)`.
/// For even `n` the Nyquist bin appears once, with a negative sign.
pub fn fft_frequencies(n: usize, d: f64) -> Array1<f64> {
    let scale = 1.0 / (n as f64 * d);
    let n_pos = n.div_ceil(2);
    Array1::from_shape_fn(n, |i| {
        if i < n_pos {
            i as f64 * scale
        } else {
            -((n - i) as f64) * scale
        }
    })
}

// ---------------------------------------------------------------------------
// 3D wavenumber grids
// ---------------------------------------------------------------------------

/// Wavenumber arrays for one grid geometry.
///
/// The three per-axis arrays are computed once at construction and every
/// derived 3D grid is broadcast from them, so all grids agree cell by cell.
#[derive(Debug, Clone)]
pub struct FrequencyGrid {
    axes: [Array1<f64>; 3],
    units: FourierUnits,
}

impl FrequencyGrid {
    pub fn new(geometry: &GridGeometry) -> Self {
        let axes = GridAxis::ALL.map(|axis| {
            fft_frequencies(geometry.samples(axis), geometry.spacing(axis))
        });
        Self {
            axes,
            units: geometry.fourier_units(),
        }
    }

    pub fn units(&self) -> FourierUnits {
        self.units
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.axes[0].len(), self.axes[1].len(), self.axes[2].len())
    }

    /// Frequencies along one axis.
    pub fn frequencies(&self, axis: GridAxis) -> &Array1<f64> {
        &self.axes[axis.index()]
    }

    /// Largest representable frequency magnitude along an axis.
    pub fn nyquist(&self, axis: GridAxis) -> Wavenumber {
        let value = self
            .frequencies(axis)
            .iter()
            .fold(0.0f64, |acc, k| acc.max(k.abs()));
        Wavenumber {
            value,
            units: self.units,
        }
    }

    fn broadcast<F>(&self, f: F) -> Array3<f64>
    where
        F: Fn(f64, f64, f64) -> f64,
    {
        let [kx, ky, kz] = &self.axes;
        Array3::from_shape_fn(self.shape(), |(i, j, l)| f(kx[i], ky[j], kz[l]))
    }

    /// |k| = sqrt(kx² + ky² + kz²).
    pub fn magnitude_grid(&self) -> Array3<f64> {
        self.broadcast(|kx, ky, kz| (kx * kx + ky * ky + kz * kz).sqrt())
    }

    /// |kz| broadcast over the transverse axes.
    pub fn los_magnitude_grid(&self) -> Array3<f64> {
        self.broadcast(|_, _, kz| kz.abs())
    }

    /// sqrt(kx² + ky²) broadcast along the line of sight.
    pub fn transverse_magnitude_grid(&self) -> Array3<f64> {
        self.broadcast(|kx, ky, _| (kx * kx + ky * ky).sqrt())
    }

    /// mu = kz / |k|, set to 0 at the zero mode.
    ///
    /// The zero mode is checked before dividing, so no NaN is ever produced.
    pub fn direction_cosine_grid(&self) -> Array3<f64> {
        self.broadcast(|kx, ky, kz| direction_cosine(kx, ky, kz).unwrap_or(0.0))
    }

    /// mu = kz / |k|, `None` at the zero mode.
    pub fn direction_cosine_masked(&self) -> Array3<Option<f64>> {
        let [kx, ky, kz] = &self.axes;
        Array3::from_shape_fn(self.shape(), |(i, j, l)| {
            direction_cosine(kx[i], ky[j], kz[l])
        })
    }

    /// `true` where |k| = 0.
    pub fn zero_mode_mask(&self) -> Array3<bool> {
        let [kx, ky, kz] = &self.axes;
        Array3::from_shape_fn(self.shape(), |(i, j, l)| {
            kx[i] == 0.0 && ky[j] == 0.0 && kz[l] == 0.0
        })
    }
}

fn direction_cosine(kx: f64, ky: f64, kz: f64) -> Option<f64> {
    let k = (kx * kx + ky * ky + kz * kz).sqrt();
    if k == 0.0 {
        None
    } else {
        Some((kz / k).clamp(-1.0, 1.0))
    }
}
