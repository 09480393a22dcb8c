use serde::{Deserialize, Serialize};

use crate::data::model::SnapshotHeader;
use crate::error::{Error, Result};
use crate::units::{FourierUnits, HubbleRate, Length, Velocity};

// ---------------------------------------------------------------------------
// Cosmology
// ---------------------------------------------------------------------------

/// Background cosmology of a box: redshift, present-day Hubble constant and
/// matter density fraction of a flat Lambda-CDM universe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    redshift: f64,
    h0: HubbleRate,
    omega_m: f64,
}

impl Cosmology {
    pub fn new(redshift: f64, h0: HubbleRate, omega_m: f64) -> Result<Self> {
        if !(redshift.is_finite() && redshift >= 0.0) {
            return Err(Error::config(format!(
                "redshift must be finite and non-negative, got {redshift}"
            )));
        }
        if !h0.is_finite_positive() {
            return Err(Error::config(format!("H0 must be positive, got {h0}")));
        }
        if !(0.0..=1.0).contains(&omega_m) {
            return Err(Error::config(format!(
                "omega_m must lie in [0, 1], got {omega_m}"
            )));
        }
        Ok(Self {
            redshift,
            h0,
            omega_m,
        })
    }

    pub fn redshift(&self) -> f64 {
        self.redshift
    }

    pub fn h0(&self) -> HubbleRate {
        self.h0
    }

    pub fn omega_m(&self) -> f64 {
        self.omega_m
    }

    /// H(z) = H0 sqrt(Ωm (1+z)³ + 1 − Ωm).
    pub fn hubble_z(&self) -> HubbleRate {
        let a3 = (1.0 + self.redshift).powi(3);
        self.h0 * (self.omega_m * a3 + 1.0 - self.omega_m).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// Grid axis. `Z` is always the line of sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridAxis {
    X,
    Y,
    Z,
}

impl GridAxis {
    pub const ALL: [GridAxis; 3] = [GridAxis::X, GridAxis::Y, GridAxis::Z];

    pub fn index(self) -> usize {
        match self {
            GridAxis::X => 0,
            GridAxis::Y => 1,
            GridAxis::Z => 2,
        }
    }

    pub fn is_line_of_sight(self) -> bool {
        self == GridAxis::Z
    }
}

/// Immutable sample counts and voxel sizes of a regular 3D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    n_samp: [usize; 3],
    voxel_lens: [Length; 3],
    voxel_velocities: [Velocity; 3],
    fourier_units: FourierUnits,
}

impl GridGeometry {
    /// Build from explicit voxel sizes, validating every axis.
    pub fn new(
        n_samp: [usize; 3],
        voxel_lens: [Length; 3],
        voxel_velocities: [Velocity; 3],
    ) -> Result<Self> {
        for axis in GridAxis::ALL {
            let i = axis.index();
            if n_samp[i] == 0 {
                return Err(Error::config(format!(
                    "sample count along {axis:?} must be positive"
                )));
            }
            if !voxel_lens[i].is_finite_positive() {
                return Err(Error::config(format!(
                    "voxel length along {axis:?} must be positive, got {}",
                    voxel_lens[i]
                )));
            }
            if !voxel_velocities[i].is_finite_positive() {
                return Err(Error::config(format!(
                    "voxel velocity width along {axis:?} must be positive, got {}",
                    voxel_velocities[i]
                )));
            }
        }
        Ok(Self {
            n_samp,
            voxel_lens,
            voxel_velocities,
            fourier_units: FourierUnits::default(),
        })
    }

    /// Geometry of a Gaussian box spanning `x_max` with `n_samp` samples per axis.
    ///
    /// Samples sit on both box edges, so the voxel length is `x_max / (n - 1)`.
    /// Velocity widths follow from the Hubble flow at the box redshift.
    pub fn gaussian(cosmology: &Cosmology, x_max: [Length; 3], n_samp: [usize; 3]) -> Result<Self> {
        if let Some(axis) = GridAxis::ALL.into_iter().find(|a| n_samp[a.index()] < 2) {
            return Err(Error::config(format!(
                "a Gaussian box needs at least 2 samples along {axis:?}"
            )));
        }
        let hubble = cosmology.hubble_z();
        let voxel_lens = [0usize, 1, 2].map(|i| x_max[i] / (n_samp[i] - 1) as f64);
        let voxel_velocities = voxel_lens.map(|len| len.hubble_velocity(hubble));
        Self::new(n_samp, voxel_lens, voxel_velocities)
    }

    /// Geometry of a skewer grid extracted from a simulation snapshot.
    ///
    /// Transverse velocity width is `vmax / n`; along the line of sight it is
    /// the service's bin width and the sample count is `floor(vmax / dv)`.
    pub fn from_snapshot(header: &SnapshotHeader, grid_samps: usize) -> Result<Self> {
        if grid_samps == 0 {
            return Err(Error::config("grid resolution must be positive"));
        }
        if !(header.vmax.is_finite_positive() && header.dvbin.is_finite_positive()) {
            return Err(Error::config(format!(
                "snapshot velocity extent {} and bin width {} must be positive",
                header.vmax, header.dvbin
            )));
        }
        if !(header.little_h.is_finite() && header.little_h > 0.0) {
            return Err(Error::config(format!(
                "little h must be positive, got {}",
                header.little_h
            )));
        }
        let n_los = (header.vmax / header.dvbin).floor() as usize;
        let n_samp = [grid_samps, grid_samps, n_los];
        let transverse_v = header.vmax / grid_samps as f64;
        let voxel_velocities = [transverse_v, transverse_v, header.dvbin];
        let voxel_lens = n_samp.map(|n| header.box_size / (n as f64 * header.little_h));
        Self::new(n_samp, voxel_lens, voxel_velocities)
    }

    /// Same grid, with wavenumbers taken against a different voxel spacing.
    pub fn with_fourier_units(mut self, units: FourierUnits) -> Self {
        self.fourier_units = units;
        self
    }

    pub fn n_samp(&self) -> [usize; 3] {
        self.n_samp
    }

    pub fn samples(&self, axis: GridAxis) -> usize {
        self.n_samp[axis.index()]
    }

    pub fn total_samples(&self) -> usize {
        self.n_samp.iter().product()
    }

    pub fn voxel_len(&self, axis: GridAxis) -> Length {
        self.voxel_lens[axis.index()]
    }

    pub fn voxel_velocity(&self, axis: GridAxis) -> Velocity {
        self.voxel_velocities[axis.index()]
    }

    pub fn fourier_units(&self) -> FourierUnits {
        self.fourier_units
    }

    /// Voxel spacing in the active Fourier units.
    pub fn spacing(&self, axis: GridAxis) -> f64 {
        match self.fourier_units {
            FourierUnits::Velocity => self.voxel_velocity(axis).value(),
            FourierUnits::Distance => self.voxel_len(axis).value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn planck_like() -> Cosmology {
        Cosmology::new(2.44, HubbleRate::new(70.4), 0.2726).unwrap()
    }

    #[test]
    fn hubble_z_reduces_to_h0_today() {
        let c = Cosmology::new(0.0, HubbleRate::new(70.0), 0.3).unwrap();
        assert_relative_eq!(c.hubble_z().value(), 70.0);

        let c = planck_like();
        let expected = 70.4 * (0.2726 * 3.44f64.powi(3) + 1.0 - 0.2726).sqrt();
        assert_relative_eq!(c.hubble_z().value(), expected);
    }

    #[test]
    fn rejects_bad_cosmology() {
        assert!(matches!(
            Cosmology::new(2.0, HubbleRate::new(70.0), 1.2),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Cosmology::new(2.0, HubbleRate::new(0.0), 0.3),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Cosmology::new(-1.0, HubbleRate::new(70.0), 0.3),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn gaussian_geometry_spacing() {
        let c = planck_like();
        let x_max = [Length::new(7500.0); 3];
        let g = GridGeometry::gaussian(&c, x_max, [16, 16, 31]).unwrap();
        assert_relative_eq!(g.voxel_len(GridAxis::X).value(), 500.0);
        assert_relative_eq!(g.voxel_len(GridAxis::Z).value(), 250.0);
        assert_relative_eq!(
            g.voxel_velocity(GridAxis::Z).value(),
            0.25 * c.hubble_z().value()
        );
        assert_eq!(g.total_samples(), 16 * 16 * 31);
    }

    #[test]
    fn rejects_degenerate_grids() {
        let c = planck_like();
        let x_max = [Length::new(100.0); 3];
        assert!(GridGeometry::gaussian(&c, x_max, [1, 4, 4]).is_err());
        assert!(GridGeometry::new(
            [0, 4, 4],
            [Length::new(1.0); 3],
            [Velocity::new(1.0); 3]
        )
        .is_err());
        assert!(GridGeometry::new(
            [4, 4, 4],
            [Length::new(1.0), Length::new(-1.0), Length::new(1.0)],
            [Velocity::new(1.0); 3]
        )
        .is_err());
    }

    #[test]
    fn snapshot_geometry_follows_service_header() {
        let header = SnapshotHeader {
            redshift: 2.44,
            little_h: 0.704,
            omega_m: 0.2726,
            box_size: Length::new(75_000.0),
            vmax: Velocity::new(7_000.0),
            dvbin: Velocity::new(10.0),
        };
        let g = GridGeometry::from_snapshot(&header, 64).unwrap();
        assert_eq!(g.n_samp(), [64, 64, 700]);
        assert_relative_eq!(g.voxel_velocity(GridAxis::X).value(), 7_000.0 / 64.0);
        assert_relative_eq!(g.voxel_velocity(GridAxis::Z).value(), 10.0);
        assert_relative_eq!(
            g.voxel_len(GridAxis::Y).value(),
            75_000.0 / (64.0 * 0.704)
        );
        assert_relative_eq!(
            g.voxel_len(GridAxis::Z).value(),
            75_000.0 / (700.0 * 0.704)
        );
    }
}
