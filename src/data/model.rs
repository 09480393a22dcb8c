use std::fmt;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::cosmology::GridAxis;
use crate::error::{Error, Result};
use crate::units::{Length, Velocity};

// ---------------------------------------------------------------------------
// SnapshotHeader – what the extraction service reports about a snapshot
// ---------------------------------------------------------------------------

/// Snapshot-level quantities reported by the spectral-extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub redshift: f64,
    /// Dimensionless Hubble parameter, H0 / (100 km/s/Mpc).
    pub little_h: f64,
    pub omega_m: f64,
    /// Comoving box side in kpc/h.
    pub box_size: Length,
    /// Hubble-flow velocity across the box.
    pub vmax: Velocity,
    /// Velocity width of one spectral pixel.
    pub dvbin: Velocity,
}

// ---------------------------------------------------------------------------
// Species / SpectralLine
// ---------------------------------------------------------------------------

/// An element in a given ionisation state, e.g. H I.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species {
    pub element: String,
    pub ion: i32,
}

impl Species {
    pub fn neutral_hydrogen() -> Self {
        Self {
            element: "H".to_string(),
            ion: 1,
        }
    }
}

impl Default for Species {
    fn default() -> Self {
        Self::neutral_hydrogen()
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.element, self.ion)
    }
}

/// An absorption line of a species; wavelength in Angstrom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralLine {
    pub species: Species,
    pub wavelength: u32,
}

impl SpectralLine {
    pub fn lyman_alpha() -> Self {
        Self {
            species: Species::neutral_hydrogen(),
            wavelength: 1215,
        }
    }
}

impl Default for SpectralLine {
    fn default() -> Self {
        Self::lyman_alpha()
    }
}

impl fmt::Display for SpectralLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}A", self.species, self.wavelength)
    }
}

// ---------------------------------------------------------------------------
// Position – transverse coordinates of a sightline
// ---------------------------------------------------------------------------

/// Transverse position of a skewer in snapshot coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: Length,
    pub y: Length,
}

impl Position {
    pub fn new(x: Length, y: Length) -> Self {
        Self { x, y }
    }

    /// Move by `distance` along a transverse axis.
    pub fn shifted(self, axis: GridAxis, distance: Length) -> Result<Self> {
        match axis {
            GridAxis::X => Ok(Self {
                x: self.x + distance,
                ..self
            }),
            GridAxis::Y => Ok(Self {
                y: self.y + distance,
                ..self
            }),
            GridAxis::Z => Err(Error::config(
                "skewers cannot be displaced along the line of sight",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Skewer – one simulated sightline
// ---------------------------------------------------------------------------

/// A single sightline: position, per-pixel optical depth and column density.
///
/// Arrays are empty until the corresponding quantity has been extracted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skewer {
    pub position: Position,
    pub tau: Vec<f64>,
    /// Per-pixel column density in cm^-2.
    pub col_dens: Vec<f64>,
    pub contaminated: bool,
    /// Set once the skewer has been moved by DLA dodging.
    pub displaced: bool,
}

impl Skewer {
    pub fn at(position: Position) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Column density integrated over the whole sightline, in cm^-2.
    pub fn total_column_density(&self) -> f64 {
        self.col_dens.iter().sum()
    }

    /// Transmitted flux fraction per pixel.
    pub fn flux(&self) -> impl Iterator<Item = f64> + '_ {
        self.tau.iter().map(|t| (-t).exp())
    }
}

/// Which line and species a set of stored skewer arrays was extracted for.
/// `None` means the arrays are absent or of unknown origin.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkewerProvenance {
    pub tau_line: Option<SpectralLine>,
    pub col_dens_species: Option<Species>,
}

/// Skewers read back from disk together with their provenance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkewerSet {
    pub provenance: SkewerProvenance,
    pub skewers: Vec<Skewer>,
}

// ---------------------------------------------------------------------------
// DensityCube – gridded neutral-hydrogen density of a snapshot
// ---------------------------------------------------------------------------

/// Snapshot quantities stored alongside a density cube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubeMeta {
    pub redshift: f64,
    pub little_h: f64,
    pub omega_m: f64,
    /// Comoving box side in kpc/h.
    pub box_size: Length,
}

/// Neutral-hydrogen number density (cm^-3) on a periodic `(nx, ny, nz)` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityCube {
    pub meta: CubeMeta,
    pub n_hi: Array3<f64>,
}
