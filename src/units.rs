use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scalar quantities tagged with their dimension
// ---------------------------------------------------------------------------

macro_rules! quantity {
    ($(#[$meta:meta])* $name:ident, $unit:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(f64);

        impl $name {
            pub const UNIT: &'static str = $unit;

            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Raw magnitude in the quantity's unit.
            pub const fn value(self) -> f64 {
                self.0
            }

            pub fn is_finite_positive(self) -> bool {
                self.0.is_finite() && self.0 > 0.0
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                Self(self.0 / rhs)
            }
        }

        /// Ratio of two like quantities is dimensionless.
        impl Div for $name {
            type Output = f64;
            fn div(self, rhs: Self) -> f64 {
                self.0 / rhs.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", self.0, $unit)
            }
        }
    };
}

quantity!(
    /// Velocity along or across the line of sight.
    Velocity,
    "km/s"
);
quantity!(
    /// Comoving distance. Skewer positions use the snapshot's own kpc coordinates.
    Length,
    "kpc"
);
quantity!(
    /// Areal number density integrated along a sightline.
    ColumnDensity,
    "cm^-2"
);
quantity!(
    /// Expansion rate.
    HubbleRate,
    "km/s/Mpc"
);

const KPC_PER_MPC: f64 = 1000.0;

impl Length {
    /// Hubble-flow velocity across this distance at expansion rate `h`.
    pub fn hubble_velocity(self, h: HubbleRate) -> Velocity {
        Velocity(self.0 / KPC_PER_MPC * h.value())
    }
}

impl Velocity {
    /// Comoving distance whose Hubble-flow velocity is this one.
    pub fn hubble_distance(self, h: HubbleRate) -> Length {
        Length(self.0 / h.value() * KPC_PER_MPC)
    }
}

// ---------------------------------------------------------------------------
// Fourier-space units
// ---------------------------------------------------------------------------

/// Which voxel spacing the Fourier grid is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FourierUnits {
    /// Wavenumbers in s/km.
    #[default]
    Velocity,
    /// Wavenumbers in 1/kpc.
    Distance,
}

impl FourierUnits {
    pub fn unit(self) -> &'static str {
        match self {
            FourierUnits::Velocity => "s/km",
            FourierUnits::Distance => "1/kpc",
        }
    }
}

/// A single wavenumber together with the spacing unit it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wavenumber {
    pub value: f64,
    pub units: FourierUnits,
}

impl fmt::Display for Wavenumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.units.unit())
    }
}
