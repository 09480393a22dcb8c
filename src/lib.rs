//! Boxes of Lyman-alpha forest flux.
//!
//! Two sources of 3D data share one frequency-grid abstraction:
//!
//! ```text
//!   GaussianBox ── power(k, mu) ──► complex modes ──► ifft ──► density contrast
//!
//!   SpectralService ──► SkewerCollection ──► DlaDodger ──► dodged skewers (parquet)
//!                             │
//!                             └──► flux contrast on (n, n, n_los)
//! ```

pub mod config;
pub mod cosmology;
pub mod data;
pub mod dodge;
pub mod error;
pub mod fourier;
pub mod gaussian;
pub mod power;
pub mod skewers;
pub mod units;

pub use config::RunConfig;
pub use cosmology::{Cosmology, GridAxis, GridGeometry};
pub use data::model::{Position, SnapshotHeader, Skewer, SpectralLine, Species};
pub use data::service::{FieldSnapshotService, SpectralService};
pub use dodge::{ContaminationPolicy, DlaDodger, DodgeConfig, DodgeReport};
pub use error::{Error, Result};
pub use fourier::FrequencyGrid;
pub use gaussian::GaussianBox;
pub use power::{AnisotropicPowerSpectrum, PowerLawPowerSpectrum, PowerSpectrum, PreComputedPowerSpectrum};
pub use skewers::{SimulationConfig, SkewerCollection};
pub use units::{ColumnDensity, FourierUnits, HubbleRate, Length, Velocity, Wavenumber};
