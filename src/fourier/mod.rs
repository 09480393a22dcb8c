//! Discrete-Fourier machinery shared by the Gaussian and simulation boxes.
//!
//! ```text
//!  GridGeometry ──► FrequencyGrid ──► k / k_par / k_perp / mu grids
//!                                          │
//!                       PowerSpectrum ◄────┘
//!                            │
//!                            ▼
//!                   transform::ifft_3d  ──► real-space field
//! ```

pub mod grid;
pub mod transform;

pub use grid::{fft_frequencies, FrequencyGrid};
pub use transform::{fft_3d, ifft_3d};
