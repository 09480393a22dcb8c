use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building grids, synthesising fields or dodging DLAs.
#[derive(Debug, Error)]
pub enum Error {
    /// A geometry, cosmology or engine parameter is outside its valid range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Two arrays that must share a shape do not.
    #[error("shape mismatch for {what}: expected {expected:?}, got {found:?}")]
    Shape {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// The spectral-extraction service failed. The source is passed through untouched.
    #[error("spectral extraction service failed")]
    Service(#[source] anyhow::Error),

    /// A pre-tabulated power spectrum could not be read.
    #[error("failed to load power table {path}")]
    PowerTable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The dodging loop hit its iteration cap with skewers still contaminated.
    #[error("DLA dodging did not converge after {iterations} iterations ({residual} skewers still contaminated)")]
    NonConvergence { iterations: usize, residual: usize },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = Error::config("omega_m must lie in [0, 1], got 1.5");
        assert_eq!(
            err.to_string(),
            "invalid configuration: omega_m must lie in [0, 1], got 1.5"
        );

        let err = Error::NonConvergence {
            iterations: 100,
            residual: 3,
        };
        assert_eq!(
            err.to_string(),
            "DLA dodging did not converge after 100 iterations (3 skewers still contaminated)"
        );
    }

    #[test]
    fn service_error_keeps_source() {
        let err = Error::Service(anyhow::anyhow!("snapshot 64 missing"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("snapshot 64 missing"));
    }
}
