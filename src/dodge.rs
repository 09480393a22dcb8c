//! Iterative removal of DLA-contaminated skewers.
//!
//! ```text
//!            ┌──────────┐  mask empty   ┌───────────┐
//!  start ──► │ Scanning │ ────────────► │ Converged │ ──► recompute τ, persist
//!            └──────────┘               └───────────┘
//!               ▲    │ mask non-empty
//!               │    ▼
//!            ┌──────────┐
//!            │ Dodging  │  displace contaminated skewers, re-extract only those
//!            └──────────┘
//! ```
//!
//! Only the displaced subset is ever re-extracted or re-tested: a clean skewer
//! is never touched again, so one iteration costs O(contaminated).

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cosmology::GridAxis;
use crate::data::model::SpectralLine;
use crate::data::service::SpectralService;
use crate::error::{Error, Result};
use crate::skewers::SkewerCollection;
use crate::units::{ColumnDensity, Length, Velocity};

// ---------------------------------------------------------------------------
// Contamination test
// ---------------------------------------------------------------------------

/// How a skewer's column density is reduced to the value compared against
/// the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContaminationPolicy {
    /// Largest single-pixel column density.
    SimpleMax,
    /// Largest column density summed over a centered velocity window.
    #[default]
    LocalSum,
}

/// Window length in samples, `round(window / dv)`, never below one.
pub fn window_samples(window: Velocity, dv: Velocity) -> usize {
    ((window / dv).round() as usize).max(1)
}

/// Centered moving sum over `window` samples.
///
/// Near either end the window shrinks to the samples that exist; there is
/// no wrapping and no zero padding, so an absorber at the edge sums to the
/// same value as one in the middle. For even windows the extra sample sits
/// on the high side.
pub fn local_sum(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let window = window.max(1);
    let below = (window - 1) / 2;
    let above = window / 2;

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v);
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(below);
            let hi = (i + above + 1).min(n);
            prefix[hi] - prefix[lo]
        })
        .collect()
}

impl ContaminationPolicy {
    /// The value compared against the threshold for one skewer.
    pub fn peak(self, col_dens: &[f64], window: usize) -> f64 {
        match self {
            ContaminationPolicy::SimpleMax => col_dens.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ContaminationPolicy::LocalSum => local_sum(col_dens, window)
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters of one dodging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DodgeConfig {
    pub col_dens_threshold: ColumnDensity,
    pub dodge_dist: Length,
    /// Transverse axis skewers are moved along.
    pub dodge_axis: GridAxis,
    /// Velocity window of the local-sum test.
    pub window: Velocity,
    pub policy: ContaminationPolicy,
    /// Dodge iterations allowed before giving up.
    pub max_iterations: usize,
    /// Root of the artifact file name.
    pub savefile_root: String,
    pub line: SpectralLine,
}

impl Default for DodgeConfig {
    fn default() -> Self {
        Self {
            col_dens_threshold: ColumnDensity::new(2.0e20),
            dodge_dist: Length::new(10.0),
            dodge_axis: GridAxis::Y,
            window: Velocity::new(100.0),
            policy: ContaminationPolicy::LocalSum,
            max_iterations: 100,
            savefile_root: "gridded_spectra_DLAs_dodged".to_string(),
            line: SpectralLine::lyman_alpha(),
        }
    }
}

impl DodgeConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.col_dens_threshold.is_finite_positive() {
            return Err(Error::config(format!(
                "column density threshold must be positive, got {}",
                self.col_dens_threshold
            )));
        }
        if !self.dodge_dist.value().is_finite() || self.dodge_dist.value() == 0.0 {
            return Err(Error::config(format!(
                "dodge distance must be finite and non-zero, got {}",
                self.dodge_dist
            )));
        }
        if self.dodge_axis.is_line_of_sight() {
            return Err(Error::config("dodge axis must be transverse (x or y)"));
        }
        if self.policy == ContaminationPolicy::LocalSum && !self.window.is_finite_positive() {
            return Err(Error::config(format!(
                "local-sum window must be positive, got {}",
                self.window
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::config("max_iterations must be at least 1"));
        }
        if self.savefile_root.is_empty() {
            return Err(Error::config("savefile_root must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Resting phase of a run between iterations. Scanning happens inside
/// [`DlaDodger::scan`] and at the end of every [`DlaDodger::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DodgePhase {
    Dodging,
    Converged,
}

/// Contamination mask plus loop bookkeeping of a dodging run.
#[derive(Debug, Clone, PartialEq)]
pub struct DodgeState {
    mask: Vec<bool>,
    threshold: ColumnDensity,
    dodge_dist: Length,
    dodge_axis: GridAxis,
    /// Local-sum window in samples.
    window: usize,
    iteration: usize,
}

impl DodgeState {
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn threshold(&self) -> ColumnDensity {
        self.threshold
    }

    /// Indices still flagged, ascending.
    pub fn contaminated(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }

    pub fn residual(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn phase(&self) -> DodgePhase {
        if self.residual() == 0 {
            DodgePhase::Converged
        } else {
            DodgePhase::Dodging
        }
    }
}

/// Outcome of a converged run.
#[derive(Debug, Clone, PartialEq)]
pub struct DodgeReport {
    /// Dodge iterations performed.
    pub iterations: usize,
    /// Every index displaced at least once.
    pub displaced: BTreeSet<usize>,
    /// Contaminated count at the start of each iteration.
    pub history: Vec<usize>,
    pub artifact: PathBuf,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Moves DLA-contaminated skewers until none are left.
///
/// A skewer that lands on new contamination is simply moved again by the
/// same distance along the same axis; there is no direction search.
#[derive(Debug, Clone)]
pub struct DlaDodger {
    config: DodgeConfig,
}

impl DlaDodger {
    pub fn new(config: DodgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DodgeConfig {
        &self.config
    }

    fn is_contaminated(&self, col_dens: &[f64], window: usize) -> bool {
        self.config.policy.peak(col_dens, window) > self.config.col_dens_threshold.value()
    }

    /// Scanning: extract column density for the whole collection and build
    /// the initial mask.
    pub fn scan<S: SpectralService>(&self, coll: &mut SkewerCollection<S>) -> Result<DodgeState> {
        let dv = coll.geometry().voxel_velocity(GridAxis::Z);
        let window = window_samples(self.config.window, dv);
        if self.config.policy == ContaminationPolicy::LocalSum {
            log::info!("Size of bin in samples = {window}");
        }

        coll.column_density(&self.config.line.species)?;
        let mask: Vec<bool> = coll
            .skewers()
            .iter()
            .map(|s| self.is_contaminated(&s.col_dens, window))
            .collect();
        for (i, &m) in mask.iter().enumerate() {
            coll.set_contaminated(i, m);
        }

        Ok(DodgeState {
            mask,
            threshold: self.config.col_dens_threshold,
            dodge_dist: self.config.dodge_dist,
            dodge_axis: self.config.dodge_axis,
            window,
            iteration: 0,
        })
    }

    /// Dodging: displace every flagged skewer, re-extract those alone and
    /// re-test them. Skewers outside the mask are left untouched.
    pub fn step<S: SpectralService>(
        &self,
        coll: &mut SkewerCollection<S>,
        state: DodgeState,
    ) -> Result<DodgeState> {
        let flagged = state.contaminated();
        log::info!("Number of skewers with DLAs = {}", flagged.len());
        if flagged.is_empty() {
            return Ok(state);
        }

        coll.displace(&flagged, state.dodge_axis, state.dodge_dist)?;
        coll.recompute_column_density(&flagged, &self.config.line.species)?;

        let mut mask = state.mask;
        for &i in &flagged {
            let still = coll
                .skewer(i)
                .map(|s| self.is_contaminated(&s.col_dens, state.window))
                .unwrap_or(false);
            mask[i] = still;
            coll.set_contaminated(i, still);
        }

        Ok(DodgeState {
            mask,
            iteration: state.iteration + 1,
            ..state
        })
    }

    /// Scan, dodge until the mask is empty, recompute optical depth for every
    /// skewer ever moved and persist the result.
    ///
    /// Returns [`Error::NonConvergence`] once `max_iterations` dodges leave
    /// skewers flagged. The collection keeps its partially dodged state, with
    /// optical depth re-extracted at the moved positions.
    pub fn run<S: SpectralService>(&self, coll: &mut SkewerCollection<S>) -> Result<DodgeReport> {
        let line = &self.config.line;
        let mut state = self.scan(coll)?;
        // τ for the undisplaced grid, so the artifact is complete
        coll.optical_depth(line)?;

        let mut displaced = BTreeSet::new();
        let mut history = Vec::new();
        while state.phase() != DodgePhase::Converged {
            if state.iteration() >= self.config.max_iterations {
                log::warn!(
                    "Giving up after {} iterations with {} contaminated skewers",
                    state.iteration(),
                    state.residual()
                );
                let moved: Vec<usize> = displaced.iter().copied().collect();
                coll.recompute_optical_depth(&moved, line)?;
                return Err(Error::NonConvergence {
                    iterations: state.iteration(),
                    residual: state.residual(),
                });
            }
            let flagged = state.contaminated();
            history.push(flagged.len());
            displaced.extend(flagged);
            state = self.step(coll, state)?;
        }
        log::info!(
            "Converged after {} iterations, {} skewers displaced",
            state.iteration(),
            displaced.len()
        );

        let moved: Vec<usize> = displaced.iter().copied().collect();
        coll.recompute_optical_depth(&moved, line)?;
        let artifact = coll.save_artifact(&self.config.savefile_root)?;

        Ok(DodgeReport {
            iterations: state.iteration(),
            displaced,
            history,
            artifact,
        })
    }
}
