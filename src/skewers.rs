use std::path::PathBuf;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::cosmology::{Cosmology, GridAxis, GridGeometry};
use crate::data::model::{Position, SkewerProvenance, SnapshotHeader, Skewer, SpectralLine, Species};
use crate::data::service::{ArtifactName, CacheKey, SpectralService};
use crate::error::{Error, Result};
use crate::fourier::FrequencyGrid;
use crate::units::{HubbleRate, Length, Velocity};

// ---------------------------------------------------------------------------
// Simulation box configuration
// ---------------------------------------------------------------------------

/// Which snapshot to grid and how finely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub snapshot_num: u32,
    pub snapshot_dir: PathBuf,
    /// Skewers per transverse axis.
    pub grid_samps: usize,
    pub spectral_resolution: Velocity,
    /// Recompute spectra instead of reusing the service cache.
    #[serde(default)]
    pub reload_snapshot: bool,
    #[serde(default = "default_savefile_root")]
    pub spectra_savefile_root: String,
}

fn default_savefile_root() -> String {
    "gridded_spectra".to_string()
}

impl SimulationConfig {
    pub fn new(snapshot_dir: impl Into<PathBuf>, snapshot_num: u32, grid_samps: usize, spectral_resolution: Velocity) -> Self {
        Self {
            snapshot_num,
            snapshot_dir: snapshot_dir.into(),
            grid_samps,
            spectral_resolution,
            reload_snapshot: false,
            spectra_savefile_root: default_savefile_root(),
        }
    }

    fn cache_key(&self) -> CacheKey {
        self.artifact_key(&self.spectra_savefile_root)
    }

    fn artifact_key(&self, savefile_root: &str) -> CacheKey {
        CacheKey {
            savefile_root: savefile_root.to_string(),
            grid_samps: self.grid_samps,
            spectral_resolution: self.spectral_resolution,
        }
    }
}

// ---------------------------------------------------------------------------
// SkewerCollection
// ---------------------------------------------------------------------------

/// A fixed-size grid of skewers through one snapshot.
///
/// Skewers live in an arena indexed by transverse grid position
/// (`ix * grid_samps + iy`). The arena never changes size; recomputation
/// methods take the exact set of indices to touch and leave every other
/// record as it was.
pub struct SkewerCollection<S> {
    service: S,
    config: SimulationConfig,
    header: SnapshotHeader,
    cosmology: Cosmology,
    geometry: GridGeometry,
    skewers: Vec<Skewer>,
    /// Line and species the current arrays were extracted for.
    provenance: SkewerProvenance,
}

impl<S: SpectralService> SkewerCollection<S> {
    /// Lay a `grid_samps × grid_samps` skewer grid over the snapshot, or
    /// reuse the service cache when one exists and reloading was not asked for.
    pub fn open(service: S, config: SimulationConfig) -> Result<Self> {
        let header = service.header().map_err(Error::Service)?;
        let cosmology = Cosmology::new(
            header.redshift,
            HubbleRate::new(100.0 * header.little_h),
            header.omega_m,
        )?;
        let geometry = GridGeometry::from_snapshot(&header, config.grid_samps)?;
        log::info!(
            "Size of voxels in velocity units = [{}, {}, {}]",
            geometry.voxel_velocity(GridAxis::X),
            geometry.voxel_velocity(GridAxis::Y),
            geometry.voxel_velocity(GridAxis::Z)
        );

        let n = config.grid_samps;
        let cached = if config.reload_snapshot {
            None
        } else {
            let path = service.cache_path(&config.cache_key());
            service.load(&path).map_err(Error::Service)?
        };

        let n_los = geometry.samples(GridAxis::Z);
        let (skewers, provenance) = match cached {
            Some(set) if set.skewers.len() == n * n => {
                log::info!("Reusing {} cached skewers", set.skewers.len());
                // recorded provenance only counts when every array is whole
                let has_tau = set.skewers.iter().all(|s| s.tau.len() == n_los);
                let has_col = set.skewers.iter().all(|s| s.col_dens.len() == n_los);
                let provenance = SkewerProvenance {
                    tau_line: set.provenance.tau_line.filter(|_| has_tau),
                    col_dens_species: set.provenance.col_dens_species.filter(|_| has_col),
                };
                (set.skewers, provenance)
            }
            Some(set) => {
                log::warn!(
                    "Ignoring cache with {} skewers, expected {}",
                    set.skewers.len(),
                    n * n
                );
                (grid_skewers(header.box_size, n), SkewerProvenance::default())
            }
            None => (grid_skewers(header.box_size, n), SkewerProvenance::default()),
        };

        Ok(Self {
            service,
            config,
            header,
            cosmology,
            geometry,
            skewers,
            provenance,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn cosmology(&self) -> &Cosmology {
        &self.cosmology
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Wavenumber grids over the skewer grid.
    pub fn frequency_grid(&self) -> FrequencyGrid {
        FrequencyGrid::new(&self.geometry)
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn len(&self) -> usize {
        self.skewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skewers.is_empty()
    }

    pub fn skewers(&self) -> &[Skewer] {
        &self.skewers
    }

    pub fn skewer(&self, index: usize) -> Option<&Skewer> {
        self.skewers.get(index)
    }

    fn los_samples(&self) -> usize {
        self.geometry.samples(GridAxis::Z)
    }

    // -- extraction ---------------------------------------------------------

    /// Per-pixel optical depth of every skewer, `(n_skewers, n_los)`.
    ///
    /// Extracted through the service on first use (or when a different line
    /// is asked for), then written to the service cache.
    pub fn optical_depth(&mut self, line: &SpectralLine) -> Result<Array2<f64>> {
        if self.provenance.tau_line.as_ref() != Some(line) {
            let all: Vec<usize> = (0..self.skewers.len()).collect();
            self.recompute_optical_depth(&all, line)?;
            self.save_cache()?;
        }
        self.stack(|s| &s.tau)
    }

    /// Per-pixel column density of every skewer in cm^-2, `(n_skewers, n_los)`.
    pub fn column_density(&mut self, species: &Species) -> Result<Array2<f64>> {
        if self.provenance.col_dens_species.as_ref() != Some(species) {
            let all: Vec<usize> = (0..self.skewers.len()).collect();
            self.recompute_column_density(&all, species)?;
            self.save_cache()?;
        }
        self.stack(|s| &s.col_dens)
    }

    /// Column density summed along each skewer, one scalar per skewer.
    pub fn total_column_density(&mut self, species: &Species) -> Result<Vec<f64>> {
        self.column_density(species)?;
        Ok(self.skewers.iter().map(Skewer::total_column_density).collect())
    }

    /// Mean transmitted flux ⟨exp(−τ)⟩ over every pixel of every skewer.
    pub fn mean_flux(&mut self, line: &SpectralLine) -> Result<f64> {
        let tau = self.optical_depth(line)?;
        Ok(tau.mapv(|t| (-t).exp()).mean().unwrap_or(0.0))
    }

    /// δ_F = exp(−τ) / ⟨exp(−τ)⟩ − 1 on the `(n, n, n_los)` grid.
    pub fn flux_contrast_realization(&mut self, line: &SpectralLine) -> Result<Array3<f64>> {
        let flux = self.optical_depth(line)?.mapv(|t| (-t).exp());
        let mean = flux.mean().unwrap_or(0.0);
        if !(mean.is_finite() && mean > 0.0) {
            return Err(Error::config(format!(
                "mean transmitted flux is {mean}; the flux contrast is undefined"
            )));
        }
        let n = self.config.grid_samps;
        let n_los = self.los_samples();
        let delta = flux.mapv(|f| f / mean - 1.0);
        delta
            .into_shape((n, n, n_los))
            .map_err(|_| Error::Shape {
                what: "flux contrast grid",
                expected: vec![n, n, n_los],
                found: vec![self.skewers.len(), n_los],
            })
    }

    // -- index-addressed updates -------------------------------------------

    /// Move the skewers at `indices` by `distance` along a transverse axis.
    pub fn displace(&mut self, indices: &[usize], axis: GridAxis, distance: Length) -> Result<()> {
        if axis.is_line_of_sight() {
            return Err(Error::config(
                "skewers cannot be displaced along the line of sight",
            ));
        }
        self.check_indices(indices)?;
        for &i in indices {
            let skewer = &mut self.skewers[i];
            skewer.position = skewer.position.shifted(axis, distance)?;
            skewer.displaced = true;
        }
        Ok(())
    }

    /// Re-extract column density for exactly `indices`.
    ///
    /// Updating only part of the grid for a different species leaves the
    /// arrays mixed, so the whole grid is re-extracted on the next
    /// [`column_density`](Self::column_density) call.
    pub fn recompute_column_density(&mut self, indices: &[usize], species: &Species) -> Result<()> {
        let fresh = self.extract(indices, |svc, pos| svc.column_density(pos, species))?;
        for (&i, values) in indices.iter().zip(fresh) {
            self.skewers[i].col_dens = values;
        }
        if self.provenance.col_dens_species.as_ref() != Some(species) {
            self.provenance.col_dens_species = self.covers_all(indices).then(|| species.clone());
        }
        Ok(())
    }

    /// Re-extract optical depth for exactly `indices`, with the same
    /// bookkeeping as [`recompute_column_density`](Self::recompute_column_density).
    pub fn recompute_optical_depth(&mut self, indices: &[usize], line: &SpectralLine) -> Result<()> {
        let fresh = self.extract(indices, |svc, pos| svc.optical_depth(pos, line))?;
        for (&i, values) in indices.iter().zip(fresh) {
            self.skewers[i].tau = values;
        }
        if self.provenance.tau_line.as_ref() != Some(line) {
            self.provenance.tau_line = self.covers_all(indices).then(|| line.clone());
        }
        Ok(())
    }

    /// Line and species the current arrays belong to.
    pub fn provenance(&self) -> &SkewerProvenance {
        &self.provenance
    }

    fn covers_all(&self, indices: &[usize]) -> bool {
        let mut seen = vec![false; self.skewers.len()];
        indices.iter().for_each(|&i| seen[i] = true);
        seen.into_iter().all(|s| s)
    }

    pub(crate) fn set_contaminated(&mut self, index: usize, contaminated: bool) {
        if let Some(skewer) = self.skewers.get_mut(index) {
            skewer.contaminated = contaminated;
        }
    }

    fn extract<F>(&self, indices: &[usize], call: F) -> Result<Vec<Vec<f64>>>
    where
        F: FnOnce(&S, &[Position]) -> anyhow::Result<Vec<Vec<f64>>>,
    {
        self.check_indices(indices)?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let positions: Vec<Position> = indices.iter().map(|&i| self.skewers[i].position).collect();
        let fresh = call(&self.service, &positions).map_err(Error::Service)?;
        if fresh.len() != indices.len() {
            return Err(Error::Shape {
                what: "service response",
                expected: vec![indices.len()],
                found: vec![fresh.len()],
            });
        }
        let n_los = self.los_samples();
        if let Some(bad) = fresh.iter().find(|v| v.len() != n_los) {
            return Err(Error::Shape {
                what: "sightline samples",
                expected: vec![n_los],
                found: vec![bad.len()],
            });
        }
        Ok(fresh)
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|&&i| i >= self.skewers.len()) {
            Some(i) => Err(Error::config(format!(
                "skewer index {i} out of range for {} skewers",
                self.skewers.len()
            ))),
            None => Ok(()),
        }
    }

    fn stack<F>(&self, field: F) -> Result<Array2<f64>>
    where
        F: Fn(&Skewer) -> &Vec<f64>,
    {
        let n_los = self.los_samples();
        let mut out = Array2::zeros((self.skewers.len(), n_los));
        for (mut row, skewer) in out.outer_iter_mut().zip(&self.skewers) {
            let values = field(skewer);
            if values.len() != n_los {
                return Err(Error::Shape {
                    what: "sightline samples",
                    expected: vec![n_los],
                    found: vec![values.len()],
                });
            }
            row.iter_mut().zip(values).for_each(|(dst, v)| *dst = *v);
        }
        Ok(out)
    }

    // -- persistence --------------------------------------------------------

    fn save_cache(&self) -> Result<()> {
        let path = self.service.cache_path(&self.config.cache_key());
        self.service
            .save(&path, &self.skewers, &self.provenance)
            .map_err(Error::Service)
    }

    /// Where a run saved under `savefile_root` ends up.
    pub fn artifact_name(&self, savefile_root: &str) -> ArtifactName {
        ArtifactName {
            snapshot_dir: self.config.snapshot_dir.clone(),
            snapshot_num: self.config.snapshot_num,
            key: self.config.artifact_key(savefile_root),
        }
    }

    /// Persist the current skewers as a named artifact and return its path.
    pub fn save_artifact(&self, savefile_root: &str) -> Result<PathBuf> {
        let path = self.artifact_name(savefile_root).path();
        self.service
            .save(&path, &self.skewers, &self.provenance)
            .map_err(Error::Service)?;
        log::info!("Saved {} skewers to {}", self.skewers.len(), path.display());
        Ok(path)
    }
}

/// Skewers on the regular transverse grid, cell corners at `i · L / n`.
fn grid_skewers(box_size: Length, n: usize) -> Vec<Skewer> {
    let step = box_size / n as f64;
    (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| Skewer::at(Position::new(step * i as f64, step * j as f64)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{CubeMeta, DensityCube};
    use crate::data::service::FieldSnapshotService;
    use approx::assert_abs_diff_eq;

    fn collection(dir: &std::path::Path) -> SkewerCollection<FieldSnapshotService> {
        let cube = DensityCube {
            meta: CubeMeta {
                redshift: 2.0,
                little_h: 0.7,
                omega_m: 0.3,
                box_size: Length::new(6000.0),
            },
            n_hi: Array3::from_shape_fn((4, 4, 16), |(i, j, l)| {
                1.0e-11 * (1.0 + 0.5 * ((i + 2 * j + l) % 5) as f64)
            }),
        };
        let svc = FieldSnapshotService::from_cube(cube, Velocity::new(10.0), dir).unwrap();
        let config = SimulationConfig::new(dir, 7, 4, Velocity::new(10.0));
        SkewerCollection::open(svc, config).unwrap()
    }

    #[test]
    fn lays_skewers_on_the_transverse_grid() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path());
        assert_eq!(coll.len(), 16);
        assert_eq!(coll.skewers()[0].position, Position::default());
        assert_eq!(
            coll.skewers()[6].position,
            Position::new(Length::new(1500.0), Length::new(3000.0))
        );
        let [nx, ny, _] = coll.geometry().n_samp();
        assert_eq!((nx, ny), (4, 4));
    }

    #[test]
    fn flux_contrast_has_zero_mean() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = collection(dir.path());
        let line = SpectralLine::lyman_alpha();
        let delta = coll.flux_contrast_realization(&line).unwrap();
        let n_los = coll.geometry().samples(GridAxis::Z);
        assert_eq!(delta.dim(), (4, 4, n_los));
        assert_abs_diff_eq!(delta.mean().unwrap(), 0.0, epsilon = 1e-12);
        assert!(delta.iter().any(|d| d.abs() > 1e-6));
    }

    #[test]
    fn extraction_is_cached_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = collection(dir.path());
        let species = Species::neutral_hydrogen();
        let first = coll.column_density(&species).unwrap();
        let cache = dir.path().join("gridded_spectra_4_10.parquet");
        assert!(cache.exists());

        // a second collection over the same cache starts from the saved state
        let reopened = collection(dir.path());
        assert_eq!(reopened.skewers()[5].col_dens, first.row(5).to_vec());
    }

    #[test]
    fn total_column_density_sums_each_sightline() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = collection(dir.path());
        let species = Species::neutral_hydrogen();
        let totals = coll.total_column_density(&species).unwrap();
        let per_pixel = coll.column_density(&species).unwrap();
        assert_eq!(totals.len(), 16);
        for (total, row) in totals.iter().zip(per_pixel.outer_iter()) {
            assert_abs_diff_eq!(*total, row.sum(), epsilon = 1e-9 * row.sum());
            assert!(*total > 0.0);
        }
        // cells differ along the grid so the sums do too
        assert!(totals.iter().any(|t| (t - totals[0]).abs() > 1e-6 * totals[0]));
    }

    #[test]
    fn a_partial_update_for_another_line_forgets_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = collection(dir.path());
        let alpha = SpectralLine::lyman_alpha();
        let beta = SpectralLine {
            species: Species::neutral_hydrogen(),
            wavelength: 1025,
        };
        coll.optical_depth(&alpha).unwrap();
        assert_eq!(coll.provenance().tau_line, Some(alpha.clone()));

        coll.recompute_optical_depth(&[2], &alpha).unwrap();
        assert_eq!(coll.provenance().tau_line, Some(alpha.clone()));

        coll.recompute_optical_depth(&[2], &beta).unwrap();
        assert_eq!(coll.provenance().tau_line, None);
        let all: Vec<usize> = (0..coll.len()).collect();
        coll.recompute_optical_depth(&all, &beta).unwrap();
        assert_eq!(coll.provenance().tau_line, Some(beta));
    }

    #[test]
    fn displacement_touches_only_the_given_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = collection(dir.path());
        let before: Vec<Position> = coll.skewers().iter().map(|s| s.position).collect();
        coll.displace(&[3, 9], GridAxis::Y, Length::new(10.0)).unwrap();
        for (i, s) in coll.skewers().iter().enumerate() {
            if i == 3 || i == 9 {
                assert_eq!(s.position.y, before[i].y + Length::new(10.0));
                assert!(s.displaced);
            } else {
                assert_eq!(s.position, before[i]);
                assert!(!s.displaced);
            }
        }
        assert!(coll.displace(&[0], GridAxis::Z, Length::new(1.0)).is_err());
        assert!(coll.displace(&[99], GridAxis::X, Length::new(1.0)).is_err());
    }
}
