use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::ArrayView1;
use rayon::prelude::*;

use super::loader::{load_density_cube, load_skewer_set, write_skewers};
use super::model::{
    DensityCube, Position, SkewerProvenance, SkewerSet, SnapshotHeader, Skewer, SpectralLine, Species,
};
use crate::cosmology::Cosmology;
use crate::units::{HubbleRate, Length, Velocity};

// ---------------------------------------------------------------------------
// Naming of cache files and artifacts
// ---------------------------------------------------------------------------

/// Key of the service-owned skewer cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub savefile_root: String,
    pub grid_samps: usize,
    pub spectral_resolution: Velocity,
}

impl CacheKey {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.parquet",
            self.savefile_root,
            self.grid_samps,
            self.spectral_resolution.value()
        )
    }
}

/// Location of the file persisted at the end of a dodging run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactName {
    pub snapshot_dir: PathBuf,
    pub snapshot_num: u32,
    pub key: CacheKey,
}

impl ArtifactName {
    /// `{snapshot_dir}/snapdir_{num:03}/{root}_{grid}_{res}.parquet`
    pub fn path(&self) -> PathBuf {
        self.snapshot_dir
            .join(format!("snapdir_{:03}", self.snapshot_num))
            .join(self.key.file_name())
    }
}

// ---------------------------------------------------------------------------
// Service contract
// ---------------------------------------------------------------------------

/// A spectral-extraction backend: computes per-pixel optical depth and column
/// density along sightlines through one snapshot, and owns the on-disk cache.
///
/// Calls block until the backend is done. Failures are reported as-is.
pub trait SpectralService {
    fn header(&self) -> Result<SnapshotHeader>;

    /// One optical-depth array per position.
    fn optical_depth(&self, positions: &[Position], line: &SpectralLine) -> Result<Vec<Vec<f64>>>;

    /// One per-pixel column-density array (cm^-2) per position.
    fn column_density(&self, positions: &[Position], species: &Species) -> Result<Vec<Vec<f64>>>;

    fn cache_path(&self, key: &CacheKey) -> PathBuf;

    fn save(&self, path: &Path, skewers: &[Skewer], provenance: &SkewerProvenance) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        write_skewers(path, skewers, provenance)
    }

    /// Previously saved skewers, if the file exists.
    fn load(&self, path: &Path) -> Result<Option<SkewerSet>> {
        if !path.exists() {
            return Ok(None);
        }
        load_skewer_set(path).map(Some)
    }
}

// ---------------------------------------------------------------------------
// FieldSnapshotService – sightlines through a gridded H I density cube
// ---------------------------------------------------------------------------

const KPC_IN_CM: f64 = 3.085_677_581e21;
const KM_IN_CM: f64 = 1.0e5;
/// π e² / (m_e c) in cm² s⁻¹.
const CLASSICAL_LINE_CROSS_SECTION: f64 = 0.026_540_08;

/// Oscillator strength and rest wavelength (Angstrom) of supported lines.
fn line_parameters(line: &SpectralLine) -> Option<(f64, f64)> {
    match (line.species.element.as_str(), line.species.ion, line.wavelength) {
        ("H", 1, 1215) => Some((0.4164, 1215.67)),
        ("H", 1, 1025) => Some((0.079_14, 1025.72)),
        _ => None,
    }
}

/// Extraction service over a periodic neutral-hydrogen density cube.
///
/// Each pixel's column density is the density of the nearest cube cell times
/// the proper pixel length; its optical depth is the unbroadened line
/// cross-section times that column density over the pixel velocity width.
#[derive(Debug, Clone)]
pub struct FieldSnapshotService {
    cube: DensityCube,
    header: SnapshotHeader,
    spectra_dir: PathBuf,
}

impl FieldSnapshotService {
    /// `{snapshot_dir}/snapdir_{num:03}/snap_{num:03}.parquet`
    pub fn snapshot_path(snapshot_dir: &Path, snapshot_num: u32) -> PathBuf {
        snapshot_dir
            .join(format!("snapdir_{snapshot_num:03}"))
            .join(format!("snap_{snapshot_num:03}.parquet"))
    }

    pub fn open(
        snapshot_dir: &Path,
        snapshot_num: u32,
        resolution: Velocity,
        spectra_dir: &Path,
    ) -> Result<Self> {
        let path = Self::snapshot_path(snapshot_dir, snapshot_num);
        let cube = load_density_cube(&path)
            .with_context(|| format!("loading snapshot {snapshot_num}"))?;
        Self::from_cube(cube, resolution, spectra_dir)
    }

    pub fn from_cube(cube: DensityCube, resolution: Velocity, spectra_dir: &Path) -> Result<Self> {
        if !resolution.is_finite_positive() {
            bail!("spectral resolution must be positive, got {resolution}");
        }
        if cube.n_hi.is_empty() {
            bail!("density cube is empty");
        }
        let meta = cube.meta;
        let cosmology = Cosmology::new(
            meta.redshift,
            HubbleRate::new(100.0 * meta.little_h),
            meta.omega_m,
        )?;
        let scale_factor = 1.0 / (1.0 + meta.redshift);
        let vmax = (meta.box_size / meta.little_h).hubble_velocity(cosmology.hubble_z()) * scale_factor;
        let header = SnapshotHeader {
            redshift: meta.redshift,
            little_h: meta.little_h,
            omega_m: meta.omega_m,
            box_size: meta.box_size,
            vmax,
            dvbin: resolution,
        };
        log::debug!(
            "snapshot at z = {}: vmax = {}, {} pixels per sightline",
            header.redshift,
            header.vmax,
            (header.vmax / header.dvbin).floor()
        );
        Ok(Self {
            cube,
            header,
            spectra_dir: spectra_dir.to_path_buf(),
        })
    }

    fn n_pixels(&self) -> usize {
        (self.header.vmax / self.header.dvbin).floor() as usize
    }

    /// Proper length of one pixel in cm.
    fn pixel_length_cm(&self) -> f64 {
        let comoving = self.header.box_size / self.header.little_h / self.n_pixels() as f64;
        comoving.value() / (1.0 + self.header.redshift) * KPC_IN_CM
    }

    fn cell_index(&self, coord: Length, n: usize) -> usize {
        let frac = coord / self.header.box_size;
        ((frac * n as f64).floor() as i64).rem_euclid(n as i64) as usize
    }

    fn sightline(&self, position: &Position) -> ArrayView1<'_, f64> {
        let (nx, ny, _) = self.cube.n_hi.dim();
        let i = self.cell_index(position.x, nx);
        let j = self.cell_index(position.y, ny);
        self.cube.n_hi.slice(ndarray::s![i, j, ..])
    }

    fn pixel_column_density(&self, position: &Position) -> Vec<f64> {
        let line = self.sightline(position);
        let nz = line.len();
        let n_pix = self.n_pixels();
        let dl = self.pixel_length_cm();
        (0..n_pix)
            .map(|p| line[p * nz / n_pix] * dl)
            .collect()
    }
}

impl SpectralService for FieldSnapshotService {
    fn header(&self) -> Result<SnapshotHeader> {
        Ok(self.header)
    }

    fn optical_depth(&self, positions: &[Position], line: &SpectralLine) -> Result<Vec<Vec<f64>>> {
        let Some((f_osc, lambda)) = line_parameters(line) else {
            bail!("no line data for {line}");
        };
        let dv_cm = self.header.dvbin.value() * KM_IN_CM;
        let sigma = CLASSICAL_LINE_CROSS_SECTION * f_osc * lambda * 1.0e-8 / dv_cm;
        Ok(positions
            .par_iter()
            .map(|p| {
                self.pixel_column_density(p)
                    .into_iter()
                    .map(|n| sigma * n)
                    .collect()
            })
            .collect())
    }

    fn column_density(&self, positions: &[Position], species: &Species) -> Result<Vec<Vec<f64>>> {
        if *species != Species::neutral_hydrogen() {
            bail!("density cube only tracks H 1, not {species}");
        }
        Ok(positions
            .par_iter()
            .map(|p| self.pixel_column_density(p))
            .collect())
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.spectra_dir.join(key.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::CubeMeta;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn service(dir: &Path) -> FieldSnapshotService {
        let cube = DensityCube {
            meta: CubeMeta {
                redshift: 2.0,
                little_h: 0.7,
                omega_m: 0.3,
                box_size: Length::new(7000.0),
            },
            n_hi: Array3::from_shape_fn((4, 4, 8), |(i, j, _)| 1.0e-10 * (1 + i + 4 * j) as f64),
        };
        FieldSnapshotService::from_cube(cube, Velocity::new(20.0), dir).unwrap()
    }

    #[test]
    fn names_follow_snapshot_layout() {
        let key = CacheKey {
            savefile_root: "gridded_spectra".into(),
            grid_samps: 64,
            spectral_resolution: Velocity::new(10.0),
        };
        assert_eq!(key.file_name(), "gridded_spectra_64_10.parquet");
        let artifact = ArtifactName {
            snapshot_dir: PathBuf::from("/data/illustris"),
            snapshot_num: 64,
            key,
        };
        assert_eq!(
            artifact.path(),
            PathBuf::from("/data/illustris/snapdir_064/gridded_spectra_64_10.parquet")
        );
    }

    #[test]
    fn sightlines_pick_the_nearest_periodic_cell() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let header = svc.header().unwrap();
        let n_pix = svc.n_pixels();
        assert!(n_pix > 0);

        let a = Position::new(Length::new(0.0), Length::new(0.0));
        let wrapped = Position::new(Length::new(7000.0), Length::new(-0.1));
        let cd = svc.column_density(&[a, wrapped], &Species::neutral_hydrogen()).unwrap();
        assert_eq!(cd[0].len(), n_pix);
        // (7000, -0.1) wraps to cell (0, 3)
        assert_relative_eq!(cd[1][0] / cd[0][0], 13.0, max_relative = 1e-12);

        let tau = svc.optical_depth(&[a], &SpectralLine::lyman_alpha()).unwrap();
        assert_eq!(tau[0].len(), n_pix);
        assert!(tau[0][0] > 0.0);
        assert_relative_eq!(header.dvbin.value(), 20.0);
    }

    #[test]
    fn unsupported_lines_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let line = SpectralLine {
            species: Species {
                element: "C".into(),
                ion: 4,
            },
            wavelength: 1548,
        };
        assert!(svc.optical_depth(&[Position::default()], &line).is_err());
        assert!(svc.column_density(&[Position::default()], &line.species).is_err());
    }
}
