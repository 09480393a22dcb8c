use std::cell::RefCell;
use std::path::{Path, PathBuf};

use lya_boxes::data::loader::load_skewers;
use lya_boxes::data::service::CacheKey;
use lya_boxes::dodge::DodgePhase;
use lya_boxes::{
    ColumnDensity, ContaminationPolicy, DlaDodger, DodgeConfig, Error, GridAxis, Length, Position,
    SimulationConfig, SkewerCollection, SnapshotHeader, SpectralLine, SpectralService, Species,
    Velocity,
};

const THRESHOLD: f64 = 2.0e20;
const N_LOS: usize = 20;

/// Which positions carry an absorber.
enum Layout {
    /// A single DLA at one exact position.
    Point(Position),
    /// Every sightline with this x coordinate is contaminated.
    Wall(Length),
}

/// In-memory extraction backend that records every request.
struct ScriptedService {
    layout: Layout,
    spectra_dir: PathBuf,
    col_dens_calls: RefCell<Vec<Vec<Position>>>,
    tau_calls: RefCell<Vec<Vec<Position>>>,
}

impl ScriptedService {
    fn new(layout: Layout, spectra_dir: &Path) -> Self {
        Self {
            layout,
            spectra_dir: spectra_dir.to_path_buf(),
            col_dens_calls: RefCell::new(Vec::new()),
            tau_calls: RefCell::new(Vec::new()),
        }
    }

    fn is_dla(&self, p: &Position) -> bool {
        match self.layout {
            Layout::Point(at) => *p == at,
            Layout::Wall(x) => p.x == x,
        }
    }

    /// One spike in the middle of the sightline: 10 T inside a DLA, 0.1 T elsewhere.
    fn sightline(&self, p: &Position) -> Vec<f64> {
        let mut col = vec![0.0; N_LOS];
        col[N_LOS / 2] = if self.is_dla(p) { 10.0 * THRESHOLD } else { 0.1 * THRESHOLD };
        col
    }
}

impl SpectralService for ScriptedService {
    fn header(&self) -> anyhow::Result<SnapshotHeader> {
        Ok(SnapshotHeader {
            redshift: 2.0,
            little_h: 0.7,
            omega_m: 0.3,
            box_size: Length::new(3000.0),
            vmax: Velocity::new(200.0),
            dvbin: Velocity::new(10.0),
        })
    }

    fn optical_depth(
        &self,
        positions: &[Position],
        _line: &SpectralLine,
    ) -> anyhow::Result<Vec<Vec<f64>>> {
        self.tau_calls.borrow_mut().push(positions.to_vec());
        Ok(positions
            .iter()
            .map(|p| self.sightline(p).into_iter().map(|n| n * 1.0e-20).collect())
            .collect())
    }

    fn column_density(
        &self,
        positions: &[Position],
        _species: &Species,
    ) -> anyhow::Result<Vec<Vec<f64>>> {
        self.col_dens_calls.borrow_mut().push(positions.to_vec());
        Ok(positions.iter().map(|p| self.sightline(p)).collect())
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.spectra_dir.join(key.file_name())
    }
}

fn centre() -> Position {
    Position::new(Length::new(1000.0), Length::new(1000.0))
}

fn collection(layout: Layout, dir: &Path) -> SkewerCollection<ScriptedService> {
    let service = ScriptedService::new(layout, &dir.join("spectra"));
    let config = SimulationConfig::new(dir.join("snapshots"), 64, 3, Velocity::new(10.0));
    SkewerCollection::open(service, config).unwrap()
}

fn dodge_config() -> DodgeConfig {
    DodgeConfig {
        col_dens_threshold: ColumnDensity::new(THRESHOLD),
        dodge_dist: Length::new(10.0),
        dodge_axis: GridAxis::Y,
        ..DodgeConfig::default()
    }
}

#[test]
fn one_step_clears_a_single_dla_and_leaves_the_rest_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut coll = collection(Layout::Point(centre()), dir.path());
    let dodger = DlaDodger::new(dodge_config()).unwrap();

    let state = dodger.scan(&mut coll).unwrap();
    assert_eq!(state.window(), 10);
    assert_eq!(state.contaminated(), vec![4]);
    assert_eq!(state.phase(), DodgePhase::Dodging);

    let before: Vec<(*const f64, Vec<f64>)> = coll
        .skewers()
        .iter()
        .map(|s| (s.col_dens.as_ptr(), s.col_dens.clone()))
        .collect();

    let state = dodger.step(&mut coll, state).unwrap();
    assert_eq!(state.iteration(), 1);
    assert_eq!(state.phase(), DodgePhase::Converged);
    assert!(state.mask().iter().all(|m| !m));

    for (i, skewer) in coll.skewers().iter().enumerate() {
        if i == 4 {
            assert_ne!(skewer.col_dens, before[i].1);
            assert!(skewer.displaced);
        } else {
            assert_eq!(skewer.col_dens.as_ptr(), before[i].0);
            assert_eq!(skewer.col_dens, before[i].1);
            assert!(!skewer.displaced);
        }
    }
}

#[test]
fn end_to_end_run_persists_exactly_one_moved_skewer() {
    let dir = tempfile::tempdir().unwrap();
    let mut coll = collection(Layout::Point(centre()), dir.path());
    let dodger = DlaDodger::new(dodge_config()).unwrap();

    let report = dodger.run(&mut coll).unwrap();
    assert_eq!(report.iterations, 1);
    assert_eq!(report.history, vec![1]);
    assert_eq!(report.displaced.into_iter().collect::<Vec<_>>(), vec![4]);
    assert_eq!(
        report.artifact,
        dir.path()
            .join("snapshots/snapdir_064/gridded_spectra_DLAs_dodged_3_10.parquet")
    );

    // full grid once, then only the moved skewer
    let moved = Position::new(Length::new(1000.0), Length::new(1010.0));
    let col_calls = coll.service().col_dens_calls.borrow();
    assert_eq!(col_calls.len(), 2);
    assert_eq!(col_calls[0].len(), 9);
    assert_eq!(col_calls[1], vec![moved]);
    let tau_calls = coll.service().tau_calls.borrow();
    assert_eq!(tau_calls.len(), 2);
    assert_eq!(tau_calls[1], vec![moved]);

    let saved = load_skewers(&report.artifact).unwrap();
    assert_eq!(saved.len(), 9);
    let displaced: Vec<_> = saved.iter().filter(|s| s.displaced).collect();
    assert_eq!(displaced.len(), 1);
    assert_eq!(displaced[0].position, moved);
    assert!(!displaced[0].contaminated);
    let peak_tau = displaced[0].tau.iter().copied().fold(0.0, f64::max);
    assert!((peak_tau - 0.1 * THRESHOLD * 1.0e-20).abs() < 1e-12);
    assert!(saved.iter().all(|s| s.col_dens.len() == N_LOS));
}

#[test]
fn simple_max_policy_flags_the_same_skewer() {
    let dir = tempfile::tempdir().unwrap();
    let mut coll = collection(Layout::Point(centre()), dir.path());
    let config = DodgeConfig {
        policy: ContaminationPolicy::SimpleMax,
        ..dodge_config()
    };
    let state = DlaDodger::new(config).unwrap().scan(&mut coll).unwrap();
    assert_eq!(state.contaminated(), vec![4]);
    assert!(coll.skewer(4).unwrap().contaminated);
}

#[test]
fn a_wall_of_absorbers_hits_the_iteration_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut coll = collection(Layout::Wall(Length::new(1000.0)), dir.path());
    let config = DodgeConfig {
        max_iterations: 3,
        ..dodge_config()
    };

    let err = DlaDodger::new(config).unwrap().run(&mut coll).unwrap_err();
    match err {
        Error::NonConvergence {
            iterations,
            residual,
        } => {
            assert_eq!(iterations, 3);
            assert_eq!(residual, 3);
        }
        other => panic!("expected non-convergence, got {other}"),
    }

    // partially dodged state stays inspectable
    for i in [3, 4, 5] {
        let skewer = coll.skewer(i).unwrap();
        assert!(skewer.contaminated);
        assert_eq!(skewer.position.y, Length::new(1000.0 * (i - 3) as f64 + 30.0));
    }
    assert!(coll.skewers().iter().filter(|s| s.displaced).count() == 3);

    // optical depth follows the skewers to where they ended up
    let moved: Vec<Position> = (3..6).map(|i| coll.skewer(i).unwrap().position).collect();
    let tau_calls = coll.service().tau_calls.borrow();
    assert_eq!(tau_calls.len(), 2);
    assert_eq!(tau_calls[1], moved);
    for (i, at) in (3..6).zip(&moved) {
        let expected: Vec<f64> = coll.service().sightline(at).iter().map(|n| n * 1.0e-20).collect();
        assert_eq!(coll.skewer(i).unwrap().tau, expected);
    }
}

#[test]
fn a_clean_grid_needs_no_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let far_away = Position::new(Length::new(-1.0), Length::new(-1.0));
    let mut coll = collection(Layout::Point(far_away), dir.path());

    let report = DlaDodger::new(dodge_config()).unwrap().run(&mut coll).unwrap();
    assert_eq!(report.iterations, 0);
    assert!(report.displaced.is_empty());
    assert!(report.artifact.exists());
    assert_eq!(coll.service().col_dens_calls.borrow().len(), 1);
}

/// Which request of [`FailingService`] breaks.
#[derive(Clone, Copy)]
enum Breaks {
    Header,
    Extraction,
}

/// Backend whose snapshot turns out to be unreadable.
struct FailingService {
    breaks: Breaks,
    spectra_dir: PathBuf,
}

const UNREADABLE: &str = "snapshot 64 unreadable";

impl SpectralService for FailingService {
    fn header(&self) -> anyhow::Result<SnapshotHeader> {
        match self.breaks {
            Breaks::Header => anyhow::bail!(UNREADABLE),
            Breaks::Extraction => ScriptedService::new(Layout::Point(centre()), &self.spectra_dir).header(),
        }
    }

    fn optical_depth(&self, _: &[Position], _: &SpectralLine) -> anyhow::Result<Vec<Vec<f64>>> {
        anyhow::bail!(UNREADABLE)
    }

    fn column_density(&self, _: &[Position], _: &Species) -> anyhow::Result<Vec<Vec<f64>>> {
        anyhow::bail!(UNREADABLE)
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.spectra_dir.join(key.file_name())
    }
}

fn open_failing(breaks: Breaks, dir: &Path) -> lya_boxes::Result<SkewerCollection<FailingService>> {
    let service = FailingService {
        breaks,
        spectra_dir: dir.join("spectra"),
    };
    let config = SimulationConfig::new(dir.join("snapshots"), 64, 3, Velocity::new(10.0));
    SkewerCollection::open(service, config)
}

fn assert_service_failure(err: Error) {
    assert!(matches!(err, Error::Service(_)), "expected a service error, got {err}");
    let source = std::error::Error::source(&err).map(|s| s.to_string());
    assert_eq!(source.as_deref(), Some(UNREADABLE));
}

#[test]
fn service_failures_surface_with_their_message() {
    let dir = tempfile::tempdir().unwrap();

    let err = open_failing(Breaks::Header, dir.path()).err().unwrap();
    assert_service_failure(err);

    let mut coll = open_failing(Breaks::Extraction, dir.path()).unwrap();
    let err = coll.column_density(&Species::neutral_hydrogen()).unwrap_err();
    assert_service_failure(err);

    let err = DlaDodger::new(dodge_config()).unwrap().run(&mut coll).unwrap_err();
    assert_service_failure(err);
    assert!(!dir.path().join("snapshots/snapdir_064").exists());
}
