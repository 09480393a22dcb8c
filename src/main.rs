use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use lya_boxes::{
    DlaDodger, FieldSnapshotService, RunConfig, SimulationConfig, SkewerCollection, SnapshotHeader,
    SpectralService, Velocity,
};

/// Grid skewers through a snapshot, optionally dodge DLAs, and print the
/// mean transmitted flux.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding `snapdir_NNN/` folders.
    snapshot_dir: PathBuf,
    snapshot_num: u32,
    /// Skewers per transverse axis.
    grid_width: usize,
    /// Pixel width in km/s.
    spectral_res: f64,
    /// Where the spectra cache is written.
    spectra_dir: PathBuf,
    /// JSON file with the cosmology the snapshot was run with.
    model_cosmology_file: PathBuf,
    /// Remove DLA-contaminated skewers before measuring the flux.
    #[arg(long)]
    dodge: bool,
    /// JSON run configuration; missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any cached spectra.
    #[arg(long)]
    reload: bool,
}

/// Cosmological parameters of the simulation run.
#[derive(Debug, Deserialize)]
struct CosmologyModel {
    little_h: f64,
    omega_m: f64,
}

fn check_cosmology(path: &Path, header: &SnapshotHeader) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading cosmology model {}", path.display()))?;
    let model: CosmologyModel = serde_json::from_str(&text)
        .with_context(|| format!("parsing cosmology model {}", path.display()))?;
    if (model.little_h - header.little_h).abs() > 1e-6 || (model.omega_m - header.omega_m).abs() > 1e-6 {
        log::warn!(
            "Cosmology model (h = {}, omega_m = {}) differs from snapshot (h = {}, omega_m = {})",
            model.little_h,
            model.omega_m,
            header.little_h,
            header.omega_m
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut run = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    run.reload_snapshot |= args.reload;

    let resolution = Velocity::new(args.spectral_res);
    let service = FieldSnapshotService::open(
        &args.snapshot_dir,
        args.snapshot_num,
        resolution,
        &args.spectra_dir,
    )?;
    check_cosmology(&args.model_cosmology_file, &service.header()?)?;

    let mut sim = SimulationConfig::new(&args.snapshot_dir, args.snapshot_num, args.grid_width, resolution);
    sim.reload_snapshot = run.reload_snapshot;
    sim.spectra_savefile_root = run.spectra_savefile_root.clone();

    let mut skewers = SkewerCollection::open(service, sim)?;
    log::info!("Gridded {} skewers", skewers.len());

    if args.dodge {
        let dodger = DlaDodger::new(run.dodge.clone())?;
        let report = dodger.run(&mut skewers)?;
        println!(
            "Dodged {} skewers in {} iterations, saved to {}",
            report.displaced.len(),
            report.iterations,
            report.artifact.display()
        );
    }

    let mean_flux = skewers.mean_flux(&run.dodge.line)?;
    println!("Mean flux = {mean_flux}");
    Ok(())
}
