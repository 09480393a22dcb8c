use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lya_boxes::data::loader::write_density_cube;
use lya_boxes::data::model::{CubeMeta, DensityCube};
use lya_boxes::{FieldSnapshotService, Length};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Write a synthetic neutral-hydrogen density cube that `lya-boxes` can read
/// as a snapshot.
#[derive(Parser, Debug)]
struct Args {
    /// Directory holding `snapdir_NNN/` folders.
    #[arg(default_value = "sample_snapshots")]
    snapshot_dir: PathBuf,
    #[arg(long, default_value_t = 64)]
    snapshot_num: u32,
    /// Cells per transverse axis.
    #[arg(long, default_value_t = 32)]
    cells: usize,
    /// Cells along the line of sight.
    #[arg(long, default_value_t = 128)]
    los_cells: usize,
    /// Comoving box side in kpc/h.
    #[arg(long, default_value_t = 20_000.0)]
    box_size: f64,
    /// Number of damped absorbers dropped into the box.
    #[arg(long, default_value_t = 4)]
    clumps: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Mean background density in cm^-3; gives τ of order unity per pixel.
const BACKGROUND_N_HI: f64 = 5.0e-11;
/// Width of the lognormal background.
const LOGNORMAL_SIGMA: f64 = 1.0;
/// Peak density of a clump, enough to cross 2e20 cm^-2 over a few pixels.
const CLUMP_N_HI: f64 = 2.0e-3;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let (n, nz) = (args.cells, args.los_cells);
    if n == 0 || nz == 0 {
        bail!("cube needs at least one cell per axis, got {n}x{n}x{nz}");
    }
    let mut n_hi = Array3::from_shape_simple_fn((n, n, nz), || {
        let g: f64 = rng.sample(StandardNormal);
        BACKGROUND_N_HI * (LOGNORMAL_SIGMA * g - 0.5 * LOGNORMAL_SIGMA.powi(2)).exp()
    });

    for c in 0..args.clumps {
        let (ci, cj, cl) = (rng.gen_range(0..n), rng.gen_range(0..n), rng.gen_range(0..nz));
        let depth = rng.gen_range(2..=4) as f64;
        log::info!("clump {c} at cell ({ci}, {cj}, {cl}), depth {depth} cells");
        for l in 0..nz {
            // periodic distance along the sightline
            let d = (l as i64 - cl as i64).rem_euclid(nz as i64);
            let d = d.min(nz as i64 - d) as f64;
            n_hi[[ci, cj, l]] += CLUMP_N_HI * (-0.5 * (d / depth).powi(2)).exp();
        }
    }

    let cube = DensityCube {
        meta: CubeMeta {
            redshift: 2.0,
            little_h: 0.7,
            omega_m: 0.3,
            box_size: Length::new(args.box_size),
        },
        n_hi,
    };

    let path = FieldSnapshotService::snapshot_path(&args.snapshot_dir, args.snapshot_num);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    write_density_cube(&path, &cube)?;

    println!(
        "Wrote a {n}x{n}x{nz} density cube with {} clumps to {}",
        args.clumps,
        path.display()
    );
    Ok(())
}
