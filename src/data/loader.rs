use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Float64Builder, Int64Array,
    LargeListArray, ListArray, ListBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::Array3;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::Deserialize;

use super::model::{CubeMeta, DensityCube, Position, Skewer, SkewerProvenance, SkewerSet};
use crate::units::Length;

const CUBE_META_KEY: &str = "lya_boxes.cube_meta";
const SKEWER_PROVENANCE_KEY: &str = "lya_boxes.skewer_provenance";

// ---------------------------------------------------------------------------
// Power tables
// ---------------------------------------------------------------------------

/// A tabulated power spectrum, `power[i] = P(k[i])`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PowerTable {
    pub k: Vec<f64>,
    pub power: Vec<f64>,
}

/// Load a power table.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`  – header row with `k` and `power` columns
/// * `.json` – `{ "k": [...], "power": [...] }`
pub fn load_power_table(path: &Path) -> Result<PowerTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => load_power_csv(path),
        "json" => {
            let text = std::fs::read_to_string(path).context("reading JSON file")?;
            serde_json::from_str(&text).context("parsing JSON power table")
        }
        other => bail!("Unsupported power table extension: .{other}"),
    }
}

fn load_power_csv(path: &Path) -> Result<PowerTable> {
    #[derive(Deserialize)]
    struct Row {
        k: f64,
        power: f64,
    }

    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let mut table = PowerTable {
        k: Vec::new(),
        power: Vec::new(),
    };
    for (row_no, result) in reader.deserialize::<Row>().enumerate() {
        let row = result.with_context(|| format!("CSV row {row_no}"))?;
        table.k.push(row.k);
        table.power.push(row.power);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Skewer files (service cache and dodged artifacts)
// ---------------------------------------------------------------------------

fn f64_list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        false,
    )
}

fn build_f64_list<'a>(rows: impl Iterator<Item = &'a [f64]>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Write skewers to a Parquet file.
///
/// Schema: `x`, `y` (Float64), `tau`, `col_dens` (List<Float64>),
/// `contaminated`, `displaced` (Boolean).  The line and species the arrays
/// belong to travel in the schema metadata as JSON.
pub fn write_skewers(path: &Path, skewers: &[Skewer], provenance: &SkewerProvenance) -> Result<()> {
    let provenance =
        serde_json::to_string(provenance).context("encoding skewer provenance")?;
    let schema = Arc::new(
        Schema::new(vec![
            Field::new("x", DataType::Float64, false),
            Field::new("y", DataType::Float64, false),
            f64_list_field("tau"),
            f64_list_field("col_dens"),
            Field::new("contaminated", DataType::Boolean, false),
            Field::new("displaced", DataType::Boolean, false),
        ])
        .with_metadata(HashMap::from([(
            SKEWER_PROVENANCE_KEY.to_string(),
            provenance,
        )])),
    );

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from_iter_values(
            skewers.iter().map(|s| s.position.x.value()),
        )),
        Arc::new(Float64Array::from_iter_values(
            skewers.iter().map(|s| s.position.y.value()),
        )),
        build_f64_list(skewers.iter().map(|s| s.tau.as_slice())),
        build_f64_list(skewers.iter().map(|s| s.col_dens.as_slice())),
        Arc::new(BooleanArray::from(
            skewers.iter().map(|s| s.contaminated).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            skewers.iter().map(|s| s.displaced).collect::<Vec<_>>(),
        )),
    ];
    write_batch(path, schema, columns)
}

/// Read skewers written by [`write_skewers`].
pub fn load_skewers(path: &Path) -> Result<Vec<Skewer>> {
    load_skewer_set(path).map(|set| set.skewers)
}

/// Read skewers and their provenance.  Files without provenance metadata
/// load with an empty provenance, so none of their arrays are trusted.
pub fn load_skewer_set(path: &Path) -> Result<SkewerSet> {
    let (metadata, batches) = read_batches(path)?;
    let provenance = match metadata.get(SKEWER_PROVENANCE_KEY) {
        Some(json) => serde_json::from_str(json).context("parsing skewer provenance")?,
        None => SkewerProvenance::default(),
    };

    let mut skewers = Vec::new();
    for batch in batches {
        let x = f64_column(&batch, "x")?;
        let y = f64_column(&batch, "y")?;
        let tau = column(&batch, "tau")?;
        let col_dens = column(&batch, "col_dens")?;
        let contaminated = bool_column(&batch, "contaminated")?;
        let displaced = bool_column(&batch, "displaced")?;

        for row in 0..batch.num_rows() {
            skewers.push(Skewer {
                position: Position::new(Length::new(x.value(row)), Length::new(y.value(row))),
                tau: extract_f64_list(tau, row)
                    .with_context(|| format!("Row {row}: failed to read 'tau'"))?,
                col_dens: extract_f64_list(col_dens, row)
                    .with_context(|| format!("Row {row}: failed to read 'col_dens'"))?,
                contaminated: contaminated.value(row),
                displaced: displaced.value(row),
            });
        }
    }
    Ok(SkewerSet {
        provenance,
        skewers,
    })
}

// ---------------------------------------------------------------------------
// Density cubes (snapshot input of the field-backed extraction service)
// ---------------------------------------------------------------------------

/// Write a density cube: one row per transverse cell, `ix`, `iy` (Int64)
/// and the line-of-sight column `n_hi` (List<Float64>).  Snapshot quantities
/// travel in the schema metadata as JSON.
pub fn write_density_cube(path: &Path, cube: &DensityCube) -> Result<()> {
    let (nx, ny, _) = cube.n_hi.dim();
    let meta = serde_json::to_string(&cube.meta).context("encoding cube metadata")?;
    let schema = Arc::new(
        Schema::new(vec![
            Field::new("ix", DataType::Int64, false),
            Field::new("iy", DataType::Int64, false),
            f64_list_field("n_hi"),
        ])
        .with_metadata(HashMap::from([(CUBE_META_KEY.to_string(), meta)])),
    );

    let cells: Vec<(usize, usize)> = (0..nx)
        .flat_map(|i| (0..ny).map(move |j| (i, j)))
        .collect();
    let sightlines: Vec<Vec<f64>> = cells
        .iter()
        .map(|&(i, j)| cube.n_hi.slice(ndarray::s![i, j, ..]).to_vec())
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(cells.iter().map(|c| c.0 as i64))),
        Arc::new(Int64Array::from_iter_values(cells.iter().map(|c| c.1 as i64))),
        build_f64_list(sightlines.iter().map(|s| s.as_slice())),
    ];
    write_batch(path, schema, columns)
}

/// Load a density cube written by [`write_density_cube`].
pub fn load_density_cube(path: &Path) -> Result<DensityCube> {
    let (metadata, batches) = read_batches(path)
        .with_context(|| format!("loading density cube {}", path.display()))?;
    let meta: CubeMeta = metadata
        .get(CUBE_META_KEY)
        .context("density cube is missing its snapshot metadata")
        .and_then(|json| serde_json::from_str(json).context("parsing cube metadata"))?;

    let mut cells: Vec<(usize, usize, Vec<f64>)> = Vec::new();
    for batch in batches {
        let ix = i64_column(&batch, "ix")?;
        let iy = i64_column(&batch, "iy")?;
        let n_hi = column(&batch, "n_hi")?;
        for row in 0..batch.num_rows() {
            let line = extract_f64_list(n_hi, row)
                .with_context(|| format!("Row {row}: failed to read 'n_hi'"))?;
            let (i, j) = (ix.value(row), iy.value(row));
            if i < 0 || j < 0 {
                bail!("Row {row}: negative cell index ({i}, {j})");
            }
            cells.push((i as usize, j as usize, line));
        }
    }

    let nx = cells.iter().map(|c| c.0 + 1).max().unwrap_or(0);
    let ny = cells.iter().map(|c| c.1 + 1).max().unwrap_or(0);
    let nz = cells.first().map(|c| c.2.len()).unwrap_or(0);
    if nx * ny != cells.len() || nz == 0 {
        bail!(
            "density cube has {} sightlines, expected a full {nx}x{ny} grid with non-empty columns",
            cells.len()
        );
    }
    let mut n_hi = Array3::zeros((nx, ny, nz));
    let mut filled = vec![false; nx * ny];
    for (i, j, line) in cells {
        if std::mem::replace(&mut filled[i * ny + j], true) {
            bail!("cell ({i}, {j}) appears more than once");
        }
        if line.len() != nz {
            bail!("cell ({i}, {j}) has {} samples, expected {nz}", line.len());
        }
        for (l, v) in line.into_iter().enumerate() {
            n_hi[[i, j, l]] = v;
        }
    }
    Ok(DensityCube { meta, n_hi })
}

// -- Parquet / Arrow helpers --

fn write_batch(path: &Path, schema: Arc<Schema>, columns: Vec<ArrayRef>) -> Result<()> {
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Schema metadata plus every record batch of a Parquet file.
fn read_batches(path: &Path) -> Result<(HashMap<String, String>, Vec<RecordBatch>)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening parquet file {}", path.display()))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let metadata = builder.schema().metadata().clone();
    let reader = builder.build().context("building parquet reader")?;
    let batches = reader
        .map(|batch| batch.context("reading parquet record batch"))
        .collect::<Result<Vec<_>>>()?;
    Ok((metadata, batches))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))?;
    Ok(batch.column(idx))
}

fn f64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Float64Array>()
        .with_context(|| format!("column '{name}' is not Float64"))
}

fn i64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Int64Array>()
        .with_context(|| format!("column '{name}' is not Int64"))
}

fn bool_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BooleanArray> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<BooleanArray>()
        .with_context(|| format!("column '{name}' is not Boolean"))
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}
