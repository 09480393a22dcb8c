/// Data layer: skewer records, the extraction-service contract, and file I/O.
///
/// Architecture:
/// ```text
///  snapshot cube (.parquet)          power table (.csv / .json)
///        │                                   │
///        ▼                                   ▼
///   ┌──────────┐                        ┌──────────┐
///   │  service  │  sightlines → τ, N    │  loader   │  parse file → PowerTable
///   └──────────┘                        └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ Vec<Skewer>   │  position, τ, column density, flags
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  cache / dodged artifact (.parquet)
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod service;
