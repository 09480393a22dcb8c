use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dodge::DodgeConfig;

/// Everything a run takes beyond the positional snapshot arguments.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "reload_snapshot": true, "dodge": { "dodge_dist": 25.0, "policy": "simple_max" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Re-extract spectra instead of reusing the service cache.
    pub reload_snapshot: bool,
    /// Root name of the service cache file.
    pub spectra_savefile_root: String,
    pub dodge: DodgeConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reload_snapshot: false,
            spectra_savefile_root: "gridded_spectra".to_string(),
            dodge: DodgeConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .dodge
            .validate()
            .with_context(|| format!("invalid dodge section in {}", path.display()))?;
        Ok(config)
    }
}
