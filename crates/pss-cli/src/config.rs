use std::fs;
use std::path::Path;

use anyhow::Context;
use pss_lobj::LargeObjectConfig;
use pss_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Tool configuration, read from a TOML file with `[store]` and
/// `[large_object]` tables. Missing keys take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub large_object: LargeObjectConfig,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
