//! Layered `fbs.conf.json` configuration.
//!
//! Configuration files are discovered along the ancestor chain of the plan
//! directory and merged root-to-leaf: a record present in a descendant file
//! replaces the ancestor's record for the same discoverer-id wholesale
//! (no deep merge).

use std::collections::HashMap;

use camino::Utf8Path;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "fbs.conf.json";

/// The merged view over every `fbs.conf.json` on the ancestor chain.
///
/// Per-discoverer records stay opaque JSON until a discoverer asks for its
/// own record with a concrete type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discoverers: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Load and merge configuration for the given start directory.
    pub fn load(start: &Utf8Path) -> Result<Self, ConfigError> {
        let mut chain = Vec::new();
        for dir in start.ancestors() {
            let path = dir.join(CONFIG_FILE_NAME);
            if path.is_file() {
                chain.push(path);
            }
        }

        let mut config = Config::default();
        // Ancestors first, so leaf records win.
        for path in chain.into_iter().rev() {
            let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let layer: Config =
                serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;

            for (id, record) in layer.discoverers {
                config.discoverers.insert(id, record);
            }
        }

        Ok(config)
    }

    /// Deserialise the record for one discoverer-id, if present.
    pub fn discoverer<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, ConfigError> {
        let Some(record) = self.discoverers.get(id) else {
            return Ok(None);
        };

        serde_json::from_value(record.clone())
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: id.into(),
                source,
            })
    }

    pub fn has_discoverer(&self, id: &str) -> bool {
        self.discoverers.contains_key(id)
    }
}
