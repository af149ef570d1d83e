//! Persistence layer for durable attributes
//!
//! Values are kept in a flat JSON object keyed by
//! `"<endpoint>/<cluster>/<attribute>"` and written to a single file. The
//! engine writes a key whenever a durable attribute changes and reads the
//! keys back at start-up.

use crate::error::{EvseError, Result};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Cluster names used in persistence keys
pub const ENERGY_EVSE_CLUSTER: &str = "EnergyEvse";
pub const VALVE_CLUSTER: &str = "ValveConfigurationAndControl";

/// Key of one attribute on one endpoint
pub fn attribute_key(endpoint: u16, cluster: &str, attribute: &str) -> String {
    format!("{}/{}/{}", endpoint, cluster, attribute)
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    state: Map<String, Value>,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager; nothing is read until [`PersistenceManager::load`]
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            state: Map::new(),
            logger: get_logger("persistence"),
        }
    }

    /// Create a manager and load whatever is on disk
    pub fn open(file_path: &str) -> Result<Self> {
        let mut manager = Self::new(file_path);
        manager.load()?;
        Ok(manager)
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Load state from disk
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            self.state = Map::new();
            return Ok(());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => self.state = map,
            other => {
                return Err(EvseError::persistence(format!(
                    "Expected a JSON object in {}, found {}",
                    self.file_path, other
                )));
            }
        }
        self.logger.info(&format!(
            "Loaded {} persisted values from disk",
            self.state.len()
        ));

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.file_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    /// Get a value from persistent state
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let value = self.state.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                self.logger
                    .warn(&format!("Ignoring persisted value for {}: {}", key, e));
                None
            }
        }
    }

    /// Whether a key is stored (a stored `null` counts)
    pub fn contains(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// Set a value in persistent state
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.state.insert(key.to_string(), value);
        Ok(())
    }

    /// Set a value and write the file
    pub fn store<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        self.set(key, value)?;
        self.save()
    }

    /// Merge the keys of a JSON object into the state
    pub fn update(&mut self, updates: Value) -> Result<()> {
        match updates {
            Value::Object(map) => {
                for (key, value) in map {
                    self.state.insert(key, value);
                }
                Ok(())
            }
            other => Err(EvseError::persistence(format!(
                "Updates must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Remove a key; true if it was present
    pub fn remove(&mut self, key: &str) -> bool {
        self.state.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}
