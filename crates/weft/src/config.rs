//! Engine configuration.
//!
//! Every section has defaults and a partial JSON document overrides only the
//! fields it names:
//!
//! ```json
//! { "session": { "handshake_timeout": 2000, "batch_size": 128 } }
//! ```

use serde::{Deserialize, Serialize};

use weft_store::LogStoreConfig;
use weft_sync::SessionConfig;

use crate::error::{EngineError, Result};

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: LogStoreConfig,
    pub session: SessionConfig,
    pub materializer: MaterializerConfig,
}

impl EngineConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.store.event_capacity == 0 {
            return Err(EngineError::Config("store.event_capacity must be positive".into()));
        }
        if self.materializer.read_batch == 0 {
            return Err(EngineError::Config("materializer.read_batch must be positive".into()));
        }
        Ok(())
    }
}

/// Tuning for the [`Materializer`](crate::Materializer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// Entries read from a log per storage call.
    pub read_batch: u64,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self { read_batch: 256 }
    }
}
