//! Engine configuration
//!
//! Deserializable from TOML; every knob has a default so an empty config is
//! valid.

use serde::{Deserialize, Serialize};

/// Tunables for the matching core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum resting orders per book side; `None` disables the check.
    pub max_order_book_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_order_book_size: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
