//! The immutable scan configuration record.
//!
//! Output files embed a serialized copy of the config; the `kind` label
//! (`scan`, `smartb`, `smartc`, `ping`) is a serialization parameter, not a
//! field, so the record never mutates after validation.

use crate::types::ScanMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Raw target expression as given (`-ip`, or the input file name).
    pub target: String,
    /// Raw port spec as given.
    pub ports: String,
    pub mode: ScanMode,
    /// Worker pool size.
    pub threads: usize,
    /// Active-rule escalation level.
    pub level: i32,
    /// Connect/read timeout, seconds.
    pub timeout: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            ports: "top1".to_string(),
            mode: ScanMode::Default,
            threads: 4000,
            level: 1,
            timeout: 2,
        }
    }
}

impl ScanConfig {
    /// Serialize with a sink-kind label injected. Pure: `self` is untouched.
    #[must_use]
    pub fn to_json(&self, kind: &str) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(kind.to_string()),
            );
        }
        value.to_string()
    }
}
