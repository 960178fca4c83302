use crate::{
    EngineError,
    Result,
    coordinator::DisplayConfig,
    physics::PhysicsConfig,
    processor::ProcessorConfig,
    queue::RetentionPolicy,
    replay::ReplayTimings,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    io,
    path::Path,
};
use tracing::info;

/// Every tunable of the engine. Each section falls back to its defaults when omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub physics: PhysicsConfig,
    pub processor: ProcessorConfig,
    pub display: DisplayConfig,
    pub replay: ReplayTimings,
    pub queue: RetentionPolicy,
}

impl EngineConfig {
    /// Reads a JSON config file. A missing or empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no engine config found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(EngineError::Config(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        Self::parse(&raw)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|err| err.to_string())
    }
}
