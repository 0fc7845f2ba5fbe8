use std::{env, fs, num::NonZeroUsize, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::orchestra::error::{PipelineError, Result, Site};

/// The amount of units in the input stage.
pub const INPUT_UNITS: usize = 2;

const DEFAULT_STALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RESULTS_PATH: &str = "output.txt";

/// Shape and runtime settings of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Amount of hidden stages between the input and output stage.
    pub hidden_layers: usize,
    /// Units in every hidden stage and in the output stage.
    pub units_per_layer: NonZeroUsize,
    /// Upper bound for every blocking wait inside a pass.
    pub stall_timeout_ms: u64,
    /// Bytes buffered by each in-memory channel.
    pub channel_capacity: usize,
    /// Where the binary writes the results file, `None` disables it.
    pub results_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hidden_layers: 1,
            units_per_layer: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            channel_capacity: comms::DEFAULT_CAPACITY,
            results_path: Some(PathBuf::from(DEFAULT_RESULTS_PATH)),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with the given shape and default runtime settings.
    pub fn new(hidden_layers: usize, units_per_layer: NonZeroUsize) -> Self {
        Self {
            hidden_layers,
            units_per_layer,
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file, missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::invalid(Site::Setup, format!("cannot read '{}': {e}", path.display()))
        })?;

        Self::from_json_str(&content)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| PipelineError::invalid(Site::Setup, format!("invalid JSON: {e}")))
    }

    /// Applies `HIDDEN_LAYERS`, `UNITS_PER_LAYER`, `STALL_TIMEOUT_MS` and `RESULTS_PATH`
    /// from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides resolved through `lookup`.
    ///
    /// # Arguments
    /// * `lookup` - Maps a variable name to its value, if set.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` when a set variable doesn't parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HIDDEN_LAYERS") {
            self.hidden_layers = parse_var("HIDDEN_LAYERS", &value)?;
        }
        if let Some(value) = lookup("UNITS_PER_LAYER") {
            self.units_per_layer = parse_var("UNITS_PER_LAYER", &value)?;
        }
        if let Some(value) = lookup("STALL_TIMEOUT_MS") {
            self.stall_timeout_ms = parse_var("STALL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("RESULTS_PATH") {
            self.results_path = (!value.is_empty()).then(|| PathBuf::from(value));
        }

        Ok(self)
    }

    /// Checks the runtime settings.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` for a zero channel capacity or stall timeout.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::invalid(
                Site::Setup,
                "channel_capacity must be greater than 0",
            ));
        }
        if self.stall_timeout_ms == 0 {
            return Err(PipelineError::invalid(
                Site::Setup,
                "stall_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// The input stage, every hidden stage and the output stage.
    pub fn stage_count(&self) -> usize {
        self.hidden_layers + 2
    }

    /// The amount of units the stage at `index` runs.
    pub fn stage_units(&self, index: usize) -> usize {
        if index == 0 {
            INPUT_UNITS
        } else {
            self.units_per_layer.get()
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::invalid(Site::Setup, format!("{key} has an invalid value '{value}'")))
}
