//! Player configuration: TOML run settings and the JSON state/action file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::actions::{ActionKind, ActionSpace};
use crate::channel::{BarrierConfig, MatchMode};

/// Top-level player configuration parsed from TOML.
///
/// Every section is optional; missing values take the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub barrier: BarrierSection,
    #[serde(default)]
    pub run: RunConfig,
    /// In-process community used by `local` mode.
    #[serde(default)]
    pub local: LocalConfig,
}

/// Shared store and pub/sub connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Server URL for `run` mode.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost".to_string(),
        }
    }
}

/// Barrier wait tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BarrierSection {
    /// First receive wait (ms).
    pub poll_initial_ms: u64,
    /// Cap for the doubled receive wait (ms).
    pub poll_max_ms: u64,
    /// Give up on a wait after this long. Unset waits forever.
    pub deadline_secs: Option<f64>,
    /// `"exact"` or `"substring"`.
    pub match_mode: MatchMode,
}

impl Default for BarrierSection {
    fn default() -> Self {
        Self {
            poll_initial_ms: 100,
            poll_max_ms: 1000,
            deadline_secs: None,
            match_mode: MatchMode::Exact,
        }
    }
}

/// Run loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// State/action JSON file. Unset uses the built-in selection.
    pub state_action: Option<PathBuf>,
    /// Steps to run; unset runs `simulation.nsteps` hours.
    pub steps: Option<usize>,
    /// Seed for the random action policy.
    pub seed: u64,
    /// `"random"` or `"none"`.
    pub policy: String,
    /// Where to write the score JSON. Defaults to `score.json`.
    pub score_out: Option<PathBuf>,
    /// Where to write per-step CSV records.
    pub telemetry_out: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state_action: None,
            steps: None,
            seed: 42,
            policy: "random".to_string(),
            score_out: Some(PathBuf::from("score.json")),
            telemetry_out: None,
        }
    }
}

/// In-process community settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// Scenario preset that seeds the store.
    pub preset: String,
    /// Number of players (and homes).
    pub homes: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            preset: "baseline".to_string(),
            homes: 3,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"barrier.poll_max_ms"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl PlayerConfig {
    /// Available action policies.
    pub const POLICIES: &[&str] = &["random", "none"];

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Barrier settings in runtime form.
    pub fn barrier_config(&self) -> BarrierConfig {
        let b = &self.barrier;
        BarrierConfig {
            poll_initial: Duration::from_millis(b.poll_initial_ms),
            poll_max: Duration::from_millis(b.poll_max_ms),
            deadline: b
                .deadline_secs
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(Duration::from_secs_f64),
            match_mode: b.match_mode,
        }
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let b = &self.barrier;
        if b.poll_initial_ms == 0 {
            errors.push(ConfigError {
                field: "barrier.poll_initial_ms".into(),
                message: "must be > 0".into(),
            });
        }
        if b.poll_max_ms < b.poll_initial_ms {
            errors.push(ConfigError {
                field: "barrier.poll_max_ms".into(),
                message: "must be >= barrier.poll_initial_ms".into(),
            });
        }
        if let Some(d) = b.deadline_secs.filter(|d| !(d.is_finite() && *d > 0.0)) {
            errors.push(ConfigError {
                field: "barrier.deadline_secs".into(),
                message: format!("must be a positive number of seconds, got {d}"),
            });
        }

        let r = &self.run;
        if !Self::POLICIES.contains(&r.policy.as_str()) {
            errors.push(ConfigError {
                field: "run.policy".into(),
                message: format!(
                    "must be one of {}, got \"{}\"",
                    Self::POLICIES.join(", "),
                    r.policy
                ),
            });
        }
        if r.steps == Some(0) {
            errors.push(ConfigError {
                field: "run.steps".into(),
                message: "must be > 0".into(),
            });
        }

        if self.local.homes == 0 {
            errors.push(ConfigError {
                field: "local.homes".into(),
                message: "must be > 0".into(),
            });
        }

        errors
    }
}

/// Observable states and controllable actions, in the JSON layout
/// `{"states": {"<name>": true, ...}, "actions": {"<name>": true, ...}}`.
///
/// Key order in the file is observation order, and only names mapped to
/// `true` are enabled.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateActionConfig {
    #[serde(default)]
    pub states: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub actions: serde_json::Map<String, serde_json::Value>,
}

impl Default for StateActionConfig {
    fn default() -> Self {
        let enable = |names: &[&str]| {
            names
                .iter()
                .map(|n| (n.to_string(), serde_json::Value::Bool(true)))
                .collect()
        };
        Self {
            states: enable(&[
                "time_of_day",
                "occupancy_status",
                "oat_current",
                "community_demand",
                "my_demand",
            ]),
            actions: enable(&["hvac_setpoint", "wh_setpoint"]),
        }
    }
}

impl StateActionConfig {
    /// Parses the state/action file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "state_action".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError {
            field: "state_action".to_string(),
            message: e.to_string(),
        })
    }

    fn enabled(map: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
        map.iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Enabled state names in file order.
    pub fn enabled_states(&self) -> Vec<String> {
        Self::enabled(&self.states)
    }

    pub fn enabled_actions(&self) -> Vec<String> {
        Self::enabled(&self.actions)
    }

    /// Builds the action space from the enabled actions.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first unknown action.
    pub fn action_space(&self) -> Result<ActionSpace, ConfigError> {
        let kinds = self
            .enabled_actions()
            .iter()
            .map(|name| {
                name.parse::<ActionKind>().map_err(|message| ConfigError {
                    field: format!("actions.{name}"),
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ActionSpace::new(kinds))
    }

    /// Validates all entries and returns a list of errors.
    ///
    /// Unknown state names are not errors: they may name solver outputs,
    /// which are only known at run time.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (section, map) in [("states", &self.states), ("actions", &self.actions)] {
            for (name, value) in map {
                if !value.is_boolean() {
                    errors.push(ConfigError {
                        field: format!("{section}.{name}"),
                        message: format!("must be true or false, got {value}"),
                    });
                }
            }
        }
        for name in self.enabled_actions() {
            if let Err(message) = name.parse::<ActionKind>() {
                errors.push(ConfigError {
                    field: format!("actions.{name}"),
                    message,
                });
            }
        }
        errors
    }
}
