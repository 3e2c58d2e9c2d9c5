//! Static home configuration loaded once from the shared store.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::config::ConfigError;
use crate::store::{ListRange, SharedStore, StoreError};

/// List of unclaimed home names. Claiming pops the head.
pub const HOME_QUEUE_KEY: &str = "home_queue";

/// Errors raised while loading static configuration from the store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Config(ConfigError),
}

impl From<ConfigError> for LoadError {
    fn from(e: ConfigError) -> Self {
        LoadError::Config(e)
    }
}

fn missing(key: &str, field: &str) -> LoadError {
    LoadError::Config(ConfigError {
        field: format!("{key}.{field}"),
        message: "required store field is missing".into(),
    })
}

/// Global simulation settings published by the setup process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationMeta {
    /// Number of simulated hours.
    pub total_timesteps: usize,
}

impl SimulationMeta {
    /// Reads `simulation.nsteps`.
    pub fn load(store: &dyn SharedStore) -> Result<Self, LoadError> {
        let raw = store
            .get_field("simulation", "nsteps")?
            .ok_or_else(|| missing("simulation", "nsteps"))?;
        let total_timesteps = raw.trim().parse::<usize>().map_err(|e| ConfigError {
            field: "simulation.nsteps".into(),
            message: format!("expected unsigned integer, got {raw:?} ({e})"),
        })?;
        Ok(Self { total_timesteps })
    }
}

bitflags! {
    /// Equipment present in a home, resolved once from its type tags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const HVAC = 1;
        const WATER_HEATER = 1 << 1;
        const BATTERY = 1 << 2;
        const PV = 1 << 3;
        const EV = 1 << 4;
    }
}

impl Capabilities {
    /// Resolves capabilities from a home's type tags.
    ///
    /// Tags may be a JSON array (`["hvac","wh"]`) or a delimited string
    /// (`"battery_and_pv"`). HVAC and water heater are fitted in every home.
    pub fn from_type_tags(raw: &str) -> (Self, Vec<String>) {
        let tags: Vec<String> = serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
            raw.split(|c: char| !c.is_ascii_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_ascii_lowercase)
                .collect()
        });

        let mut caps = Capabilities::HVAC | Capabilities::WATER_HEATER;
        for tag in &tags {
            match tag.as_str() {
                "battery" => caps |= Capabilities::BATTERY,
                "pv" => caps |= Capabilities::PV,
                "ev" => caps |= Capabilities::EV,
                _ => {}
            }
        }
        (caps, tags)
    }
}

/// Raw equipment parameters with typed accessors.
///
/// Parameter semantics belong to the solver; the player only carries them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    key: String,
    values: BTreeMap<String, String>,
}

impl ParamSet {
    pub fn new(key: impl Into<String>, values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            key: key.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Store key this set was read from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Reads a numeric field.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming `key.field` if the field is absent or
    /// not a number.
    pub fn f64(&self, field: &str) -> Result<f64, ConfigError> {
        let raw = self.get(field).ok_or_else(|| ConfigError {
            field: format!("{}.{field}", self.key),
            message: "missing".into(),
        })?;
        raw.trim().parse::<f64>().map_err(|_| ConfigError {
            field: format!("{}.{field}", self.key),
            message: format!("expected number, got {raw:?}"),
        })
    }

    /// Reads a numeric field, falling back to `default` when absent.
    pub fn f64_or(&self, field: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(field) {
            Some(_) => self.f64(field),
            None => Ok(default),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One occupied interval from the weekday schedule, in hours of the day.
///
/// `start_hour > end_hour` wraps past midnight (`[19, 8]` is 19:00 to 08:00).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyWindow {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl OccupancyWindow {
    pub fn contains(&self, hour: f64) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Immutable per-home configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeSpec {
    pub name: String,
    pub type_tags: Vec<String>,
    pub capabilities: Capabilities,
    /// `home_values` fields other than `name` and `type`.
    pub home: ParamSet,
    pub hvac: ParamSet,
    pub wh: ParamSet,
    pub hems: ParamSet,
    /// Present iff `capabilities` contains `BATTERY`.
    pub battery: Option<ParamSet>,
    /// Present iff `capabilities` contains `PV`.
    pub pv: Option<ParamSet>,
    pub draw_sizes: Vec<f64>,
    pub weekday_occ_schedule: Vec<OccupancyWindow>,
}

impl HomeSpec {
    /// Claims a home from the queue if one is available, otherwise reads the
    /// plain schema keys.
    pub fn load(store: &dyn SharedStore) -> Result<Self, LoadError> {
        let suffix = store.pop_front(HOME_QUEUE_KEY)?;
        if let Some(name) = &suffix {
            tracing::info!("claimed home record {name}");
        }
        Self::load_keys(store, suffix.as_deref())
    }

    /// Reads a home record. With `Some(suffix)` every key is read as
    /// `<key>:<suffix>`.
    pub fn load_keys(store: &dyn SharedStore, suffix: Option<&str>) -> Result<Self, LoadError> {
        let key = |base: &str| match suffix {
            Some(s) => format!("{base}:{s}"),
            None => base.to_string(),
        };

        let home_key = key("home_values");
        let mut home = store.get(&home_key)?;
        let name = home
            .remove("name")
            .ok_or_else(|| missing(&home_key, "name"))?;
        let raw_type = home
            .remove("type")
            .ok_or_else(|| missing(&home_key, "type"))?;
        let (capabilities, type_tags) = Capabilities::from_type_tags(&raw_type);

        let read_set = |base: &str| -> Result<ParamSet, LoadError> {
            let k = key(base);
            Ok(ParamSet::new(k.clone(), store.get(&k)?))
        };

        let hvac = read_set("hvac_values")?;
        let wh = read_set("wh_values")?;
        let hems = read_set("hems_values")?;
        for set in [&hvac, &wh, &hems] {
            if set.is_empty() {
                return Err(LoadError::Config(ConfigError {
                    field: set.key().to_string(),
                    message: "required parameter set is missing".into(),
                }));
            }
        }
        let battery = if capabilities.contains(Capabilities::BATTERY) {
            Some(read_set("battery_values")?)
        } else {
            None
        };
        let pv = if capabilities.contains(Capabilities::PV) {
            Some(read_set("pv_values")?)
        } else {
            None
        };

        let draw_key = key("draw_sizes");
        let draw_sizes = store
            .get_list(&draw_key, ListRange::ALL)?
            .iter()
            .enumerate()
            .map(|(i, v)| crate::store::parse_f64(&draw_key, &i.to_string(), v))
            .collect::<Result<Vec<_>, _>>()?;

        let occ_key = key("weekday_occ_schedule");
        let weekday_occ_schedule = store
            .get_list(&occ_key, ListRange::ALL)?
            .iter()
            .enumerate()
            .map(|(i, v)| parse_window(&occ_key, i, v))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("loaded home {name} ({})", type_tags.join(","));

        Ok(Self {
            name,
            type_tags,
            capabilities,
            home: ParamSet::new(home_key, home),
            hvac,
            wh,
            hems,
            battery,
            pv,
            draw_sizes,
            weekday_occ_schedule,
        })
    }

    /// HEMS steps per simulated hour (`hems_values.sub_subhourly_steps`,
    /// default 1).
    pub fn steps_per_hour(&self) -> usize {
        self.hems
            .get("sub_subhourly_steps")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1)
    }

    /// Solver look-ahead in steps: `hems_values.prediction_horizon` hours
    /// (default 6) times [`steps_per_hour`](Self::steps_per_hour).
    pub fn horizon_steps(&self) -> usize {
        let hours = self
            .hems
            .get("prediction_horizon")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(6);
        hours * self.steps_per_hour()
    }

    /// Whether anyone is home at `hour` of the day. An empty schedule means
    /// always occupied.
    pub fn occupied_at(&self, hour: f64) -> bool {
        self.weekday_occ_schedule.is_empty()
            || self.weekday_occ_schedule.iter().any(|w| w.contains(hour))
    }
}

/// Parses `"[19, 8]"` (or `"19,8"`) into an occupied interval.
fn parse_window(key: &str, index: usize, raw: &str) -> Result<OccupancyWindow, LoadError> {
    let parts: Vec<&str> = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .collect();
    let malformed = || {
        LoadError::Config(ConfigError {
            field: format!("{key}[{index}]"),
            message: format!("expected a [start, end] hour pair, got {raw:?}"),
        })
    };
    let [start, end] = parts.as_slice() else {
        return Err(malformed());
    };
    Ok(OccupancyWindow {
        start_hour: start.parse().map_err(|_| malformed())?,
        end_hour: end.parse().map_err(|_| malformed())?,
    })
}
