//! Step data: per-step parameters, controller state, and step records.

use std::fmt;

use crate::actions::Overrides;
use crate::config::ConfigError;
use crate::home::LoadError;
use crate::observation::Observation;
use crate::solver::{OptimalVals, SolverOutput};
use crate::store::{ListRange, SharedStore, parse_f64};

/// Hash holding the community's current timestep and aggregate demand.
pub const CURRENT_VALUES_KEY: &str = "current_values";

/// Weather and market lists, indexed by timestep.
pub const OAT_KEY: &str = "OAT";
pub const GHI_KEY: &str = "GHI";
pub const PRICE_KEY: &str = "SPP";

/// Simulation parameters re-read from the store at the start of every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepParams {
    /// Community timestep published by the aggregator.
    pub timestep: usize,
    /// Aggregate community demand (kW), once the aggregator has published one.
    pub current_demand: Option<f64>,
    /// Outside air temperature over the horizon (°C).
    pub oat: Vec<f64>,
    /// Global horizontal irradiance over the horizon (W/m²).
    pub ghi: Vec<f64>,
    /// Energy price over the horizon ($/kWh).
    pub price: Vec<f64>,
}

impl StepParams {
    /// Reads `current_values` and the `horizon`-step window of each
    /// weather and price list starting at the current timestep.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Config`] if `current_values.timestep` is absent
    /// or not an unsigned integer.
    pub fn fetch(store: &dyn SharedStore, horizon: usize) -> Result<Self, LoadError> {
        let current = store.get(CURRENT_VALUES_KEY)?;
        let raw = current.get("timestep").ok_or_else(|| ConfigError {
            field: format!("{CURRENT_VALUES_KEY}.timestep"),
            message: "required store field is missing".into(),
        })?;
        let timestep = raw.trim().parse::<usize>().map_err(|_| ConfigError {
            field: format!("{CURRENT_VALUES_KEY}.timestep"),
            message: format!("expected unsigned integer, got {raw:?}"),
        })?;
        let current_demand = parse_demand(current.get("current_demand").map(String::as_str))?;

        let range = ListRange {
            start: timestep as isize,
            stop: (timestep + horizon.max(1)) as isize - 1,
        };
        let window = |key: &str| -> Result<Vec<f64>, LoadError> {
            let raw = store.get_list(key, range)?;
            raw.iter()
                .enumerate()
                .map(|(i, v)| parse_f64(key, &(timestep + i).to_string(), v).map_err(Into::into))
                .collect()
        };

        Ok(Self {
            timestep,
            current_demand,
            oat: window(OAT_KEY)?,
            ghi: window(GHI_KEY)?,
            price: window(PRICE_KEY)?,
        })
    }

    /// Re-reads only the aggregate demand.
    pub fn fetch_current_demand(store: &dyn SharedStore) -> Result<Option<f64>, LoadError> {
        let raw = store.get_field(CURRENT_VALUES_KEY, "current_demand")?;
        parse_demand(raw.as_deref())
    }
}

fn parse_demand(raw: Option<&str>) -> Result<Option<f64>, LoadError> {
    match raw.map(str::trim) {
        None | Some("") | Some("None") => Ok(None),
        Some(v) => Ok(Some(parse_f64(CURRENT_VALUES_KEY, "current_demand", v)?)),
    }
}

/// Grid power published at each completed step, in step order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandProfile(Vec<f64>);

impl DemandProfile {
    pub fn push(&mut self, grid_kw: f64) {
        self.0.push(grid_kw);
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Mutable state owned by a step controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepState {
    /// Completed steps.
    pub timestep: usize,
    /// Parameters of the most recent solve.
    pub params: StepParams,
    /// Most recent solver output.
    pub output: SolverOutput,
    /// Optimal values persisted by the previous step.
    pub previous: Option<OptimalVals>,
    pub demand: DemandProfile,
}

/// What a completed step hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    /// Always zero; reward shaping is left to the caller.
    pub reward: f64,
    /// Always false; the caller's loop bound decides the horizon.
    pub done: bool,
    pub info: Vec<(String, String)>,
}

/// One completed step, kept for reporting and export.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Community timestep the step ran at.
    pub timestep: usize,
    pub overrides: Overrides,
    /// Published grid power (kW).
    pub grid_kw: f64,
    /// Aggregate demand after the step's barrier (kW).
    pub community_demand: Option<f64>,
    pub cost: Option<f64>,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        write!(
            f,
            "t={:>3} | grid={:>7.3} kW  community={:>8} kW | hvac_sp={:>6}  wh_sp={:>6}  ev={:>6} | cost={}",
            self.timestep,
            self.grid_kw,
            opt(self.community_demand),
            opt(self.overrides.hvac_setpoint),
            opt(self.overrides.wh_setpoint),
            opt(self.overrides.ev_charge),
            opt(self.cost),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set_hash(CURRENT_VALUES_KEY, [("timestep", "2"), ("current_demand", "12.5")])
            .unwrap();
        store
            .push_list(OAT_KEY, ["20", "21", "22", "23", "24", "25"])
            .unwrap();
        store.push_list(PRICE_KEY, ["0.1", "0.2", "0.3"]).unwrap();
        store
    }

    #[test]
    fn fetch_reads_horizon_window_from_timestep() {
        let store = seeded();
        let p = StepParams::fetch(&store, 3).unwrap();
        assert_eq!(p.timestep, 2);
        assert_eq!(p.current_demand, Some(12.5));
        assert_eq!(p.oat, vec![22.0, 23.0, 24.0]);
        assert_eq!(p.price, vec![0.3]);
        assert!(p.ghi.is_empty());
    }

    #[test]
    fn missing_timestep_is_config_error() {
        let store = MemoryStore::new();
        let err = StepParams::fetch(&store, 1).unwrap_err();
        assert!(err.to_string().contains("current_values.timestep"));
    }

    #[test]
    fn unset_demand_reads_as_none() {
        let store = MemoryStore::new();
        store
            .set_hash(CURRENT_VALUES_KEY, [("timestep", "0"), ("current_demand", "None")])
            .unwrap();
        assert_eq!(StepParams::fetch(&store, 1).unwrap().current_demand, None);
        assert_eq!(StepParams::fetch_current_demand(&store).unwrap(), None);
    }

    #[test]
    fn malformed_list_entry_names_index() {
        let store = seeded();
        store.push_list(GHI_KEY, ["0", "0", "bright"]).unwrap();
        let err = StepParams::fetch(&store, 2).unwrap_err();
        assert!(err.to_string().contains("GHI.2"));
    }

    #[test]
    fn step_record_display_does_not_panic() {
        let r = StepRecord {
            timestep: 4,
            overrides: Overrides {
                wh_setpoint: Some(47.0),
                ..Overrides::default()
            },
            grid_kw: 1.25,
            community_demand: None,
            cost: Some(0.3),
        };
        assert!(r.to_string().contains("t=  4"));
    }
}
