//! Solver contract: the per-step optimization a player delegates to.
//!
//! The controller treats the solver as a black box. It hands over the home,
//! this step's parameters, the previous step's optimal values and any
//! setpoint overrides, and gets back named optimal values plus the horizon
//! facts the observation needs.

pub mod heuristic;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::actions::Overrides;
use crate::config::ConfigError;
use crate::home::HomeSpec;
use crate::player::StepParams;
use crate::store::{SharedStore, StoreError};

pub use heuristic::HeuristicSolver;

/// Optimal value name carrying the grid power trajectory (kW).
pub const GRID_POWER_KEY: &str = "p_grid_opt";

/// Errors returned by a solver.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("problem is infeasible: {0}")]
    Infeasible(String),

    #[error("missing solver input: {0}")]
    MissingInput(String),

    #[error("invalid home parameter: {0}")]
    Params(ConfigError),

    #[error("solver failed: {0}")]
    Failed(String),
}

impl From<ConfigError> for SolveError {
    fn from(e: ConfigError) -> Self {
        SolveError::Params(e)
    }
}

/// One named solver result: a scalar or a trajectory over the horizon.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimalValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl OptimalValue {
    /// Value for the current step: the scalar, or the head of a series.
    pub fn current(&self) -> Option<f64> {
        match self {
            OptimalValue::Scalar(v) => Some(*v),
            OptimalValue::Series(s) => s.first().copied(),
        }
    }

    /// Store encoding: decimal text for scalars, a JSON array for series.
    pub fn to_store_text(&self) -> String {
        match self {
            OptimalValue::Scalar(v) => v.to_string(),
            OptimalValue::Series(s) => serde_json::to_string(s).unwrap_or_else(|_| "[]".into()),
        }
    }

    pub fn from_store_text(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with('[') {
            serde_json::from_str(raw).ok().map(OptimalValue::Series)
        } else {
            raw.parse().ok().map(OptimalValue::Scalar)
        }
    }
}

/// Named solver outputs for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimalVals {
    values: BTreeMap<String, OptimalValue>,
}

impl OptimalVals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: OptimalValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&OptimalValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptimalValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Grid power for the current step, if the solver produced one.
    pub fn grid_power(&self) -> Option<f64> {
        self.get(GRID_POWER_KEY).and_then(OptimalValue::current)
    }

    /// Writes every value into hash `key`, one field per name.
    pub fn persist(&self, store: &dyn SharedStore, key: &str) -> Result<(), StoreError> {
        for (name, value) in &self.values {
            store.put(key, name, &value.to_store_text())?;
        }
        Ok(())
    }

    /// Reads values written by [`persist`](Self::persist). Fields that do
    /// not decode are skipped.
    pub fn load(store: &dyn SharedStore, key: &str) -> Result<Self, StoreError> {
        let mut vals = Self::new();
        for (name, raw) in store.get(key)? {
            match OptimalValue::from_store_text(&raw) {
                Some(value) => vals.insert(name, value),
                None => tracing::debug!("skipping undecodable optimal value {key}.{name}: {raw:?}"),
            }
        }
        Ok(vals)
    }
}

impl FromIterator<(String, OptimalValue)> for OptimalVals {
    fn from_iter<I: IntoIterator<Item = (String, OptimalValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Horizon facts derived by the solver alongside its optimal values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorizonView {
    /// Occupancy for each horizon step.
    pub occupancy: Vec<bool>,
    /// Water drawn this step as a fraction of tank volume.
    pub draw_fraction: f64,
    /// Outside air temperature for each horizon step (°C).
    pub oat_forecast: Vec<f64>,
    /// First horizon index at which the occupants leave.
    pub leaving_index: Option<usize>,
    /// First horizon index at which the occupants return.
    pub returning_index: Option<usize>,
}

impl HorizonView {
    /// Builds a view, locating leave and return transitions in `occupancy`.
    pub fn new(occupancy: Vec<bool>, draw_fraction: f64, oat_forecast: Vec<f64>) -> Self {
        let transition = |from: bool| {
            occupancy
                .windows(2)
                .position(|w| w[0] == from && w[1] != from)
                .map(|i| i + 1)
        };
        let leaving_index = transition(true);
        let returning_index = transition(false);
        Self {
            occupancy,
            draw_fraction,
            oat_forecast,
            leaving_index,
            returning_index,
        }
    }
}

/// Everything a solver receives for one step.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub home: &'a HomeSpec,
    pub params: &'a StepParams,
    /// Previous step's optimal values; `None` on the initial solve and at
    /// timestep 0.
    pub previous: Option<&'a OptimalVals>,
    pub overrides: Overrides,
}

/// A solver's result for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverOutput {
    pub optimal_vals: OptimalVals,
    pub horizon: HorizonView,
}

/// Per-step home optimizer.
pub trait HomeSolver: Send {
    /// Solves one step.
    ///
    /// # Errors
    ///
    /// Returns a [`SolveError`] when the problem is infeasible or the inputs
    /// are incomplete. Callers do not retry.
    fn solve(&mut self, request: &SolveRequest<'_>) -> Result<SolverOutput, SolveError>;
}

impl<S: HomeSolver + ?Sized> HomeSolver for Box<S> {
    fn solve(&mut self, request: &SolveRequest<'_>) -> Result<SolverOutput, SolveError> {
        (**self).solve(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn series_current_value_is_head() {
        assert_eq!(OptimalValue::Series(vec![2.5, 1.0]).current(), Some(2.5));
        assert_eq!(OptimalValue::Series(vec![]).current(), None);
        assert_eq!(OptimalValue::Scalar(-1.0).current(), Some(-1.0));
    }

    #[test]
    fn persisted_values_load_back() {
        let store = MemoryStore::new();
        let mut vals = OptimalVals::new();
        vals.insert(GRID_POWER_KEY, OptimalValue::Series(vec![1.5, 2.0]));
        vals.insert("temp_in_opt", OptimalValue::Scalar(21.0));
        vals.persist(&store, "home-a").unwrap();

        assert_eq!(
            store.get_field("home-a", GRID_POWER_KEY).unwrap().as_deref(),
            Some("[1.5,2.0]")
        );
        let loaded = OptimalVals::load(&store, "home-a").unwrap();
        assert_eq!(loaded, vals);
        assert_eq!(loaded.grid_power(), Some(1.5));
    }

    #[test]
    fn undecodable_fields_are_skipped() {
        let store = MemoryStore::new();
        store.put("home-a", "status", "solved").unwrap();
        store.put("home-a", "cost_opt", "0.42").unwrap();
        let loaded = OptimalVals::load(&store, "home-a").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("cost_opt"));
    }

    #[test]
    fn horizon_locates_transitions() {
        let view = HorizonView::new(vec![true, true, false, false, true], 0.0, vec![]);
        assert_eq!(view.leaving_index, Some(2));
        assert_eq!(view.returning_index, Some(4));

        let view = HorizonView::new(vec![true; 4], 0.0, vec![]);
        assert_eq!(view.leaving_index, None);
        assert_eq!(view.returning_index, None);
    }
}
