//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use home_player::actions::{ActionKind, ActionSpace, Overrides};
use home_player::channel::{BarrierConfig, MatchMode};
use home_player::player::{CURRENT_VALUES_KEY, GHI_KEY, OAT_KEY, PRICE_KEY, PlayerSettings};
use home_player::solver::{
    GRID_POWER_KEY, HomeSolver, OptimalVals, OptimalValue, SolveError, SolveRequest, SolverOutput,
};
use home_player::store::MemoryStore;

/// Short polls and a deadline so a stuck protocol fails the test instead of
/// hanging it.
pub fn fast_barrier(deadline_ms: u64) -> BarrierConfig {
    BarrierConfig {
        poll_initial: Duration::from_millis(5),
        poll_max: Duration::from_millis(25),
        deadline: Some(Duration::from_millis(deadline_ms)),
        match_mode: MatchMode::Exact,
    }
}

/// Settings for a player observing `states` and controlling hvac and wh.
pub fn hvac_wh_settings(states: &[&str], deadline_ms: u64) -> PlayerSettings {
    PlayerSettings {
        actions: ActionSpace::new([ActionKind::HvacSetpoint, ActionKind::WhSetpoint]),
        states: states.iter().map(|s| s.to_string()).collect(),
        barrier: fast_barrier(deadline_ms),
    }
}

/// One hvac+wh home named `home-a` with `nsteps` hourly steps and a
/// two-step horizon.
pub fn single_home_store(nsteps: usize) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store
        .set_hash("simulation", [("nsteps", nsteps.to_string())])
        .unwrap();
    store
        .set_hash(CURRENT_VALUES_KEY, [("timestep", "0")])
        .unwrap();
    store
        .set_hash("home_values", [("name", "home-a"), ("type", r#"["hvac","wh"]"#)])
        .unwrap();
    store
        .set_hash("hvac_values", [("r", "6.8"), ("p_c", "3.5"), ("p_h", "3.5")])
        .unwrap();
    store
        .set_hash("wh_values", [("p", "4.5"), ("tank_size", "200")])
        .unwrap();
    store
        .set_hash(
            "hems_values",
            [("sub_subhourly_steps", "1"), ("prediction_horizon", "2")],
        )
        .unwrap();

    let len = nsteps + 2;
    store
        .push_list(OAT_KEY, (0..len).map(|t| format!("{}", 25.0 + t as f64)))
        .unwrap();
    store.push_list(GHI_KEY, (0..len).map(|_| "0")).unwrap();
    store.push_list(PRICE_KEY, (0..len).map(|_| "0.1")).unwrap();
    store.push_list("draw_sizes", ["0", "20"]).unwrap();
    Arc::new(store)
}

/// Reports a grid power of `1 + timestep` and records every override it
/// receives.
#[derive(Clone, Default)]
pub struct RecordingSolver {
    pub seen: Arc<Mutex<Vec<Overrides>>>,
}

impl RecordingSolver {
    pub fn overrides(&self) -> Vec<Overrides> {
        self.seen.lock().unwrap().clone()
    }
}

impl HomeSolver for RecordingSolver {
    fn solve(&mut self, request: &SolveRequest<'_>) -> Result<SolverOutput, SolveError> {
        self.seen.lock().unwrap().push(request.overrides);
        let mut vals = OptimalVals::new();
        vals.insert(
            GRID_POWER_KEY,
            OptimalValue::Series(vec![1.0 + request.params.timestep as f64, 0.0]),
        );
        Ok(SolverOutput {
            optimal_vals: vals,
            ..SolverOutput::default()
        })
    }
}
