//! Observation vector derived from a player's step state.

use std::fmt;

use crate::home::HomeSpec;
use crate::player::StepState;

/// Value reported for a state that cannot be derived.
pub const SENTINEL: f64 = -1.0;

/// A configured observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateName {
    /// Horizon index at which occupants leave, or -1.
    LeavingHorizon,
    /// Horizon index at which occupants return, or -1.
    ReturningHorizon,
    /// 1 if occupied now, else 0.
    OccupancyStatus,
    /// This step's water draw as a fraction of tank volume.
    FutureWaterdraws,
    /// Outside air temperature at the end of the horizon.
    OatFuture,
    OatCurrent,
    /// Step index within the day.
    TimeOfDay,
    /// Aggregate demand published by the aggregator.
    CommunityDemand,
    /// This home's current grid power.
    MyDemand,
    /// Anything else: looked up in the solver's optimal values.
    Other(String),
}

impl StateName {
    pub fn parse(name: &str) -> Self {
        match name {
            "leaving_horizon" => StateName::LeavingHorizon,
            "returning_horizon" => StateName::ReturningHorizon,
            "occupancy_status" => StateName::OccupancyStatus,
            "future_waterdraws" => StateName::FutureWaterdraws,
            "oat_future" => StateName::OatFuture,
            "oat_current" => StateName::OatCurrent,
            "time_of_day" => StateName::TimeOfDay,
            "community_demand" => StateName::CommunityDemand,
            "my_demand" => StateName::MyDemand,
            other => StateName::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StateName::LeavingHorizon => "leaving_horizon",
            StateName::ReturningHorizon => "returning_horizon",
            StateName::OccupancyStatus => "occupancy_status",
            StateName::FutureWaterdraws => "future_waterdraws",
            StateName::OatFuture => "oat_future",
            StateName::OatCurrent => "oat_current",
            StateName::TimeOfDay => "time_of_day",
            StateName::CommunityDemand => "community_demand",
            StateName::MyDemand => "my_demand",
            StateName::Other(name) => name,
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation: the vector plus the same values keyed by state name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub values: Vec<f64>,
    pub named: Vec<(String, f64)>,
}

impl Observation {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Derives observations in configured state order.
#[derive(Debug, Clone, Default)]
pub struct ObservationBuilder {
    states: Vec<StateName>,
}

impl ObservationBuilder {
    pub fn new<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            states: names
                .into_iter()
                .map(|n| StateName::parse(n.as_ref()))
                .collect(),
        }
    }

    pub fn states(&self) -> &[StateName] {
        &self.states
    }

    /// Observation length; every value nominally lies in `[-1, 1]` but is
    /// not normalized.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Builds the observation. Always returns exactly [`len`](Self::len)
    /// values; states that cannot be derived report [`SENTINEL`].
    pub fn build(&self, state: &StepState, home: &HomeSpec) -> Observation {
        let mut obs = Observation {
            values: Vec::with_capacity(self.states.len()),
            named: Vec::with_capacity(self.states.len()),
        };
        for name in &self.states {
            let value = derive(name, state, home).unwrap_or_else(|| {
                tracing::warn!(home = %home.name, "cannot derive state \"{name}\", reporting {SENTINEL}");
                SENTINEL
            });
            obs.values.push(value);
            obs.named.push((name.to_string(), value));
        }
        obs
    }
}

fn derive(name: &StateName, state: &StepState, home: &HomeSpec) -> Option<f64> {
    let output = &state.output;
    let horizon = &output.horizon;

    // solver outputs shadow every derived state of the same name
    if let Some(v) = output.optimal_vals.get(name.as_str()) {
        return v.current();
    }

    let index = |i: Option<usize>| Some(i.map_or(SENTINEL, |i| i as f64));
    match name {
        StateName::LeavingHorizon => index(horizon.leaving_index),
        StateName::ReturningHorizon => index(horizon.returning_index),
        StateName::OccupancyStatus => horizon
            .occupancy
            .first()
            .map(|&occ| if occ { 1.0 } else { 0.0 }),
        StateName::FutureWaterdraws => Some(horizon.draw_fraction),
        StateName::OatFuture => horizon.oat_forecast.last().copied(),
        StateName::OatCurrent => horizon.oat_forecast.first().copied(),
        StateName::TimeOfDay => {
            let steps_per_day = 24 * home.steps_per_hour();
            Some((state.params.timestep % steps_per_day) as f64)
        }
        StateName::CommunityDemand => state.params.current_demand,
        StateName::MyDemand => output.optimal_vals.grid_power(),
        StateName::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::{Capabilities, ParamSet};
    use crate::player::StepParams;
    use crate::solver::{GRID_POWER_KEY, HorizonView, OptimalVals, OptimalValue, SolverOutput};

    fn home() -> HomeSpec {
        let (capabilities, type_tags) = Capabilities::from_type_tags(r#"["hvac","wh"]"#);
        HomeSpec {
            name: "home-a".into(),
            type_tags,
            capabilities,
            home: ParamSet::default(),
            hvac: ParamSet::default(),
            wh: ParamSet::default(),
            hems: ParamSet::new(
                "hems_values",
                [("sub_subhourly_steps".to_string(), "2".to_string())],
            ),
            battery: None,
            pv: None,
            draw_sizes: vec![],
            weekday_occ_schedule: vec![],
        }
    }

    fn state(timestep: usize) -> StepState {
        let mut vals = OptimalVals::new();
        vals.insert(GRID_POWER_KEY, OptimalValue::Series(vec![2.5, 3.0]));
        vals.insert("cost_opt", OptimalValue::Scalar(0.4));
        StepState {
            timestep,
            params: StepParams {
                timestep,
                current_demand: Some(41.0),
                ..StepParams::default()
            },
            output: SolverOutput {
                optimal_vals: vals,
                horizon: HorizonView::new(vec![false, false, true], 0.15, vec![28.0, 30.0, 26.0]),
            },
            ..StepState::default()
        }
    }

    #[test]
    fn derives_every_known_state() {
        let builder = ObservationBuilder::new([
            "leaving_horizon",
            "returning_horizon",
            "occupancy_status",
            "future_waterdraws",
            "oat_future",
            "oat_current",
            "time_of_day",
            "community_demand",
            "my_demand",
        ]);
        let obs = builder.build(&state(50), &home());
        assert_eq!(
            obs.values,
            vec![-1.0, 2.0, 0.0, 0.15, 26.0, 28.0, 2.0, 41.0, 2.5]
        );
    }

    #[test]
    fn solver_values_pass_through() {
        let builder = ObservationBuilder::new(["cost_opt", "p_grid_opt"]);
        let obs = builder.build(&state(0), &home());
        assert_eq!(obs.values, vec![0.4, 2.5]);
        assert_eq!(obs.get("cost_opt"), Some(0.4));
    }

    #[test]
    fn unknown_state_keeps_length_with_sentinel() {
        let builder = ObservationBuilder::new(["time_of_day", "solar_angle", "my_demand"]);
        let obs = builder.build(&state(3), &home());
        assert_eq!(obs.len(), builder.len());
        assert_eq!(obs.values, vec![3.0, SENTINEL, 2.5]);
    }

    #[test]
    fn building_twice_is_identical() {
        let builder = ObservationBuilder::new(["occupancy_status", "community_demand"]);
        let s = state(7);
        let h = home();
        assert_eq!(builder.build(&s, &h), builder.build(&s, &h));
    }

    #[test]
    fn missing_community_demand_is_sentinel() {
        let builder = ObservationBuilder::new(["community_demand"]);
        let mut s = state(0);
        s.params.current_demand = None;
        assert_eq!(builder.build(&s, &home()).values, vec![SENTINEL]);
    }
}
