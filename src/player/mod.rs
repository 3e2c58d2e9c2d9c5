//! Per-player step controller.
//!
//! A controller drives one home through the community protocol:
//!
//! ```text
//! reset(true):  await "ready" -> claim + load home -> initial solve
//!               -> post "initialized player" -> await "all ready"
//! step(action): fetch params -> load previous vals -> decode overrides
//!               -> solve -> persist vals -> post "updated" -> await "forward"
//! ```
//!
//! The only suspension points are the barrier waits.

mod error;
mod types;

use std::sync::Arc;

use crate::actions::ActionSpace;
use crate::channel::{
    BROADCAST_CHANNEL, Barrier, BarrierConfig, CancelHandle, STATUS_CHANNEL, Status,
    StatusChannel, StatusKind,
};
use crate::home::{HomeSpec, SimulationMeta};
use crate::observation::{Observation, ObservationBuilder};
use crate::score::Score;
use crate::solver::{GRID_POWER_KEY, HomeSolver, OptimalVals, SolveError, SolveRequest};
use crate::store::SharedStore;

pub use error::PlayerError;
pub use types::{
    CURRENT_VALUES_KEY, DemandProfile, GHI_KEY, OAT_KEY, PRICE_KEY, StepOutcome, StepParams,
    StepRecord, StepState,
};

/// Lifecycle phase of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Home loaded and initial solve done, waiting for "all ready".
    Initialized,
    /// Stepping.
    Running,
}

/// Player-side settings that do not come from the store.
#[derive(Debug, Clone, Default)]
pub struct PlayerSettings {
    pub actions: ActionSpace,
    /// Observable states, in observation order.
    pub states: Vec<String>,
    pub barrier: BarrierConfig,
}

/// Sequences one player's lifecycle against the shared store and status
/// channels.
pub struct StepController<S: HomeSolver> {
    store: Arc<dyn SharedStore>,
    channel: Arc<dyn StatusChannel>,
    barrier: Barrier,
    solver: S,
    actions: ActionSpace,
    observer: ObservationBuilder,
    phase: Phase,
    meta: Option<SimulationMeta>,
    home: Option<HomeSpec>,
    state: StepState,
    records: Vec<StepRecord>,
    /// Steps started; stamped on outgoing statuses.
    nstep: u64,
}

impl<S: HomeSolver> StepController<S> {
    /// Creates a controller and opens its status subscription.
    ///
    /// The subscription lives as long as the controller, so statuses
    /// published from here on are never missed between waits.
    pub async fn new(
        store: Arc<dyn SharedStore>,
        channel: Arc<dyn StatusChannel>,
        solver: S,
        settings: PlayerSettings,
    ) -> Result<Self, PlayerError> {
        let barrier = Barrier::open(
            channel.as_ref(),
            &[STATUS_CHANNEL, BROADCAST_CHANNEL],
            settings.barrier,
        )
        .await?;
        Ok(Self {
            store,
            channel,
            barrier,
            solver,
            actions: settings.actions,
            observer: ObservationBuilder::new(settings.states),
            phase: Phase::Uninitialized,
            meta: None,
            home: None,
            state: StepState::default(),
            records: Vec::new(),
            nstep: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Loaded home, once `reset(true)` has claimed one.
    pub fn home(&self) -> Option<&HomeSpec> {
        self.home.as_ref()
    }

    pub fn meta(&self) -> Option<SimulationMeta> {
        self.meta
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub fn demand_profile(&self) -> &DemandProfile {
        &self.state.demand
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.actions
    }

    pub fn observation_len(&self) -> usize {
        self.observer.len()
    }

    /// Handle that aborts any barrier wait in progress or to come.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.barrier.cancel_handle()
    }

    /// Total steps to run: `simulation.nsteps` hours times the home's
    /// steps per hour.
    pub fn horizon(&self) -> Option<usize> {
        let meta = self.meta?;
        let home = self.home.as_ref()?;
        Some(meta.total_timesteps * home.steps_per_hour())
    }

    pub fn score(&self) -> Score {
        Score::from_profile(&self.state.demand)
    }

    /// Publishes `"<home> <status> at t = <nstep>."` on the status channel.
    ///
    /// The returned future owns everything it needs, so it does not borrow
    /// the controller across the publish.
    pub fn post_status(
        &self,
        kind: StatusKind,
    ) -> impl Future<Output = Result<(), PlayerError>> + Send + use<S> {
        let status = Status {
            kind,
            home: self.home.as_ref().map(|h| h.name.clone()),
            step: Some(self.nstep),
        };
        let channel = Arc::clone(&self.channel);
        async move {
            let text = status.to_string();
            tracing::info!("posting {text:?}");
            channel.post(STATUS_CHANNEL, &text).await?;
            Ok(())
        }
    }

    async fn await_status(&mut self, kind: StatusKind) -> Result<(), PlayerError> {
        tracing::debug!("awaiting \"{kind}\"");
        self.barrier
            .await_status(kind)
            .await
            .map(drop)
            .map_err(|source| PlayerError::Protocol {
                home: self.home.as_ref().map(|h| h.name.clone()),
                awaited: kind,
                source,
            })
    }

    /// With `initialize`, runs the one-time handshake and returns the first
    /// observation. Without it, returns the current observation.
    ///
    /// # Errors
    ///
    /// - [`PlayerError::Protocol`] if a barrier wait times out or is cancelled
    /// - [`PlayerError::Load`] if the store lacks required configuration
    /// - [`PlayerError::Solve`] if the initial solve fails
    /// - [`PlayerError::NotInitialized`] for `reset(false)` before any
    ///   initialization
    pub async fn reset(&mut self, initialize: bool) -> Result<Observation, PlayerError> {
        if !initialize {
            return self.observe();
        }
        if self.phase == Phase::Running {
            tracing::warn!("reset(true) on a running player; reusing loaded home");
            return self.observe();
        }

        // A failed reset resumes where it stopped: a claimed home is never
        // claimed again and "initialized" is posted once.
        if self.phase == Phase::Uninitialized {
            if self.home.is_none() {
                self.await_status(StatusKind::Ready).await?;

                let meta = SimulationMeta::load(self.store.as_ref())?;
                let home = HomeSpec::load(self.store.as_ref())?;
                tracing::info!(
                    home = %home.name,
                    "welcome {}: {} timesteps at {} steps/hour",
                    home.name,
                    meta.total_timesteps,
                    home.steps_per_hour()
                );
                self.meta = Some(meta);
                self.home = Some(home);
            }

            self.initial_solve()?;
            self.post_status(StatusKind::Initialized).await?;
            self.phase = Phase::Initialized;
        }

        self.await_status(StatusKind::AllReady).await?;
        self.phase = Phase::Running;

        self.observe()
    }

    /// Solves once with no history to establish initial conditions. The
    /// result is observed but not persisted.
    fn initial_solve(&mut self) -> Result<(), PlayerError> {
        let home = self.home.as_ref().ok_or(PlayerError::NotInitialized)?;
        let params = self.fetch_params(home)?;
        let output = self
            .solver
            .solve(&SolveRequest {
                home,
                params: &params,
                previous: None,
                overrides: Default::default(),
            })
            .map_err(|source| PlayerError::Solve {
                home: home.name.clone(),
                timestep: params.timestep,
                source,
            })?;
        self.state.params = params;
        self.state.output = output;
        Ok(())
    }

    /// Reads this step's parameters and checks the community timestep
    /// against the number of completed steps.
    fn fetch_params(&self, home: &HomeSpec) -> Result<StepParams, PlayerError> {
        let params = StepParams::fetch(self.store.as_ref(), home.horizon_steps())?;
        if params.timestep != self.state.timestep {
            return Err(PlayerError::TimestepMismatch {
                home: home.name.clone(),
                expected: self.state.timestep,
                found: params.timestep,
            });
        }
        Ok(params)
    }

    /// Runs one step.
    ///
    /// `action`, if given, must have one element per configured action; it
    /// is decoded tail-first into setpoint overrides for this solve.
    ///
    /// # Errors
    ///
    /// Step failures carry the home name and timestep. Nothing is persisted
    /// or posted for a step that fails before its solve completes.
    pub async fn step(&mut self, action: Option<&[f64]>) -> Result<StepOutcome, PlayerError> {
        if self.phase != Phase::Running {
            return Err(PlayerError::NotInitialized);
        }
        let home = self.home.as_ref().ok_or(PlayerError::NotInitialized)?;
        let name = home.name.clone();

        let params = self.fetch_params(home)?;
        let t = params.timestep;
        let store_err = |source| PlayerError::Store {
            home: name.clone(),
            timestep: t,
            source,
        };

        let previous = if t > 0 {
            Some(OptimalVals::load(self.store.as_ref(), &name).map_err(store_err)?)
        } else {
            None
        };

        let overrides = match action {
            Some(a) => self
                .actions
                .decode(a)
                .map_err(|source| PlayerError::Action {
                    home: name.clone(),
                    timestep: t,
                    source,
                })?,
            None => Default::default(),
        };
        self.nstep += 1;

        let solve_err = |source| PlayerError::Solve {
            home: name.clone(),
            timestep: t,
            source,
        };
        let output = self
            .solver
            .solve(&SolveRequest {
                home,
                params: &params,
                previous: previous.as_ref(),
                overrides,
            })
            .map_err(solve_err)?;
        let grid_kw = output.optimal_vals.grid_power().ok_or_else(|| {
            solve_err(SolveError::MissingInput(format!(
                "solver produced no {GRID_POWER_KEY}"
            )))
        })?;

        output
            .optimal_vals
            .persist(self.store.as_ref(), &name)
            .map_err(store_err)?;
        let cost = output
            .optimal_vals
            .get("cost_opt")
            .and_then(|v| v.current());

        self.state.params = params;
        self.state.output = output;
        self.state.previous = previous;

        self.post_status(StatusKind::Updated).await?;
        self.await_status(StatusKind::Forward).await?;

        self.state.params.current_demand =
            StepParams::fetch_current_demand(self.store.as_ref()).map_err(PlayerError::Load)?;
        self.state.demand.push(grid_kw);
        self.state.timestep += 1;

        let record = StepRecord {
            timestep: t,
            overrides,
            grid_kw,
            community_demand: self.state.params.current_demand,
            cost,
        };
        tracing::debug!("{record}");
        self.records.push(record);

        Ok(StepOutcome {
            observation: self.observe()?,
            reward: 0.0,
            done: false,
            info: Vec::new(),
        })
    }

    fn observe(&self) -> Result<Observation, PlayerError> {
        let home = self.home.as_ref().ok_or(PlayerError::NotInitialized)?;
        Ok(self.observer.build(&self.state, home))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actions::ActionKind;
    use crate::channel::{MatchMode, MemoryChannel};
    use crate::home::HOME_QUEUE_KEY;
    use crate::solver::{OptimalValue, SolverOutput};
    use crate::store::{ListRange, MemoryStore};

    /// Emits a fixed grid power and records the overrides it was given.
    #[derive(Default)]
    struct Fixed {
        seen: Vec<crate::actions::Overrides>,
        fail_next: bool,
    }

    impl HomeSolver for Fixed {
        fn solve(
            &mut self,
            request: &SolveRequest<'_>,
        ) -> Result<SolverOutput, SolveError> {
            self.seen.push(request.overrides);
            if std::mem::take(&mut self.fail_next) {
                return Err(SolveError::Failed("scripted failure".into()));
            }
            let mut vals = OptimalVals::new();
            vals.insert(
                GRID_POWER_KEY,
                OptimalValue::Series(vec![1.0 + request.params.timestep as f64]),
            );
            Ok(SolverOutput {
                optimal_vals: vals,
                ..SolverOutput::default()
            })
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.set_hash("simulation", [("nsteps", "2")]).unwrap();
        store
            .set_hash("home_values", [("name", "home-a"), ("type", r#"["hvac","wh"]"#)])
            .unwrap();
        store.set_hash("hvac_values", [("r", "6.8")]).unwrap();
        store.set_hash("wh_values", [("tank_size", "200")]).unwrap();
        store.set_hash("hems_values", [("prediction_horizon", "1")]).unwrap();
        store
            .set_hash(CURRENT_VALUES_KEY, [("timestep", "0")])
            .unwrap();
        Arc::new(store)
    }

    fn settings(deadline_ms: u64) -> PlayerSettings {
        PlayerSettings {
            actions: ActionSpace::new([ActionKind::HvacSetpoint, ActionKind::WhSetpoint]),
            states: vec!["time_of_day".into(), "my_demand".into()],
            barrier: BarrierConfig {
                poll_initial: Duration::from_millis(5),
                poll_max: Duration::from_millis(20),
                deadline: Some(Duration::from_millis(deadline_ms)),
                match_mode: MatchMode::Exact,
            },
        }
    }

    #[tokio::test]
    async fn step_before_reset_is_rejected() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut player = StepController::new(store, bus, Fixed::default(), settings(50))
            .await
            .unwrap();
        assert!(matches!(
            player.step(None).await,
            Err(PlayerError::NotInitialized)
        ));
        assert!(matches!(
            player.reset(false).await,
            Err(PlayerError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn missing_ready_times_out() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut player = StepController::new(store, bus, Fixed::default(), settings(40))
            .await
            .unwrap();
        let err = player.reset(true).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(player.phase(), Phase::Uninitialized);
    }

    #[tokio::test]
    async fn handshake_then_step() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut watcher = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();
        let mut player =
            StepController::new(store.clone(), bus.clone(), Fixed::default(), settings(500))
                .await
                .unwrap();

        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        bus.post(STATUS_CHANNEL, "all ready").await.unwrap();
        let obs = player.reset(true).await.unwrap();
        assert_eq!(obs.values, vec![0.0, 1.0]);
        assert_eq!(player.phase(), Phase::Running);
        assert_eq!(player.horizon(), Some(2));

        bus.post(STATUS_CHANNEL, "forward").await.unwrap();
        let outcome = player.step(Some(&[18.0, 47.0])).await.unwrap();
        assert!(!outcome.done);
        assert_eq!(player.demand_profile().as_slice(), &[1.0]);
        assert_eq!(player.solver.seen[1].wh_setpoint, Some(47.0));
        assert_eq!(player.solver.seen[1].hvac_setpoint, Some(18.0));
        assert_eq!(
            store.get_field("home-a", GRID_POWER_KEY).unwrap().as_deref(),
            Some("[1.0]")
        );

        let mut seen = Vec::new();
        while let Some(m) = watcher.next_message(Duration::from_millis(10)).await.unwrap() {
            seen.push(m.text);
        }
        assert!(seen.contains(&"home-a initialized player at t = 0.".to_string()));
        assert!(seen.contains(&"home-a updated at t = 1.".to_string()));
    }

    #[tokio::test]
    async fn stale_timestep_is_reported() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut player =
            StepController::new(store.clone(), bus.clone(), Fixed::default(), settings(500))
                .await
                .unwrap();
        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        bus.post(STATUS_CHANNEL, "all ready").await.unwrap();
        player.reset(true).await.unwrap();

        store.put(CURRENT_VALUES_KEY, "timestep", "3").unwrap();
        let err = player.step(None).await.unwrap_err();
        assert!(matches!(
            err,
            PlayerError::TimestepMismatch {
                expected: 0,
                found: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn wrong_action_length_is_rejected_before_solving() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut player =
            StepController::new(store.clone(), bus.clone(), Fixed::default(), settings(500))
                .await
                .unwrap();
        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        bus.post(STATUS_CHANNEL, "all ready").await.unwrap();
        player.reset(true).await.unwrap();

        let mut watcher = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();
        let err = player.step(Some(&[18.0])).await.unwrap_err();
        assert!(matches!(err, PlayerError::Action { timestep: 0, .. }));
        assert_eq!(player.solver.seen.len(), 1);
        assert!(store.get("home-a").unwrap().is_empty());

        // the rejected step does not count toward the status stamp
        bus.post(STATUS_CHANNEL, "forward").await.unwrap();
        player.step(Some(&[18.0, 47.0])).await.unwrap();
        let mut seen = Vec::new();
        while let Some(m) = watcher.next_message(Duration::from_millis(10)).await.unwrap() {
            seen.push(m.text);
        }
        assert!(seen.contains(&"home-a updated at t = 1.".to_string()));
        assert!(!seen.iter().any(|t| t.contains("t = 2")));
    }

    #[tokio::test]
    async fn reset_resumes_after_all_ready_times_out() {
        let store = seeded_store();
        let bus = Arc::new(MemoryChannel::new());
        let mut watcher = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();
        let mut player =
            StepController::new(store.clone(), bus.clone(), Fixed::default(), settings(60))
                .await
                .unwrap();

        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        let err = player.reset(true).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(player.phase(), Phase::Initialized);

        bus.post(STATUS_CHANNEL, "all ready").await.unwrap();
        player.reset(true).await.unwrap();
        assert_eq!(player.phase(), Phase::Running);
        assert_eq!(player.solver.seen.len(), 1);

        bus.post(STATUS_CHANNEL, "forward").await.unwrap();
        player.step(None).await.unwrap();

        let mut texts = Vec::new();
        while let Some(m) = watcher.next_message(Duration::from_millis(10)).await.unwrap() {
            texts.push(m.text);
        }
        assert_eq!(
            texts.iter().filter(|t| t.contains("initialized player")).count(),
            1
        );
    }

    #[tokio::test]
    async fn reset_after_failed_initial_solve_keeps_claimed_home() {
        let store = seeded_store();
        store.push_list(HOME_QUEUE_KEY, ["1", "2"]).unwrap();
        for n in ["1", "2"] {
            let name = format!("home-{n}");
            store
                .set_hash(
                    &format!("home_values:{n}"),
                    [("name", name.as_str()), ("type", r#"["hvac","wh"]"#)],
                )
                .unwrap();
            store.set_hash(&format!("hvac_values:{n}"), [("r", "6.8")]).unwrap();
            store.set_hash(&format!("wh_values:{n}"), [("tank_size", "200")]).unwrap();
            store
                .set_hash(&format!("hems_values:{n}"), [("prediction_horizon", "1")])
                .unwrap();
        }
        let bus = Arc::new(MemoryChannel::new());
        let solver = Fixed {
            fail_next: true,
            ..Fixed::default()
        };
        let mut player = StepController::new(store.clone(), bus.clone(), solver, settings(60))
            .await
            .unwrap();

        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        let err = player.reset(true).await.unwrap_err();
        assert!(matches!(err, PlayerError::Solve { .. }));
        assert_eq!(player.home().map(|h| h.name.as_str()), Some("home-1"));

        // no second "ready": the retry must not wait for it or claim again
        bus.post(STATUS_CHANNEL, "all ready").await.unwrap();
        player.reset(true).await.unwrap();
        assert_eq!(player.phase(), Phase::Running);
        assert_eq!(player.home().map(|h| h.name.as_str()), Some("home-1"));
        assert_eq!(player.solver.seen.len(), 2);
        assert_eq!(
            store.get_list(HOME_QUEUE_KEY, ListRange::ALL).unwrap(),
            vec!["2".to_string()]
        );
    }
}
