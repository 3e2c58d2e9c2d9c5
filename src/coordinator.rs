//! In-process stand-in for the community aggregator.
//!
//! Runs the other side of the player protocol so a whole community can be
//! stepped inside one process:
//!
//! ```text
//! post "ready" -> N x "initialized" -> post "all ready"
//! per step:    N x "updated" -> sum p_grid_opt -> advance timestep -> post "forward"
//! finally:     N x "done"
//! ```
//!
//! [`run_community`] drives the aggregator and its players together and
//! stops all of them on the first failure.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinError, JoinSet};

use crate::channel::{
    BROADCAST_CHANNEL, Barrier, BarrierConfig, BarrierError, ChannelError, STATUS_CHANNEL,
    StatusChannel, StatusKind,
};
use crate::player::{CURRENT_VALUES_KEY, PlayerError, StepController};
use crate::policy::ActionPolicy;
use crate::runner::{RunOptions, RunReport, run_player};
use crate::solver::{HomeSolver, OptimalVals};
use crate::store::{SharedStore, StoreError};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("aggregator wait for \"{awaited}\" failed: {source}")]
    Barrier {
        awaited: StatusKind,
        #[source]
        source: BarrierError,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("aggregator store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error("community task failed: {0}")]
    Task(#[from] JoinError),
}

/// What the aggregator saw over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatorReport {
    /// Homes that completed the handshake, sorted by name.
    pub homes: Vec<String>,
    /// Community grid demand (kW) after each step.
    pub community_demand: Vec<f64>,
}

/// Sequences `players` homes through `steps` lockstep steps.
pub struct LocalAggregator {
    store: Arc<dyn SharedStore>,
    channel: Arc<dyn StatusChannel>,
    barrier: Barrier,
    players: usize,
    steps: usize,
}

impl LocalAggregator {
    /// Subscribes to player statuses. Players must be subscribed before
    /// [`run`](Self::run) posts "ready".
    pub async fn new(
        store: Arc<dyn SharedStore>,
        channel: Arc<dyn StatusChannel>,
        players: usize,
        steps: usize,
        barrier: BarrierConfig,
    ) -> Result<Self, CoordinatorError> {
        let barrier = Barrier::open(channel.as_ref(), &[STATUS_CHANNEL], barrier).await?;
        Ok(Self {
            store,
            channel,
            barrier,
            players,
            steps,
        })
    }

    /// Runs the full protocol and returns the per-step community demand.
    ///
    /// # Errors
    ///
    /// Fails if any barrier wait fails or the store cannot be read or written.
    pub async fn run(mut self) -> Result<AggregatorReport, CoordinatorError> {
        broadcast(self.channel.as_ref(), StatusKind::Ready).await?;
        let homes = self.collect(StatusKind::Initialized).await?;
        tracing::info!("all {} players initialized: {}", homes.len(), homes.join(", "));
        broadcast(self.channel.as_ref(), StatusKind::AllReady).await?;

        let mut community_demand = Vec::with_capacity(self.steps);
        for t in 0..self.steps {
            let updated = self.collect(StatusKind::Updated).await?;
            let demand = self.aggregate(&updated)?;
            self.store.put(
                CURRENT_VALUES_KEY,
                "current_demand",
                &format!("{demand}"),
            )?;
            self.store
                .put(CURRENT_VALUES_KEY, "timestep", &(t + 1).to_string())?;
            tracing::info!("t = {t}: community demand {demand:.3} kW");
            community_demand.push(demand);
            broadcast(self.channel.as_ref(), StatusKind::Forward).await?;
        }

        self.collect(StatusKind::Done).await?;
        tracing::info!("all players done after {} steps", self.steps);
        Ok(AggregatorReport {
            homes,
            community_demand,
        })
    }

    /// Waits until `players` distinct homes have posted `kind`.
    async fn collect(&mut self, kind: StatusKind) -> Result<Vec<String>, CoordinatorError> {
        let mut seen = BTreeSet::new();
        while seen.len() < self.players {
            let message = self
                .barrier
                .await_status(kind)
                .await
                .map_err(|source| CoordinatorError::Barrier {
                    awaited: kind,
                    source,
                })?;
            match message.status().and_then(|s| s.home) {
                Some(home) => {
                    if !seen.insert(home.clone()) {
                        tracing::warn!("{home} posted \"{kind}\" twice");
                    }
                }
                None => tracing::warn!("ignoring \"{kind}\" without a home: {:?}", message.text),
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Sums each home's current grid power.
    fn aggregate(&self, homes: &[String]) -> Result<f64, CoordinatorError> {
        let mut total = 0.0;
        for home in homes {
            match OptimalVals::load(self.store.as_ref(), home)?.grid_power() {
                Some(kw) => total += kw,
                None => tracing::warn!("{home} has no grid power on record"),
            }
        }
        Ok(total)
    }
}

/// Reports from a community run, players sorted by home name.
#[derive(Debug, Clone)]
pub struct CommunityRun {
    pub reports: Vec<RunReport>,
    pub aggregator: AggregatorReport,
}

/// Runs every player and the aggregator to completion.
///
/// The first player or aggregator failure cancels every pending barrier
/// wait and aborts the aggregator, so one failing home cannot leave the
/// rest blocked on a status that will never come.
///
/// # Errors
///
/// Returns the first failure observed.
pub async fn run_community<S>(
    aggregator: LocalAggregator,
    players: Vec<(StepController<S>, Box<dyn ActionPolicy>)>,
    options: &RunOptions,
) -> Result<CommunityRun, CoordinatorError>
where
    S: HomeSolver + 'static,
{
    let cancels: Vec<_> = players.iter().map(|(c, _)| c.cancel_handle()).collect();

    let mut tasks = JoinSet::new();
    for (mut controller, mut policy) in players {
        let options = options.clone();
        tasks.spawn(async move { run_player(&mut controller, policy.as_mut(), &options).await });
    }
    let mut aggregator = tokio::spawn(aggregator.run());

    let mut reports = Vec::with_capacity(cancels.len());
    let mut community = None;
    let mut failure = None;
    while failure.is_none() && (!tasks.is_empty() || community.is_none()) {
        tokio::select! {
            Some(joined) = tasks.join_next() => match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => failure = Some(CoordinatorError::Player(e)),
                Err(e) => failure = Some(CoordinatorError::Task(e)),
            },
            joined = &mut aggregator, if community.is_none() => match joined {
                Ok(Ok(report)) => community = Some(report),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => failure = Some(CoordinatorError::Task(e)),
            },
        }
    }

    if let Some(failure) = failure {
        tracing::error!("stopping community: {failure}");
        cancels.iter().for_each(|c| c.cancel());
        aggregator.abort();
        while tasks.join_next().await.is_some() {}
        return Err(failure);
    }

    reports.sort_by(|a, b| a.home.cmp(&b.home));
    Ok(CommunityRun {
        reports,
        aggregator: community.unwrap_or_default(),
    })
}

async fn broadcast(channel: &dyn StatusChannel, kind: StatusKind) -> Result<(), CoordinatorError> {
    tracing::debug!("broadcasting \"{kind}\"");
    channel.post(BROADCAST_CHANNEL, kind.word()).await?;
    Ok(())
}
