use thiserror::Error;

use crate::actions::ActionError;
use crate::channel::{BarrierError, ChannelError, StatusKind};
use crate::home::LoadError;
use crate::solver::SolveError;
use crate::store::StoreError;

/// Errors surfaced by a [`StepController`](super::StepController).
///
/// Step failures carry the home and timestep so a caller can report them
/// without tearing down the run.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("configuration error: {0}")]
    Load(#[from] LoadError),

    #[error("{}: barrier wait for \"{awaited}\" failed: {source}", .home.as_deref().unwrap_or("player"))]
    Protocol {
        home: Option<String>,
        awaited: StatusKind,
        #[source]
        source: BarrierError,
    },

    #[error("{home}: solve failed at t = {timestep}: {source}")]
    Solve {
        home: String,
        timestep: usize,
        #[source]
        source: SolveError,
    },

    #[error("{home}: rejected action at t = {timestep}: {source}")]
    Action {
        home: String,
        timestep: usize,
        #[source]
        source: ActionError,
    },

    #[error("{home}: store error at t = {timestep}: {source}")]
    Store {
        home: String,
        timestep: usize,
        #[source]
        source: StoreError,
    },

    #[error("{home}: store reports timestep {found}, expected {expected}")]
    TimestepMismatch {
        home: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("player is not initialized; call reset(true) first")]
    NotInitialized,
}

impl PlayerError {
    /// Whether this is a barrier deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PlayerError::Protocol {
                source: BarrierError::Timeout { .. },
                ..
            }
        )
    }
}
