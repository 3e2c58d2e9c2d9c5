//! Drives one player from handshake to "done".

use std::time::{Duration, Instant};

use crate::channel::StatusKind;
use crate::player::{PlayerError, StepController, StepRecord};
use crate::policy::ActionPolicy;
use crate::score::Score;
use crate::solver::HomeSolver;

/// Run loop settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Steps to run. `None` runs the full simulation horizon.
    pub steps: Option<usize>,
    /// Print each completed step to stdout.
    pub print_steps: bool,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub home: String,
    pub steps: usize,
    pub score: Score,
    pub records: Vec<StepRecord>,
    pub elapsed: Duration,
}

/// Initializes the player, steps it with actions from `policy`, then posts
/// "done" and scores the demand profile.
///
/// # Errors
///
/// Returns the first [`PlayerError`]. Nothing after the failing step runs,
/// so "done" is only posted by runs that complete.
pub async fn run_player<S: HomeSolver>(
    controller: &mut StepController<S>,
    policy: &mut dyn ActionPolicy,
    options: &RunOptions,
) -> Result<RunReport, PlayerError> {
    let started = Instant::now();
    let mut observation = controller.reset(true).await?;

    let horizon = controller.horizon().ok_or(PlayerError::NotInitialized)?;
    let steps = options.steps.unwrap_or(horizon);
    if steps > horizon {
        tracing::warn!("running {steps} steps past the simulation horizon of {horizon}");
    }

    for _ in 0..steps {
        let action = policy.act(&observation, controller.action_space());
        let outcome = controller.step(action.as_deref()).await?;
        if options.print_steps {
            if let Some(record) = controller.records().last() {
                println!("{record}");
            }
        }
        observation = outcome.observation;
    }

    controller.post_status(StatusKind::Done).await?;

    let home = controller
        .home()
        .map(|h| h.name.clone())
        .unwrap_or_default();
    let score = controller.score();
    let elapsed = started.elapsed();
    tracing::info!(
        home = %home,
        "finished {steps} steps in {:.2}s (std {:.3} kW, peak {:.3} kW)",
        elapsed.as_secs_f64(),
        score.std_demand,
        score.max_demand
    );

    Ok(RunReport {
        home,
        steps,
        score,
        records: controller.records().to_vec(),
        elapsed,
    })
}
