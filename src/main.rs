//! home-player entry point: CLI wiring, config loading and run orchestration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use home_player::channel::{MemoryChannel, StatusChannel};
use home_player::cli::{self, CliOptions, Mode};
use home_player::config::{PlayerConfig, StateActionConfig};
use home_player::coordinator::{LocalAggregator, run_community};
use home_player::io::export::export_csv;
use home_player::player::{PlayerSettings, StepController};
use home_player::policy::{ActionPolicy, NoActionPolicy, RandomPolicy};
use home_player::runner::{RunOptions, RunReport};
use home_player::scenario::{self, ScenarioPreset};
use home_player::score::Score;
use home_player::solver::heuristic::HeuristicSolver;
use home_player::store::{MemoryStore, SharedStore};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,home_player=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_with(errors: &[impl std::fmt::Display]) -> ! {
    for e in errors {
        eprintln!("{e}");
    }
    process::exit(1);
}

/// Applies command-line overrides on top of the file configuration.
fn apply_overrides(config: &mut PlayerConfig, cli: &CliOptions) {
    if let Some(url) = &cli.redis_url {
        config.store.url = url.clone();
    }
    if let Some(path) = &cli.state_action {
        config.run.state_action = Some(path.clone());
    }
    if let Some(steps) = cli.steps {
        config.run.steps = Some(steps);
    }
    if let Some(seed) = cli.seed {
        config.run.seed = seed;
    }
    if let Some(deadline) = cli.deadline_secs {
        config.barrier.deadline_secs = Some(deadline);
    }
    if let Some(policy) = &cli.policy {
        config.run.policy = policy.clone();
    }
    if let Some(preset) = &cli.preset {
        config.local.preset = preset.clone();
    }
    if let Some(homes) = cli.homes {
        config.local.homes = homes;
    }
    if let Some(path) = &cli.score_out {
        config.run.score_out = Some(path.clone());
    }
    if let Some(path) = &cli.telemetry_out {
        config.run.telemetry_out = Some(path.clone());
    }
}

fn load_settings(config: &PlayerConfig) -> PlayerSettings {
    let state_action = match &config.run.state_action {
        Some(path) => StateActionConfig::from_json_file(path).unwrap_or_else(|e| exit_with(&[e])),
        None => StateActionConfig::default(),
    };
    let errors = state_action.validate();
    if !errors.is_empty() {
        exit_with(&errors);
    }
    let actions = state_action
        .action_space()
        .unwrap_or_else(|e| exit_with(&[e]));

    PlayerSettings {
        actions,
        states: state_action.enabled_states(),
        barrier: config.barrier_config(),
    }
}

fn make_policy(config: &PlayerConfig, index: u64) -> Box<dyn ActionPolicy> {
    match config.run.policy.as_str() {
        "none" => Box::new(NoActionPolicy),
        _ => Box::new(RandomPolicy::new(config.run.seed.wrapping_add(index))),
    }
}

/// Seeds an in-process community and runs every home against a local
/// aggregator.
async fn run_local(
    config: &PlayerConfig,
    settings: PlayerSettings,
) -> Result<Vec<RunReport>, String> {
    let preset = ScenarioPreset::from_name(&config.local.preset).map_err(|e| e.to_string())?;
    let homes = config.local.homes;

    let memory = Arc::new(MemoryStore::new());
    scenario::seed(&memory, &preset, homes).map_err(|e| e.to_string())?;
    let store: Arc<dyn SharedStore> = memory;
    let channel: Arc<dyn StatusChannel> = Arc::new(MemoryChannel::with_capacity(64 * homes.max(4)));

    // Every player subscribes before the aggregator can post "ready".
    let mut controllers = Vec::with_capacity(homes);
    for _ in 0..homes {
        let controller = StepController::new(
            Arc::clone(&store),
            Arc::clone(&channel),
            HeuristicSolver,
            settings.clone(),
        )
        .await
        .map_err(|e| e.to_string())?;
        controllers.push(controller);
    }

    let steps = config.run.steps.unwrap_or(preset.total_steps());
    let aggregator = LocalAggregator::new(
        Arc::clone(&store),
        Arc::clone(&channel),
        homes,
        steps,
        settings.barrier.clone(),
    )
    .await
    .map_err(|e| e.to_string())?;

    let options = RunOptions {
        steps: Some(steps),
        print_steps: false,
    };
    let players = controllers
        .into_iter()
        .enumerate()
        .map(|(i, controller)| (controller, make_policy(config, i as u64)))
        .collect();
    let run = run_community(aggregator, players, &options)
        .await
        .map_err(|e| e.to_string())?;
    let community = run.aggregator;
    if let Some(peak) = community.community_demand.iter().copied().reduce(f64::max) {
        println!("Community peak demand: {peak:.3} kW over {} homes", community.homes.len());
    }

    Ok(run.reports)
}

/// Runs a single player against the shared Redis store and channels.
#[cfg(feature = "redis")]
async fn run_remote(
    config: &PlayerConfig,
    settings: PlayerSettings,
) -> Result<Vec<RunReport>, String> {
    use home_player::channel::RedisChannel;
    use home_player::runner::run_player;
    use home_player::store::RedisStore;

    let url = &config.store.url;
    let store: Arc<dyn SharedStore> =
        Arc::new(RedisStore::connect(url).map_err(|e| e.to_string())?);
    let channel: Arc<dyn StatusChannel> =
        Arc::new(RedisChannel::connect(url).await.map_err(|e| e.to_string())?);
    tracing::info!("connected to {url}");

    let mut controller = StepController::new(store, channel, HeuristicSolver, settings)
        .await
        .map_err(|e| e.to_string())?;
    let mut policy = make_policy(config, 0);
    let options = RunOptions {
        steps: config.run.steps,
        print_steps: true,
    };
    let report = run_player(&mut controller, policy.as_mut(), &options)
        .await
        .map_err(|e| e.to_string())?;
    Ok(vec![report])
}

#[cfg(not(feature = "redis"))]
async fn run_remote(
    _config: &PlayerConfig,
    _settings: PlayerSettings,
) -> Result<Vec<RunReport>, String> {
    Err("run mode needs a build with the `redis` feature".to_string())
}

/// Appends `-<home>` to the file stem when several homes share one output path.
fn per_home_path(path: &Path, home: &str, several: bool) -> PathBuf {
    if !several {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{home}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{home}"),
    };
    path.with_file_name(name)
}

fn write_outputs(config: &PlayerConfig, reports: &[RunReport]) {
    if let Some(path) = &config.run.score_out {
        let result = if let [report] = reports {
            report.score.write_json(path)
        } else {
            let scores: BTreeMap<&str, Score> =
                reports.iter().map(|r| (r.home.as_str(), r.score)).collect();
            serde_json::to_string_pretty(&scores)
                .map_err(std::io::Error::other)
                .and_then(|json| std::fs::write(path, json))
        };
        if let Err(e) = result {
            eprintln!("error: failed to write score: {e}");
            process::exit(1);
        }
        eprintln!("Score written to {}", path.display());
    }

    if let Some(path) = &config.run.telemetry_out {
        let several = reports.len() > 1;
        for report in reports {
            let out = per_home_path(path, &report.home, several);
            if let Err(e) = export_csv(&report.records, &out) {
                eprintln!("error: failed to write CSV: {e}");
                process::exit(1);
            }
            eprintln!("Step records written to {}", out.display());
        }
    }
}

fn main() {
    let cli = match cli::parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(2);
        }
    };
    if cli.help {
        cli::print_usage();
        process::exit(0);
    }

    init_logging();

    let mut config = match &cli.config {
        Some(path) => PlayerConfig::from_toml_file(path).unwrap_or_else(|e| exit_with(&[e])),
        None => PlayerConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let errors = config.validate();
    if !errors.is_empty() {
        exit_with(&errors);
    }

    let settings = load_settings(&config);

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    let result = match cli.mode {
        Mode::Local => rt.block_on(run_local(&config, settings)),
        Mode::Run => rt.block_on(run_remote(&config, settings)),
    };
    let reports = result.unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });

    for report in &reports {
        println!(
            "\n{} ({} steps, {:.2}s)\n{}",
            report.home,
            report.steps,
            report.elapsed.as_secs_f64(),
            report.score
        );
    }

    write_outputs(&config, &reports);
}
