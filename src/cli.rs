use std::env;
use std::path::PathBuf;

/// Where the community lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Seeded in-process store and bus with a local aggregator.
    #[default]
    Local,
    /// One player against a remote store and aggregator.
    Run,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub mode: Mode,
    pub config: Option<PathBuf>,
    pub state_action: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub steps: Option<usize>,
    pub seed: Option<u64>,
    pub deadline_secs: Option<f64>,
    pub policy: Option<String>,
    pub preset: Option<String>,
    pub homes: Option<usize>,
    pub score_out: Option<PathBuf>,
    pub telemetry_out: Option<PathBuf>,
    pub help: bool,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

pub fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    let mut opts = CliOptions::default();
    let mut i = 0usize;

    if let Some(first) = args.first() {
        match first.as_str() {
            "local" => {
                opts.mode = Mode::Local;
                i = 1;
            }
            "run" => {
                opts.mode = Mode::Run;
                i = 1;
            }
            _ => {}
        }
    }

    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" => set_once(
                &mut opts.config,
                flag,
                PathBuf::from(value(&args, &mut i, flag, "a TOML file path")?),
            )?,
            "--state-action" => set_once(
                &mut opts.state_action,
                flag,
                PathBuf::from(value(&args, &mut i, flag, "a JSON file path")?),
            )?,
            "--redis-url" => set_once(
                &mut opts.redis_url,
                flag,
                value(&args, &mut i, flag, "a redis:// URL")?.to_string(),
            )?,
            "--steps" => {
                let v = parsed(value(&args, &mut i, flag, "a step count")?, flag)?;
                set_once(&mut opts.steps, flag, v)?;
            }
            "--seed" => {
                let v = parsed(value(&args, &mut i, flag, "a u64 seed")?, flag)?;
                set_once(&mut opts.seed, flag, v)?;
            }
            "--deadline" => {
                let v = parsed(value(&args, &mut i, flag, "seconds")?, flag)?;
                set_once(&mut opts.deadline_secs, flag, v)?;
            }
            "--policy" => set_once(
                &mut opts.policy,
                flag,
                value(&args, &mut i, flag, "a policy name")?.to_string(),
            )?,
            "--preset" => set_once(
                &mut opts.preset,
                flag,
                value(&args, &mut i, flag, "a preset name")?.to_string(),
            )?,
            "--homes" => {
                let v = parsed(value(&args, &mut i, flag, "a home count")?, flag)?;
                set_once(&mut opts.homes, flag, v)?;
            }
            "--score-out" => set_once(
                &mut opts.score_out,
                flag,
                PathBuf::from(value(&args, &mut i, flag, "a file path")?),
            )?,
            "--telemetry-out" => set_once(
                &mut opts.telemetry_out,
                flag,
                PathBuf::from(value(&args, &mut i, flag, "a file path")?),
            )?,
            "--help" | "-h" => opts.help = true,
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if opts.mode == Mode::Run && (opts.preset.is_some() || opts.homes.is_some()) {
        return Err("--preset and --homes only apply to local mode".to_string());
    }

    Ok(opts)
}

/// Advances past `flag` and returns its value.
fn value<'a>(
    args: &'a [String],
    i: &mut usize,
    flag: &str,
    expected: &str,
) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag} (expected {expected})"))
}

fn parsed<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{flag} value \"{raw}\" is not valid"))
}

fn set_once<T>(slot: &mut Option<T>, flag: &str, v: T) -> Result<(), String> {
    if slot.replace(v).is_some() {
        return Err(format!("{flag} provided more than once"));
    }
    Ok(())
}

pub fn print_usage() {
    eprintln!("home-player: step-synchronized home energy player");
    eprintln!();
    eprintln!("Usage: home-player [local|run] [OPTIONS]");
    eprintln!();
    eprintln!("Modes:");
    eprintln!("  local                    Seed an in-process community and run every home (default)");
    eprintln!("  run                      Run one player against a Redis store and aggregator");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load settings from a TOML file");
    eprintln!("  --state-action <path>    Observable states and actions (JSON)");
    eprintln!("  --redis-url <url>        Store and channel URL (run mode)");
    eprintln!("  --steps <n>              Stop after n steps");
    eprintln!("  --seed <u64>             Seed for the random action policy");
    eprintln!("  --deadline <secs>        Fail a barrier wait after this many seconds");
    eprintln!("  --policy <name>          Action policy (random, none)");
    eprintln!("  --preset <name>          Scenario preset (local mode)");
    eprintln!("  --homes <n>              Number of homes (local mode)");
    eprintln!("  --score-out <path>       Write the score as JSON (default score.json)");
    eprintln!("  --telemetry-out <path>   Export step records to CSV");
    eprintln!("  --help                   Show this help message");
}
