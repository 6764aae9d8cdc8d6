//! transbandit experiment runner
//!
//! Runs a Monte-Carlo experiment described by a TOML file (or a built-in
//! demo community) and prints the averaged curves as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::EnvFilter;

use transbandit::{MonteCarloRunner, SimulationConfig};

/// Four agents on the chain model; the last two see a reversed `S` mechanism.
const DEMO: &str = r#"
horizon = 200
repetitions = 5
workers = 2
seed = 0

[[agents]]
name = "adjust"
variant = "causally-adjusted"
rule = "ts"

[[agents]]
name = "sensitive"
variant = "divergence-aware"
rule = "ts"

[[agents]]
name = "naive"
variant = "community"
rule = "ts"
reversed = ["S"]

[[agents]]
name = "solo"
variant = "isolated"
rule = "eg"
epsilon = 0.1
reversed = ["S"]
"#;

struct Args {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
}

fn usage() {
    println!("bandit-sim - transbandit Monte-Carlo runner");
    println!();
    println!("USAGE:");
    println!("    bandit-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>     Experiment TOML [default: built-in demo]");
    println!("    -o, --output <FILE>     Write the JSON summary to FILE instead of stdout");
    println!("    -h, --help              Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                Log filter [default: info]");
    println!("    TRANSBANDIT_SEED        Override the master seed");
    println!("    TRANSBANDIT_WORKERS     Override the worker count");
}

fn parse_args() -> Result<Option<Args>, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut out = Args {
        config: None,
        output: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args.get(i + 1).ok_or("--config requires a value")?;
                out.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--output" | "-o" => {
                let value = args.get(i + 1).ok_or("--output requires a value")?;
                out.output = Some(PathBuf::from(value));
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                return Ok(None);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(out))
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => SimulationConfig::from_path(path)?,
        None => {
            let mut config: SimulationConfig = toml::from_str(DEMO)?;
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };

    info!(
        agents = config.agents.len(),
        horizon = config.horizon,
        workers = config.workers,
        repetitions = config.repetitions,
        seed = config.seed,
        "starting experiment"
    );

    let runner = MonteCarloRunner::new(config.runner())?;
    let factory_config = config.clone();
    let summary = runner.run(move |seed| factory_config.build_world(seed))?;
    let json = summary.to_json()?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, json)?;
            info!(path = %path.display(), samples = summary.samples, "summary written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
