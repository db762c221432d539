use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use newsprobe_contracts::config::{CliOverrides, Experiment, ExperimentConfig, PathsConfig};
use newsprobe_contracts::models::{ModelRef, ModelRegistry};
use newsprobe_contracts::runs::scan::{render_scan, scan_runs};
use newsprobe_contracts::runs::{ExecutionResult, StatsTable};
use newsprobe_engine::ExperimentRunner;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsprobe", version, about = "News sharing probe for language and vision models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured experiment.
    Run(RunArgs),
    /// List the known models.
    Models,
    /// Recompute the statistics CSV from a raw results file.
    Stats(StatsArgs),
    /// Print one line per past run.
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// TOML experiment configuration.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// Dry run: no backend is called.
    #[arg(short = 'D', long)]
    debug: bool,
    /// Abort on contradicting or unclear replies.
    #[arg(short = 'S', long)]
    strict: bool,
    /// Model index or name.
    #[arg(short = 'm', long)]
    model: Option<ModelRef>,
    #[arg(short = 'M', long = "max-tokens")]
    max_tokens: Option<u32>,
    #[arg(short = 'n', long = "nreturns")]
    n_returns: Option<usize>,
    #[arg(short = 'e', long)]
    experiment: Option<Experiment>,
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct StatsArgs {
    #[arg(long)]
    results: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(long)]
    results_dir: Option<PathBuf>,
    /// Skip every run folder before this one.
    #[arg(long)]
    since: Option<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("newsprobe error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Command::Run(args) if args.verbose);
    init_tracing(verbose);

    match cli.command {
        Command::Run(args) => run_experiment(args),
        Command::Models => {
            list_models();
            Ok(())
        }
        Command::Stats(args) => recompute_stats(args),
        Command::Scan(args) => scan(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_experiment(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    config.apply_overrides(&CliOverrides {
        debug: args.debug,
        strict: args.strict,
        model: args.model,
        max_tokens: args.max_tokens,
        n_returns: args.n_returns,
        experiment: args.experiment,
    })?;

    let runner = ExperimentRunner::new(config, args.config);
    if let Some(outcome) = runner.run()? {
        println!("{}", outcome.table.render_columns());
        info!(dir = %outcome.run_dir.display(), "results written");
    }
    Ok(())
}

fn list_models() {
    let registry = ModelRegistry::new(None);
    for (index, spec) in registry.list().enumerate() {
        println!(
            "{index:>3}  {:<36}  {:<10}  {:<5}  {}",
            spec.name,
            spec.short_name,
            spec.endpoint.as_str(),
            spec.backend.name()
        );
    }
}

fn recompute_stats(args: StatsArgs) -> Result<()> {
    let result = ExecutionResult::read(&args.results)?;
    let table = StatsTable::compute(&result);
    table.write_csv(&args.out)?;
    println!("{}", table.render_columns());
    Ok(())
}

fn scan(args: ScanArgs) -> Result<()> {
    let results_dir = args
        .results_dir
        .unwrap_or_else(|| PathsConfig::default().results_dir);
    let lines = scan_runs(&results_dir, args.since.as_deref())?;
    print!("{}", render_scan(&lines));
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use newsprobe_contracts::classify::{ClassificationArrays, Reply};
    use newsprobe_contracts::config::Experiment;
    use newsprobe_contracts::models::ModelRef;
    use newsprobe_contracts::runs::ExecutionResult;

    use super::{recompute_stats, Cli, Command, StatsArgs};

    #[test]
    fn run_flags_parse_into_overrides() {
        let cli = Cli::try_parse_from([
            "newsprobe",
            "run",
            "-c",
            "exp.toml",
            "-D",
            "-m",
            "gpt-4o",
            "-n",
            "5",
            "-e",
            "both",
            "-v",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(args.debug);
        assert!(!args.strict);
        assert!(args.verbose);
        assert_eq!(args.model, Some(ModelRef::Name("gpt-4o".to_string())));
        assert_eq!(args.n_returns, Some(5));
        assert_eq!(args.experiment, Some(Experiment::Both));
    }

    #[test]
    fn model_index_and_bad_experiment() {
        let cli = Cli::try_parse_from(["newsprobe", "run", "--model", "7"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.model, Some(ModelRef::Index(7)));

        assert!(Cli::try_parse_from(["newsprobe", "run", "-e", "video"]).is_err());
    }

    #[test]
    fn stats_rebuilds_csv_from_raw_results() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut arrays = ClassificationArrays::default();
        arrays.push(Reply::Yes);
        arrays.push(Reply::No);
        let mut result = ExecutionResult::new("gpt-4o", Experiment::NewsNoimage);
        result.record("1", false, arrays);
        let results = temp.path().join("res.bin");
        result.write(&results)?;

        let out = temp.path().join("res.csv");
        recompute_stats(StatsArgs {
            results,
            out: out.clone(),
        })?;
        let csv = std::fs::read_to_string(out)?;
        assert!(csv.starts_with("News,Fraction of YES\n1,0.500\n"));
        Ok(())
    }
}
