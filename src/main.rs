use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use slidecast::{plan_script, Pipeline, PipelineConfig, RunSummary};

#[derive(Debug, Parser)]
#[command(name = "slidecast")]
#[command(about = "Turn a narrated lesson script into a single slide video")]
#[command(version = env!("SLIDECAST_VERSION"))]
struct Cli {
    /// Lesson script (UTF-8 text with `Scene:` headings and quoted lines)
    script: PathBuf,

    /// Output video path
    output: PathBuf,

    /// YAML pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for slides, audio and segments (overrides config)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Units processed in parallel (overrides config)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Parse the script and list planned units without producing anything
    #[arg(long)]
    check: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(long, short = 'q')]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = load_config(&cli)?;
    if cli.check {
        return run_check(&cli.script, &config, cli.json);
    }

    let pipeline = Pipeline::new(config)?;
    let summary = pipeline.run(&cli.script, &cli.output)?;
    print_summary(&summary, cli.json)
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(work_dir) = &cli.work_dir {
        config.work.root = work_dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    config.validate()?;
    Ok(config)
}

fn run_check(script: &Path, config: &PipelineConfig, json: bool) -> Result<()> {
    let units = plan_script(script, config)?;
    if json {
        let planned = units
            .iter()
            .map(|unit| {
                serde_json::json!({
                    "index": unit.index,
                    "intro": unit.is_intro,
                    "duration_secs": unit.duration_secs,
                    "text": unit.text,
                })
            })
            .collect::<Vec<_>>();
        let body = serde_json::to_string_pretty(&serde_json::json!({ "units": planned }))
            .context("failed to serialize planned units")?;
        println!("{body}");
        return Ok(());
    }

    println!("OK: {} ({} units)", script.display(), units.len());
    for unit in &units {
        let label = if unit.is_intro {
            "intro".to_owned()
        } else {
            format!("{:>5}", unit.index)
        };
        println!("{label:>5}  {:>5.1}s  {}", unit.duration_secs, unit.preview());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let body =
            serde_json::to_string_pretty(summary).context("failed to serialize run summary")?;
        println!("{body}");
        return Ok(());
    }

    println!(
        "Wrote {} ({}/{} units, ~{:.1} min{})",
        summary.output.display(),
        summary.encoded_units,
        summary.total_units,
        summary.estimated_duration_secs / 60.0,
        if summary.degenerate { ", intro only" } else { "" }
    );
    for dropped in &summary.dropped {
        println!(
            "  dropped unit {} [{}]: {}",
            dropped.index, dropped.code, dropped.message
        );
    }
    Ok(())
}
