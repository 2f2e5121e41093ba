use anyhow::{Context, Result};
use clap::Parser;
use class_rebuild::cli::{Cli, OutputFormat, USAGE};
use class_rebuild::compiler::UnitStatus;
use class_rebuild::config::{BuildConfig, clear_state};
use class_rebuild::graph::SnapshotGraphBuilder;
use class_rebuild::javac::JavacCompiler;
use class_rebuild::orchestrator::{BuildReport, BuildRequest, IncrementalBuilder, Ports};
use class_rebuild::reader::FsBinaryReader;
use class_rebuild::store::StateStore;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let Some(config) = BuildConfig::resolve(&cli) else {
        println!("{USAGE}");
        return Ok(ExitCode::from(1));
    };

    std::fs::create_dir_all(&config.destination).with_context(|| {
        format!(
            "Failed to create target directory: {}",
            config.destination.display()
        )
    })?;
    if cli.clean {
        clear_state(&config.state_path)?;
    }

    let report = build(&config)?;
    match cli.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if cli.fail_on_error && !report.success {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build(config: &BuildConfig) -> Result<BuildReport> {
    let store = StateStore::open(config.state_path.clone())?;
    let compiler = JavacCompiler::new(config.javac.clone());
    let builder = IncrementalBuilder::new(Ports {
        compiler: &compiler,
        reader: &FsBinaryReader,
        fingerprints: &store,
        fingerprinter: config.fingerprinter,
        class_maps: &store,
        graphs: &SnapshotGraphBuilder,
    });

    let report = builder
        .run(&BuildRequest {
            source_root: config.source_root.clone(),
            destination: config.destination.clone(),
            classpath: config.classpath.clone(),
        })
        .with_context(|| format!("Build of {} failed", config.source_root.display()))?;
    Ok(report)
}

fn print_text(report: &BuildReport) {
    for (source, status) in &report.units {
        match status {
            UnitStatus::Ok => println!("{source}: OK"),
            UnitStatus::Failed(diagnostics) => {
                println!("{source}: Failed");
                for line in diagnostics {
                    println!("{line}");
                }
            }
        }
    }
    println!(
        "Compiled {} files in: {}ms",
        report.compiled(),
        report.duration_ms
    );
}
