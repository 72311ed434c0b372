//! installflow - Main entry point
//!
//! Loads the engine configuration, merges add-ons into the control document
//! and validates, shows or runs the selected workflow.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::io;

use installflow::cli::{Cli, Commands, SelectionArgs};
use installflow::config_file::EngineConfig;
use installflow::executor::StepExecutor;
use installflow::invoker::LineInvoker;
use installflow::recovery::FileRecoveryStore;
use installflow::types::Outcome;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env() // RUST_LOG overrides
        .init();
}

/// Configuration file (if any) with command-line flags layered on top
fn load_config(cli_config: Option<&std::path::Path>, selection: &SelectionArgs) -> Result<EngineConfig> {
    let mut config = match cli_config {
        Some(path) => {
            info!("Loading engine configuration from {:?}", path);
            EngineConfig::load_from_file(path)?
        }
        None => EngineConfig::default(),
    };
    selection.apply(&mut config);
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<()> {
    let session = config.merge_session()?;
    let catalog = session.effective();
    println!(
        "✓ {:?}: {} workflow block(s), {} proposal block(s)",
        config.control_file,
        catalog.workflows().len(),
        catalog.proposals().len()
    );
    let merge = session.last_merge();
    for source in &merge.applied {
        println!("✓ add-on {}", source);
    }
    for source in &merge.duplicates {
        println!("- add-on {} (duplicate, skipped)", source);
    }
    for (source, name) in session.registration_required() {
        println!("! add-on {} ({}) requires registration", source, name);
    }
    Ok(())
}

fn show(config: &EngineConfig) -> Result<()> {
    let session = config.merge_session()?;
    let enablement = config.enablement();
    let context = config.run_context();
    let view = session.effective().workflow(&context.query());

    println!(
        "{}/{} on {}: {}",
        context.stage, context.mode, context.arch, view.label
    );
    for entry in &view.entries {
        let spec = &entry.spec;
        if spec.is_heading() {
            println!("  == {}", spec.heading.as_deref().unwrap_or_default());
            continue;
        }
        let marker = if enablement.is_step_enabled(spec) { ' ' } else { '-' };
        let proposal = spec
            .proposal
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(" [proposal {}]", p))
            .unwrap_or_default();
        println!(
            "{} {:<16} {}{}",
            marker,
            entry.stable_id.as_deref().unwrap_or("-"),
            spec.client_name(),
            proposal
        );
    }
    Ok(())
}

fn run(
    config: &EngineConfig,
    from: usize,
    allow_back: bool,
    resume: bool,
    persist: bool,
) -> Result<Outcome> {
    let session = config.merge_session()?;
    let enablement = config.enablement();
    let context = config.run_context();
    let context = if persist { context } else { context.with_persistence(false) };
    let store = FileRecoveryStore::new(config.recovery_marker.clone());

    let stdin = io::stdin();
    let invoker = LineInvoker::new(stdin.lock(), io::stdout());
    let mut executor = StepExecutor::new(session.effective(), &enablement, context, invoker, store);

    let start = if resume {
        match executor.pending_resume()? {
            Some(index) => {
                info!("Resuming at index {}", index);
                index
            }
            None => {
                info!("No recovery marker, starting at index {}", from);
                from
            }
        }
    } else {
        from
    };

    Ok(executor.run(start, allow_back || config.allow_back)?)
}

/// Main application entry point
fn main() -> Result<()> {
    init_logger();
    debug!("installflow starting up");

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Validate { selection } => {
            let config = load_config(cli.config.as_deref(), &selection)?;
            if let Err(e) = validate(&config) {
                error!("Validation failed: {:#}", e);
                eprintln!("✗ Validation failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Show { selection } => {
            let config = load_config(cli.config.as_deref(), &selection)?;
            show(&config)?;
        }
        Commands::Run {
            selection,
            from,
            allow_back,
            resume,
            marker,
            no_persist,
        } => {
            let mut config = load_config(cli.config.as_deref(), &selection)?;
            if let Some(marker) = marker {
                config.recovery_marker = marker;
            }
            let outcome = run(&config, from, allow_back, resume, !no_persist)?;
            println!("result {}", outcome);
            if matches!(outcome, Outcome::Abort | Outcome::Cancel) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
