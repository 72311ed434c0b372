use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config_file::EngineConfig;

/// installflow - installation workflow engine
#[derive(Parser)]
#[command(name = "installflow")]
#[command(about = "Runs installer workflows described by control documents")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file; flags given on the command line win
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the control document and add-ons load and merge
    Validate {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Print the effective step list with stable ids
    Show {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Run a workflow, reading each step's outcome from stdin
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Index of the first step to run
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// Allow going back past the first step of this run
        #[arg(long)]
        allow_back: bool,

        /// Start at the step named by the recovery marker
        #[arg(long, conflicts_with = "from")]
        resume: bool,

        /// Recovery marker file
        #[arg(long)]
        marker: Option<PathBuf>,

        /// Do not write the recovery marker
        #[arg(long)]
        no_persist: bool,
    },
}

/// Which workflow to pick and how to filter it
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SelectionArgs {
    /// Base control document
    #[arg(long)]
    pub control: Option<PathBuf>,

    /// Add-on control document (repeatable)
    #[arg(long = "addon")]
    pub addons: Vec<PathBuf>,

    /// Stage (initial, continue, normal)
    #[arg(long)]
    pub stage: Option<String>,

    /// Mode (installation, update, autoinstallation)
    #[arg(long)]
    pub mode: Option<String>,

    /// Architecture; defaults to the running machine
    #[arg(long)]
    pub arch: Option<String>,

    /// Disable a module by name (repeatable)
    #[arg(long = "disable")]
    pub disabled: Vec<String>,

    /// Enable a module that is disabled by default (repeatable)
    #[arg(long = "enable")]
    pub enabled: Vec<String>,

    /// Disable a proposal by name (repeatable)
    #[arg(long = "disable-proposal")]
    pub disabled_proposals: Vec<String>,

    /// Extra selection parameter as KEY=VALUE, e.g. add_on_mode=yes
    #[arg(long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

impl SelectionArgs {
    /// Layer these flags over a loaded configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(control) = &self.control {
            config.control_file = control.clone();
        }
        config.addons.extend(self.addons.iter().cloned());
        if let Some(stage) = &self.stage {
            config.stage = stage.clone();
        }
        if let Some(mode) = &self.mode {
            config.mode = mode.clone();
        }
        if let Some(arch) = &self.arch {
            config.arch = Some(arch.clone());
        }
        for name in &self.enabled {
            config.disabled_modules.retain(|d| d != name);
            config.enabled_modules.push(name.clone());
        }
        for name in &self.disabled {
            config.enabled_modules.retain(|e| e != name);
            config.disabled_modules.push(name.clone());
        }
        config
            .disabled_proposals
            .extend(self.disabled_proposals.iter().cloned());
        config.params.extend(self.params.iter().cloned());
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
