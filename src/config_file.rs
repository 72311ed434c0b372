//! Engine configuration file handling.
//!
//! The engine configuration names the control document, the add-ons to merge
//! and the stage/mode/arch to run. Command-line flags override what the file
//! says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::control::addon::AddonDescriptor;
use crate::enablement::ModuleEnablement;
use crate::executor::RunContext;
use crate::expand::is_multi_valued;
use crate::merge::MergeSession;

/// Default location of the base control document
pub const DEFAULT_CONTROL_FILE: &str = "/etc/installflow/control.json";

/// Default location of the recovery marker
pub const DEFAULT_RECOVERY_MARKER: &str = "/var/lib/installflow/step";

/// Engine configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Documents
    pub control_file: PathBuf,
    pub addons: Vec<PathBuf>,

    // Selection
    pub stage: String,
    pub mode: String,
    pub arch: Option<String>, // None = running machine
    pub params: BTreeMap<String, String>,

    // Enablement overrides
    pub disabled_modules: Vec<String>,
    pub enabled_modules: Vec<String>,
    pub disabled_proposals: Vec<String>,

    // Execution
    pub allow_back: bool,
    pub recovery_marker: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_file: PathBuf::from(DEFAULT_CONTROL_FILE),
            addons: Vec::new(),
            stage: "initial".to_string(),
            mode: "installation".to_string(),
            arch: None,
            params: BTreeMap::new(),
            disabled_modules: Vec::new(),
            enabled_modules: Vec::new(),
            disabled_proposals: Vec::new(),
            allow_back: false,
            recovery_marker: PathBuf::from(DEFAULT_RECOVERY_MARKER),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.control_file.as_os_str().is_empty() {
            anyhow::bail!("Control file must be specified");
        }

        // Selection must name exactly one stage/mode/arch; lists only belong in documents
        for (what, value) in [("Stage", &self.stage), ("Mode", &self.mode)] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must be specified", what);
            }
            if is_multi_valued(value) {
                anyhow::bail!("{} must be a single value, got '{}'", what, value);
            }
        }
        if let Some(arch) = &self.arch {
            if arch.trim().is_empty() || is_multi_valued(arch) {
                anyhow::bail!("Arch must be a single value, got '{}'", arch);
            }
        }

        if let Some(name) = self
            .enabled_modules
            .iter()
            .find(|name| self.disabled_modules.contains(name))
        {
            anyhow::bail!("Module '{}' is both enabled and disabled", name);
        }

        if self.recovery_marker.as_os_str().is_empty() {
            anyhow::bail!("Recovery marker path must be specified");
        }

        Ok(())
    }

    /// Run context for the configured selection
    pub fn run_context(&self) -> RunContext {
        let mut context = RunContext::new(self.stage.clone(), self.mode.clone());
        if let Some(arch) = &self.arch {
            context = context.with_arch(arch.clone());
        }
        for (key, value) in &self.params {
            context = context.with_param(key.clone(), value.clone());
        }
        context
    }

    /// Enablement overrides listed in the configuration
    pub fn enablement(&self) -> ModuleEnablement {
        let mut enablement = ModuleEnablement::new();
        for name in &self.enabled_modules {
            enablement.enable_module(name);
        }
        for name in &self.disabled_modules {
            enablement.disable_module(name);
        }
        for name in &self.disabled_proposals {
            enablement.disable_proposal(name);
        }
        enablement
    }

    /// Load the control document and merge every configured add-on
    pub fn merge_session(&self) -> Result<MergeSession> {
        let base = Catalog::from_file(&self.control_file).with_context(|| {
            format!("Failed to load control document {:?}", self.control_file)
        })?;

        let mut session = MergeSession::new(base);
        for path in &self.addons {
            let addon = AddonDescriptor::from_file(path)
                .with_context(|| format!("Failed to load add-on {:?}", path))?;
            session.register_addon(addon);
        }
        Ok(session)
    }
}
