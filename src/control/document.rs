//! Base control document model
//!
//! The control document is JSON with the following top-level layout:
//! ```json
//! {
//!   "textdomain": "control",
//!   "workflows": [
//!     {
//!       "stage": "initial", "mode": "installation,update", "archs": "all",
//!       "label": "Installation",
//!       "defaults": { "enable_back": true },
//!       "modules": [
//!         { "heading": "Preparation" },
//!         { "name": "language", "label": "Language" },
//!         { "name": "proposal", "proposal": "initial", "label": "Settings" }
//!       ]
//!     }
//!   ],
//!   "proposals": [
//!     { "stage": "initial", "mode": "installation", "name": "initial",
//!       "proposal_modules": ["bootloader", { "name": "software", "presentation_order": 20 }] }
//!   ],
//!   "inst_finish_stages": [ { "label": "Finish", "steps": ["copy_files"] } ],
//!   "clone_modules": ["users"],
//!   "globals": {}, "software": {}, "network": {}, "partitioning": {},
//!   "texts": { "congratulate": { "label": "Done" } }
//! }
//! ```
//!
//! `stage`, `mode` and `archs` may hold comma lists here; they are split by
//! [`crate::expand`] before anything else looks at them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, WorkflowError};

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Block-wide defaults for the steps of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_back: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_next: Option<bool>,
    /// Architecture filter applied to steps that declare none of their own
    #[serde(skip_serializing_if = "String::is_empty")]
    pub archs: String,
}

/// One entry of a workflow's module list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Client to dispatch instead of `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,

    /// Section heading; a heading-only entry is structural and never dispatched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Proposal this step presents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textdomain: Option<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Whether the step runs in update mode
    #[serde(rename = "update", default = "default_true", skip_serializing_if = "is_true")]
    pub applicable_during_update: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub retranslate: bool,

    /// A crash of an optional step is skipped instead of asking the user
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archs: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_back: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_next: Option<bool>,

    /// Extra arguments handed to the client on dispatch
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Value>,
}

impl StepSpec {
    /// Create a plain step dispatching `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            applicable_during_update: true,
            ..Default::default()
        }
    }

    /// Create a heading-only structural entry
    pub fn heading(text: impl Into<String>) -> Self {
        Self {
            heading: Some(text.into()),
            enabled: true,
            applicable_during_update: true,
            ..Default::default()
        }
    }

    /// Create a step presenting the proposal `proposal` through client `name`
    pub fn proposal(name: impl Into<String>, proposal: impl Into<String>) -> Self {
        Self {
            proposal: Some(proposal.into()),
            ..Self::new(name)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_archs(mut self, archs: impl Into<String>) -> Self {
        self.archs = Some(archs.into());
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Name used by patches and enablement: `name`, or the proposal name for
    /// nameless proposal steps
    pub fn effective_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.proposal.as_deref().unwrap_or("")
    }

    /// Returns true for structural heading-only entries
    pub fn is_heading(&self) -> bool {
        self.heading.as_deref().is_some_and(|h| !h.is_empty())
            && self.name.is_empty()
            && self.proposal.as_deref().is_none_or(str::is_empty)
    }

    /// Client name passed to the step invoker
    pub fn client_name(&self) -> &str {
        match self.execute.as_deref() {
            Some(exec) if !exec.is_empty() => exec,
            _ => &self.name,
        }
    }
}

/// A workflow definition: the module list for one stage/mode/arch scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBlock {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub archs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textdomain: Option<String>,
    #[serde(default)]
    pub defaults: BlockDefaults,
    #[serde(default)]
    pub modules: Vec<StepSpec>,
    /// Additional selection keys such as `add_on_mode`
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl WorkflowBlock {
    pub fn new(stage: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            mode: mode.into(),
            ..Default::default()
        }
    }

    pub fn with_archs(mut self, archs: impl Into<String>) -> Self {
        self.archs = archs.into();
        self
    }

    pub fn with_modules(mut self, modules: Vec<StepSpec>) -> Self {
        self.modules = modules;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One entry of a proposal's module list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawProposalModule")]
pub struct ProposalModule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub textdomain: Option<String>,
}

/// Control documents write proposal modules either as a bare name or as a map
#[derive(Deserialize)]
#[serde(untagged)]
enum RawProposalModule {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        presentation_order: Option<u32>,
        #[serde(default)]
        textdomain: Option<String>,
    },
}

impl From<RawProposalModule> for ProposalModule {
    fn from(raw: RawProposalModule) -> Self {
        match raw {
            RawProposalModule::Name(name) => Self::new(name),
            RawProposalModule::Full {
                name,
                presentation_order,
                textdomain,
            } => Self {
                name,
                presentation_order,
                textdomain,
            },
        }
    }
}

impl ProposalModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            presentation_order: None,
            textdomain: None,
        }
    }
}

/// A tab grouping proposal modules in the proposal dialog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSpec {
    pub label: String,
    #[serde(default)]
    pub proposal_modules: Vec<String>,
}

/// A proposal definition for one stage/mode/arch scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalBlock {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub archs: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textdomain: Option<String>,
    #[serde(default)]
    pub proposal_modules: Vec<ProposalModule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_tabs: Option<Vec<TabSpec>>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl ProposalBlock {
    pub fn new(stage: impl Into<String>, mode: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            mode: mode.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proposal_modules = names.into_iter().map(ProposalModule::new).collect();
        self
    }
}

/// Ordered group of steps run at the end of the installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishStage {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Translatable text entry referenced by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntry {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textdomain: Option<String>,
}

/// Parsed base control document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlDocument {
    #[serde(default = "default_textdomain")]
    pub textdomain: String,
    pub workflows: Vec<WorkflowBlock>,
    #[serde(default)]
    pub proposals: Vec<ProposalBlock>,
    #[serde(default)]
    pub inst_finish_stages: Vec<FinishStage>,
    #[serde(default)]
    pub clone_modules: Vec<String>,
    #[serde(default)]
    pub globals: Map<String, Value>,
    #[serde(default)]
    pub software: Map<String, Value>,
    #[serde(default)]
    pub network: Map<String, Value>,
    #[serde(default)]
    pub partitioning: Map<String, Value>,
    #[serde(default)]
    pub texts: BTreeMap<String, TextEntry>,
}

fn default_textdomain() -> String {
    "control".to_string()
}

impl ControlDocument {
    /// Load the base control document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::control_document(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content).map_err(|e| {
            WorkflowError::control_document(format!("{}: {}", path.display(), e))
        })
    }

    /// Parse the base control document from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(json)
            .map_err(|e| WorkflowError::control_document(e.to_string()))?;
        log::debug!(
            "Parsed control document: {} workflow(s), {} proposal(s)",
            doc.workflows.len(),
            doc.proposals.len()
        );
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "workflows": [{
            "stage": "initial",
            "mode": "installation",
            "add_on_mode": "no",
            "modules": [
                { "heading": "Base" },
                { "name": "language", "enable_back": false },
                { "name": "disks", "update": false, "arguments": { "expert": true } },
                { "name": "proposal", "proposal": "initial" }
            ]
        }],
        "proposals": [{
            "stage": "initial", "mode": "installation", "name": "initial",
            "proposal_modules": ["bootloader", { "name": "software", "presentation_order": 20 }]
        }],
        "texts": { "welcome": { "label": "Welcome" } }
    }"#;

    #[test]
    fn test_parse_sample_document() {
        let doc = ControlDocument::from_json(SAMPLE).unwrap();
        assert_eq!(doc.textdomain, "control");
        let wf = &doc.workflows[0];
        assert_eq!(wf.modules.len(), 4);
        assert_eq!(wf.params.get("add_on_mode"), Some(&Value::from("no")));
        assert!(wf.modules[0].is_heading());
        assert_eq!(wf.modules[1].enable_back, Some(false));
        assert!(!wf.modules[2].applicable_during_update);
        assert_eq!(wf.modules[2].arguments.get("expert"), Some(&Value::Bool(true)));
        assert_eq!(wf.modules[3].proposal.as_deref(), Some("initial"));
        assert!(wf.modules[3].enabled);
    }

    #[test]
    fn test_proposal_module_forms() {
        let doc = ControlDocument::from_json(SAMPLE).unwrap();
        let modules = &doc.proposals[0].proposal_modules;
        assert_eq!(modules[0], ProposalModule::new("bootloader"));
        assert_eq!(modules[1].presentation_order, Some(20));
    }

    #[test]
    fn test_missing_workflows_is_error() {
        let err = ControlDocument::from_json(r#"{ "proposals": [] }"#).unwrap_err();
        assert!(matches!(err, WorkflowError::ControlDocument(_)));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = ControlDocument::from_file("/nonexistent/control.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();
        let doc = ControlDocument::from_file(file.path()).unwrap();
        assert_eq!(doc.texts["welcome"].label, "Welcome");
    }

    #[test]
    fn test_step_helpers() {
        let step = StepSpec::new("users").with_label("Users");
        assert_eq!(step.effective_name(), "users");
        assert_eq!(step.client_name(), "users");
        assert!(!step.is_heading());

        let mut step = StepSpec::proposal("", "network");
        assert_eq!(step.effective_name(), "network");
        step.execute = Some("inst_network_proposal".into());
        assert_eq!(step.client_name(), "inst_network_proposal");

        assert!(StepSpec::heading("Configuration").is_heading());
    }

    #[test]
    fn test_serialization_skips_defaults() {
        let json = serde_json::to_string(&StepSpec::new("users")).unwrap();
        assert_eq!(json, r#"{"name":"users"}"#);
    }
}
