//! Workflow catalog
//!
//! In-memory store of everything the engine reads from a control document:
//! expanded workflow and proposal blocks, finish stages, clone modules,
//! product feature sections and texts. A catalog is a plain value. The merge
//! layer builds the effective catalog by cloning the pristine base and
//! patching the clone; nothing edits a catalog that someone else holds.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::control::addon::AddonFinishSteps;
use crate::control::document::{
    BlockDefaults, ControlDocument, FinishStage, ProposalBlock, StepSpec, TextEntry,
    WorkflowBlock,
};
use crate::error::Result;
use crate::expand::{expand_proposals, expand_workflows};
use crate::selector::{self, Query};

/// Feature sections copied from the control document
pub const FEATURE_SECTIONS: [&str; 4] = ["globals", "software", "network", "partitioning"];

/// A selected step together with its persisted identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleEntry {
    /// `"{stage}_{ordinal}"`; `None` for heading-only entries
    pub stable_id: Option<String>,
    pub spec: StepSpec,
}

/// The module list of the workflow selected for one stage/mode, unfiltered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowView {
    pub stage: String,
    pub mode: String,
    pub label: String,
    pub textdomain: Option<String>,
    pub defaults: BlockDefaults,
    pub entries: Vec<ModuleEntry>,
}

/// Attach stable ids to a module list.
///
/// Ordinals are 1-based and count dispatchable entries only, so headings do
/// not shift the ids of the steps after them. Ids are computed before any
/// enable/disable filtering and are never recomputed afterwards.
pub fn assign_stable_ids(stage: &str, modules: &[StepSpec]) -> Vec<ModuleEntry> {
    let mut ordinal = 0usize;
    modules
        .iter()
        .map(|spec| {
            let stable_id = if spec.is_heading() {
                None
            } else {
                ordinal += 1;
                Some(format!("{}_{}", stage, ordinal))
            };
            ModuleEntry {
                stable_id,
                spec: spec.clone(),
            }
        })
        .collect()
}

/// Expanded, queryable form of a control document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    pub(crate) textdomain: String,
    pub(crate) workflows: Vec<WorkflowBlock>,
    pub(crate) proposals: Vec<ProposalBlock>,
    pub(crate) finish_stages: Vec<FinishStage>,
    pub(crate) clone_modules: Vec<String>,
    pub(crate) features: BTreeMap<String, Map<String, Value>>,
    pub(crate) texts: BTreeMap<String, TextEntry>,
    /// Finish steps contributed by add-ons, empty for a base catalog
    pub(crate) addon_finish_steps: AddonFinishSteps,
}

impl Catalog {
    /// Build a catalog from a parsed control document, expanding every block
    pub fn from_document(doc: ControlDocument) -> Self {
        let ControlDocument {
            textdomain,
            workflows,
            proposals,
            inst_finish_stages,
            clone_modules,
            globals,
            software,
            network,
            partitioning,
            texts,
        } = doc;

        let features = FEATURE_SECTIONS
            .iter()
            .map(|s| s.to_string())
            .zip([globals, software, network, partitioning])
            .collect();

        let catalog = Self {
            textdomain,
            workflows: expand_workflows(&workflows),
            proposals: expand_proposals(&proposals),
            finish_stages: inst_finish_stages,
            clone_modules,
            features,
            texts,
            addon_finish_steps: AddonFinishSteps::default(),
        };
        log::info!(
            "Catalog built: {} workflow block(s), {} proposal block(s)",
            catalog.workflows.len(),
            catalog.proposals.len()
        );
        catalog
    }

    /// Load and expand the base control document.
    ///
    /// A missing or unparsable document is fatal; no default workflow is made up.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_document(ControlDocument::from_file(path)?))
    }

    pub fn textdomain(&self) -> &str {
        &self.textdomain
    }

    pub fn workflows(&self) -> &[WorkflowBlock] {
        &self.workflows
    }

    pub fn proposals(&self) -> &[ProposalBlock] {
        &self.proposals
    }

    pub fn finish_stages(&self) -> &[FinishStage] {
        &self.finish_stages
    }

    pub fn clone_modules(&self) -> &[String] {
        &self.clone_modules
    }

    pub fn addon_finish_steps(&self) -> &AddonFinishSteps {
        &self.addon_finish_steps
    }

    pub fn features(&self) -> &BTreeMap<String, Map<String, Value>> {
        &self.features
    }

    /// Look up one product feature, e.g. `feature("globals", "enable_autologin")`
    pub fn feature(&self, section: &str, key: &str) -> Option<&Value> {
        self.features.get(section).and_then(|s| s.get(key))
    }

    pub fn text(&self, key: &str) -> Option<&TextEntry> {
        self.texts.get(key)
    }

    /// Select the workflow for `query` and attach stable ids to its modules
    pub fn workflow(&self, query: &Query) -> WorkflowView {
        let block = selector::find_workflow(&self.workflows, query);
        WorkflowView {
            entries: assign_stable_ids(&query.stage, &block.modules),
            stage: query.stage.clone(),
            mode: query.mode.clone(),
            label: block.label,
            textdomain: block.textdomain,
            defaults: block.defaults,
        }
    }

    /// Select the proposal `name` for `query`
    pub fn proposal(&self, query: &Query, name: &str) -> ProposalBlock {
        selector::find_proposal(&self.proposals, query, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "textdomain": "control",
        "workflows": [
            { "stage": "initial,continue", "mode": "installation", "label": "Base",
              "modules": [
                { "heading": "Preparation" },
                { "name": "language" },
                { "name": "disks" },
                { "name": "proposal", "proposal": "initial" }
              ] }
        ],
        "proposals": [
            { "stage": "initial", "mode": "installation", "name": "initial",
              "proposal_modules": ["bootloader"] }
        ],
        "globals": { "enable_autologin": true },
        "texts": { "welcome": { "label": "Welcome" } }
    }"#;

    fn catalog() -> Catalog {
        Catalog::from_document(ControlDocument::from_json(DOC).unwrap())
    }

    #[test]
    fn test_blocks_are_expanded() {
        let catalog = catalog();
        assert_eq!(catalog.workflows().len(), 2);
        assert_eq!(catalog.workflows()[1].stage, "continue");
    }

    #[test]
    fn test_stable_ids_skip_headings() {
        let view = catalog().workflow(&Query::new("initial", "installation"));
        let ids: Vec<Option<&str>> = view.entries.iter().map(|e| e.stable_id.as_deref()).collect();
        assert_eq!(
            ids,
            vec![None, Some("initial_1"), Some("initial_2"), Some("initial_3")]
        );
        assert_eq!(view.label, "Base");
    }

    #[test]
    fn test_stable_ids_use_query_stage() {
        let view = catalog().workflow(&Query::new("continue", "installation"));
        assert_eq!(view.entries[1].stable_id.as_deref(), Some("continue_1"));
    }

    #[test]
    fn test_feature_and_text_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.feature("globals", "enable_autologin"), Some(&Value::Bool(true)));
        assert!(catalog.feature("software", "anything").is_none());
        assert_eq!(catalog.text("welcome").map(|t| t.label.as_str()), Some("Welcome"));
        assert_eq!(catalog.textdomain(), "control");
    }

    #[test]
    fn test_proposal_lookup() {
        let catalog = catalog();
        let proposal = catalog.proposal(&Query::new("initial", "installation"), "initial");
        assert_eq!(proposal.proposal_modules.len(), 1);
    }
}
