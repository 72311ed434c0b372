//! Workflow and proposal selection
//!
//! A query names a stage, a mode and optional extra parameters. A block
//! matches when its stage and mode equal the query or are empty, and every
//! query parameter is either undeclared by the block or equal to it. The
//! block's architecture takes part as the `archs` parameter. The first match
//! in catalog order wins.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::control::document::{ProposalBlock, WorkflowBlock};

/// Parameter that always matches blocks not declaring it
pub const ADD_ON_MODE: &str = "add_on_mode";

/// Parameter carrying the block architecture
pub const ARCHS: &str = "archs";

/// Parameter carrying the proposal name
pub const NAME: &str = "name";

/// Selection query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub stage: String,
    pub mode: String,
    pub params: BTreeMap<String, String>,
}

impl Query {
    pub fn new(stage: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            mode: mode.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_arch(self, arch: impl Into<String>) -> Self {
        self.with_param(ARCHS, arch)
    }
}

fn scope_matches(block_value: &str, query_value: &str) -> bool {
    block_value.is_empty() || block_value == query_value
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Match one query parameter against what the block declares.
///
/// An undeclared key matches, so blocks that declare no `add_on_mode` are
/// picked for add-on queries too.
fn param_matches(declared: Option<String>, wanted: &str) -> bool {
    declared.is_none_or(|value| value == wanted)
}

fn arch_param(archs: &str) -> Option<String> {
    match archs.trim() {
        "" | "all" => None,
        arch => Some(arch.to_string()),
    }
}

fn workflow_param(block: &WorkflowBlock, key: &str) -> Option<String> {
    if key == ARCHS {
        return arch_param(&block.archs);
    }
    block.params.get(key).map(value_as_string)
}

fn proposal_param(block: &ProposalBlock, key: &str) -> Option<String> {
    match key {
        ARCHS => arch_param(&block.archs),
        NAME => Some(block.name.clone()),
        _ => block.params.get(key).map(value_as_string),
    }
}

/// Returns true if the workflow block satisfies `query`
pub fn workflow_matches(block: &WorkflowBlock, query: &Query) -> bool {
    scope_matches(&block.stage, &query.stage)
        && scope_matches(&block.mode, &query.mode)
        && query
            .params
            .iter()
            .all(|(key, wanted)| param_matches(workflow_param(block, key), wanted))
}

/// Returns true if the proposal block satisfies `query`
pub fn proposal_matches(block: &ProposalBlock, query: &Query) -> bool {
    scope_matches(&block.stage, &query.stage)
        && scope_matches(&block.mode, &query.mode)
        && query
            .params
            .iter()
            .all(|(key, wanted)| param_matches(proposal_param(block, key), wanted))
}

/// Index of the first matching workflow block
pub fn position_workflow(blocks: &[WorkflowBlock], query: &Query) -> Option<usize> {
    blocks.iter().position(|b| workflow_matches(b, query))
}

/// First workflow block matching `query`, or an empty block if none does
pub fn find_workflow(blocks: &[WorkflowBlock], query: &Query) -> WorkflowBlock {
    match position_workflow(blocks, query) {
        Some(index) => blocks[index].clone(),
        None => {
            log::warn!(
                "No workflow matches stage '{}', mode '{}' ({:?})",
                query.stage,
                query.mode,
                query.params
            );
            WorkflowBlock::new(query.stage.clone(), query.mode.clone())
        }
    }
}

/// First proposal block named `name` matching the query, or an empty proposal
pub fn find_proposal(blocks: &[ProposalBlock], query: &Query, name: &str) -> ProposalBlock {
    let query = query.clone().with_param(NAME, name);
    match blocks.iter().find(|b| proposal_matches(b, &query)) {
        Some(block) => block.clone(),
        None => {
            log::warn!(
                "No proposal '{}' for stage '{}', mode '{}'",
                name,
                query.stage,
                query.mode
            );
            ProposalBlock::new(query.stage.clone(), query.mode.clone(), name)
        }
    }
}
