//! Block expansion
//!
//! Control documents may declare one block for several stages, modes and
//! architectures at once (`"stage": "initial,continue"`). Everything after
//! loading works on single-valued blocks, so each declaration is expanded into
//! the cross product of its tokens.
//!
//! Emission order is modes outer, architectures middle, stages inner. The
//! selector takes the first match in catalog order, so this order must not
//! change between runs.

use crate::control::document::{ProposalBlock, WorkflowBlock};

/// Split a comma list into trimmed tokens.
///
/// An empty value yields a single empty token, the wildcard.
pub fn split_tokens(value: &str) -> Vec<String> {
    let tokens: Vec<String> = value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        vec![String::new()]
    } else {
        tokens
    }
}

/// Returns true if the value is a comma list that still needs expanding
pub fn is_multi_valued(value: &str) -> bool {
    value.contains(',')
}

/// Expand a workflow block into one block per (stage, mode, arch)
pub fn expand_workflow(block: &WorkflowBlock) -> Vec<WorkflowBlock> {
    let stages = split_tokens(&block.stage);
    let modes = split_tokens(&block.mode);
    let archs = split_tokens(&block.archs);

    let mut expanded = Vec::with_capacity(stages.len() * modes.len() * archs.len());
    for mode in &modes {
        for arch in &archs {
            for stage in &stages {
                let mut copy = block.clone();
                copy.stage = stage.clone();
                copy.mode = mode.clone();
                copy.archs = arch.clone();
                copy.defaults.archs = arch.clone();
                expanded.push(copy);
            }
        }
    }

    if expanded.len() > 1 {
        log::debug!(
            "Expanded workflow '{}' (stage={}, mode={}, archs={}) into {} blocks",
            block.label,
            block.stage,
            block.mode,
            block.archs,
            expanded.len()
        );
    }
    expanded
}

/// Expand a proposal block into one block per (stage, mode, arch)
pub fn expand_proposal(block: &ProposalBlock) -> Vec<ProposalBlock> {
    let stages = split_tokens(&block.stage);
    let modes = split_tokens(&block.mode);
    let archs = split_tokens(&block.archs);

    let mut expanded = Vec::with_capacity(stages.len() * modes.len() * archs.len());
    for mode in &modes {
        for arch in &archs {
            for stage in &stages {
                let mut copy = block.clone();
                copy.stage = stage.clone();
                copy.mode = mode.clone();
                copy.archs = arch.clone();
                expanded.push(copy);
            }
        }
    }
    expanded
}

/// Expand every workflow block, preserving document order
pub fn expand_workflows(blocks: &[WorkflowBlock]) -> Vec<WorkflowBlock> {
    blocks.iter().flat_map(expand_workflow).collect()
}

/// Expand every proposal block, preserving document order
pub fn expand_proposals(blocks: &[ProposalBlock]) -> Vec<ProposalBlock> {
    blocks.iter().flat_map(expand_proposal).collect()
}
