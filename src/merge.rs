//! Add-on merging
//!
//! The effective catalog is always rebuilt from the pristine base by replaying
//! every registered add-on in registration order. Nothing is ever patched on top
//! of an already patched catalog, so replaying the same ordered add-on list
//! gives the same result no matter how often it runs.
//!
//! # Merge pass
//!
//! 1. Clone the base catalog
//! 2. Skip add-ons whose content fingerprint was already merged in this pass
//! 3. Append new workflows and proposals (expanded)
//! 4. Apply workflow updates, then proposal updates
//! 5. Union feature sections, add-on keys win
//! 6. Append finish steps and clone modules
//! 7. Record add-ons that require registration

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::Catalog;
use crate::control::addon::{AddonDescriptor, ContentFingerprint, ProposalUpdate, WorkflowUpdate};
use crate::control::document::{ProposalBlock, WorkflowBlock};
use crate::expand::{expand_proposals, expand_workflows, split_tokens};
use crate::patch::apply_proposal_patches;

fn is_arch_agnostic(archs: &str) -> bool {
    matches!(archs.trim(), "" | "all")
}

/// Indices of the blocks an update for one (stage, mode, arch) scope edits.
///
/// An arch-agnostic update edits every block of the scope. An arch-specific
/// update edits the blocks pinned to that arch and falls back to the
/// arch-agnostic blocks of the scope when there are none.
fn update_targets<'a, I>(blocks: I, stage: &str, mode: &str, arch: &str) -> Vec<usize>
where
    I: Iterator<Item = (usize, (&'a str, &'a str, &'a str))> + Clone,
{
    let in_scope = blocks.filter(|(_, (s, m, _))| *s == stage && *m == mode);
    if is_arch_agnostic(arch) {
        return in_scope.map(|(i, _)| i).collect();
    }
    let specific: Vec<usize> = in_scope
        .clone()
        .filter(|(_, (_, _, a))| *a == arch)
        .map(|(i, _)| i)
        .collect();
    if !specific.is_empty() {
        return specific;
    }
    in_scope
        .filter(|(_, (_, _, a))| is_arch_agnostic(a))
        .map(|(i, _)| i)
        .collect()
}

fn apply_workflow_update(workflows: &mut Vec<WorkflowBlock>, update: &WorkflowUpdate, addon: &AddonDescriptor) {
    let set = update.patch_set(addon.textdomain.clone());

    for mode in split_tokens(&update.mode) {
        for arch in split_tokens(&update.archs) {
            for stage in split_tokens(&update.stage) {
                let scopes = workflows
                    .iter()
                    .map(|b| (b.stage.as_str(), b.mode.as_str(), b.archs.as_str()))
                    .enumerate();
                let mut targets = update_targets(scopes, &stage, &mode, &arch);

                if targets.is_empty() {
                    log::info!(
                        "Add-on '{}' defines new workflow stage '{}', mode '{}', arch '{}'",
                        addon.display_name,
                        stage,
                        mode,
                        arch
                    );
                    let mut block = WorkflowBlock::new(stage.clone(), mode.clone())
                        .with_archs(arch.clone());
                    block.defaults.archs = arch.clone();
                    block.textdomain = addon.textdomain.clone();
                    workflows.push(block);
                    targets.push(workflows.len() - 1);
                }

                for index in targets {
                    let block = &mut workflows[index];
                    if let Some(label) = &update.label {
                        block.label = label.clone();
                    }
                    if let Some(defaults) = &update.defaults {
                        if defaults.enable_back.is_some() {
                            block.defaults.enable_back = defaults.enable_back;
                        }
                        if defaults.enable_next.is_some() {
                            block.defaults.enable_next = defaults.enable_next;
                        }
                    }
                    set.apply(&mut block.modules);
                }
            }
        }
    }
}

fn apply_proposal_update(proposals: &mut Vec<ProposalBlock>, update: &ProposalUpdate, addon: &AddonDescriptor) {
    let set = update.patch_set(addon.textdomain.clone());

    for mode in split_tokens(&update.mode) {
        for arch in split_tokens(&update.archs) {
            for stage in split_tokens(&update.stage) {
                let scopes = proposals
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.name == update.name)
                    .map(|(i, p)| (i, (p.stage.as_str(), p.mode.as_str(), p.archs.as_str())));
                let mut targets = update_targets(scopes, &stage, &mode, &arch);

                if targets.is_empty() {
                    log::info!(
                        "Add-on '{}' defines new proposal '{}' for stage '{}', mode '{}'",
                        addon.display_name,
                        update.name,
                        stage,
                        mode
                    );
                    let mut block = ProposalBlock::new(stage.clone(), mode.clone(), update.name.clone());
                    block.archs = arch.clone();
                    block.textdomain = addon.textdomain.clone();
                    proposals.push(block);
                    targets.push(proposals.len() - 1);
                }

                for index in targets {
                    apply_proposal_patches(&mut proposals[index], &set, &addon.display_name);
                }
            }
        }
    }
}

/// Result of one merge pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub catalog: Catalog,
    /// Source ids of the add-ons merged, in order
    pub applied: Vec<String>,
    /// Source ids skipped because their content was already merged
    pub duplicates: Vec<String>,
    /// Add-ons that need registration, by source id, with their display names
    pub registration_required: BTreeMap<String, String>,
}

/// Merge `addons` in order onto a fresh copy of `base`
pub fn merge_all(base: &Catalog, addons: &[AddonDescriptor]) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        catalog: base.clone(),
        ..Default::default()
    };
    let mut seen: BTreeSet<&ContentFingerprint> = BTreeSet::new();

    for addon in addons {
        if !seen.insert(&addon.fingerprint) {
            log::info!(
                "Add-on '{}' ({}) already merged, skipping",
                addon.source_id,
                addon.fingerprint
            );
            outcome.duplicates.push(addon.source_id.clone());
            continue;
        }
        log::debug!("Merging add-on '{}' from {}", addon.display_name, addon.source_id);

        let catalog = &mut outcome.catalog;
        catalog.workflows.extend(expand_workflows(&addon.new_workflows));
        catalog.proposals.extend(expand_proposals(&addon.new_proposals));

        for update in &addon.workflow_updates {
            apply_workflow_update(&mut catalog.workflows, update, addon);
        }
        for update in &addon.proposal_updates {
            apply_proposal_update(&mut catalog.proposals, update, addon);
        }

        for (section, values) in &addon.features {
            let target = catalog.features.entry(section.clone()).or_default();
            for (key, value) in values {
                target.insert(key.clone(), value.clone());
            }
        }

        catalog.addon_finish_steps.extend(&addon.finish_steps);
        for module in &addon.clone_modules {
            if !catalog.clone_modules.contains(module) {
                catalog.clone_modules.push(module.clone());
            }
        }

        if addon.requires_registration {
            outcome
                .registration_required
                .insert(addon.source_id.clone(), addon.display_name.clone());
        }
        outcome.applied.push(addon.source_id.clone());
    }

    outcome
}

/// Owner of the base catalog, the active add-on list and the effective catalog.
///
/// Every change of the add-on list triggers a full rebuild from the base.
#[derive(Debug, Clone)]
pub struct MergeSession {
    base: Catalog,
    addons: Vec<AddonDescriptor>,
    merged: MergeOutcome,
}

impl MergeSession {
    pub fn new(base: Catalog) -> Self {
        let merged = MergeOutcome {
            catalog: base.clone(),
            ..Default::default()
        };
        Self {
            base,
            addons: Vec::new(),
            merged,
        }
    }

    /// The pristine base catalog
    pub fn base(&self) -> &Catalog {
        &self.base
    }

    /// The catalog with every registered add-on merged
    pub fn effective(&self) -> &Catalog {
        &self.merged.catalog
    }

    pub fn addons(&self) -> &[AddonDescriptor] {
        &self.addons
    }

    pub fn last_merge(&self) -> &MergeOutcome {
        &self.merged
    }

    /// Register an add-on and rebuild the effective catalog
    pub fn register_addon(&mut self, addon: AddonDescriptor) {
        log::info!("Registering add-on '{}'", addon.display_name);
        self.addons.push(addon);
        self.rebuild();
    }

    /// Drop every add-on loaded from `source_id`; returns false if none was
    pub fn unregister_addon(&mut self, source_id: &str) -> bool {
        let before = self.addons.len();
        self.addons.retain(|a| a.source_id != source_id);
        if self.addons.len() == before {
            log::warn!("No add-on registered from '{}'", source_id);
            return false;
        }
        self.rebuild();
        true
    }

    /// Forget all add-ons and return to the base catalog
    pub fn reset(&mut self) {
        self.addons.clear();
        self.rebuild();
    }

    /// Replay all registered add-ons onto the base catalog
    pub fn rebuild(&mut self) {
        self.merged = merge_all(&self.base, &self.addons);
        log::info!(
            "Effective catalog rebuilt: {} add-on(s) applied, {} duplicate(s) skipped",
            self.merged.applied.len(),
            self.merged.duplicates.len()
        );
    }

    pub fn requires_registration(&self, source_id: &str) -> bool {
        self.merged.registration_required.contains_key(source_id)
    }

    pub fn registration_required(&self) -> &BTreeMap<String, String> {
        &self.merged.registration_required
    }
}
