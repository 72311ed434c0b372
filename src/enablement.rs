//! Module enablement overrides
//!
//! Enable/disable decisions live beside the catalog, never inside it: the
//! catalog says what exists, this layer says what the executor gets to see.
//!
//! Individual overrides and blanket (stage, mode) disables are kept apart.
//! Each blanket disable records only what it switched off, and the effective
//! state is the individual overrides plus every scope still disabled. Undoing
//! one scope therefore leaves the overrides and the other scopes as they are.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{Catalog, ModuleEntry};
use crate::control::document::{ProposalModule, StepSpec};
use crate::selector::{self, Query};

/// Disable/enable sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnablementState {
    pub disabled_modules: BTreeSet<String>,
    /// Steps declared `enabled: false` that were switched on explicitly
    pub enabled_modules: BTreeSet<String>,
    pub disabled_proposals: BTreeSet<String>,
    /// Proposal name -> disabled proposal modules
    pub disabled_sub_proposals: BTreeMap<String, BTreeSet<String>>,
}

/// A (stage, mode) pair
pub type Scope = (String, String);

/// What one blanket disable switched off
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ScopeDisable {
    modules: BTreeSet<String>,
    proposals: BTreeSet<String>,
}

/// Override layer consulted by the executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleEnablement {
    overrides: EnablementState,
    scopes: BTreeMap<Scope, ScopeDisable>,
}

impl ModuleEnablement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Individual overrides, without blanket scope disables
    pub fn overrides(&self) -> &EnablementState {
        &self.overrides
    }

    /// Effective sets: individual overrides plus every disabled scope
    pub fn state(&self) -> EnablementState {
        let mut state = self.overrides.clone();
        for scope in self.scopes.values() {
            state.disabled_modules.extend(scope.modules.iter().cloned());
            state.disabled_proposals.extend(scope.proposals.iter().cloned());
        }
        let disabled = &state.disabled_modules;
        state.enabled_modules.retain(|name| !disabled.contains(name));
        state
    }

    pub fn disabled_scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.keys()
    }

    pub fn disable_module(&mut self, name: &str) {
        self.overrides.enabled_modules.remove(name);
        if self.overrides.disabled_modules.insert(name.to_string()) {
            log::debug!("Module '{}' disabled", name);
        }
    }

    /// Enable `name`, also lifting any blanket disable that covers it
    pub fn enable_module(&mut self, name: &str) {
        self.overrides.enabled_modules.insert(name.to_string());
        if self.overrides.disabled_modules.remove(name) {
            log::debug!("Module '{}' enabled", name);
        }
        for scope in self.scopes.values_mut() {
            scope.modules.remove(name);
        }
    }

    pub fn disable_proposal(&mut self, name: &str) {
        if self.overrides.disabled_proposals.insert(name.to_string()) {
            log::debug!("Proposal '{}' disabled", name);
        }
    }

    pub fn enable_proposal(&mut self, name: &str) {
        if self.overrides.disabled_proposals.remove(name) {
            log::debug!("Proposal '{}' enabled", name);
        }
        for scope in self.scopes.values_mut() {
            scope.proposals.remove(name);
        }
    }

    pub fn disable_sub_proposal(&mut self, proposal: &str, module: &str) {
        self.overrides
            .disabled_sub_proposals
            .entry(proposal.to_string())
            .or_default()
            .insert(module.to_string());
    }

    pub fn enable_sub_proposal(&mut self, proposal: &str, module: &str) {
        if let Some(set) = self.overrides.disabled_sub_proposals.get_mut(proposal) {
            set.remove(module);
            if set.is_empty() {
                self.overrides.disabled_sub_proposals.remove(proposal);
            }
        }
    }

    fn is_module_disabled(&self, name: &str) -> bool {
        self.overrides.disabled_modules.contains(name)
            || self.scopes.values().any(|s| s.modules.contains(name))
    }

    pub fn is_proposal_enabled(&self, name: &str) -> bool {
        !self.overrides.disabled_proposals.contains(name)
            && !self.scopes.values().any(|s| s.proposals.contains(name))
    }

    pub fn is_sub_proposal_enabled(&self, proposal: &str, module: &str) -> bool {
        self.overrides
            .disabled_sub_proposals
            .get(proposal)
            .is_none_or(|set| !set.contains(module))
    }

    /// Whether a step survives the overrides. Headings always do.
    pub fn is_step_enabled(&self, spec: &StepSpec) -> bool {
        if spec.is_heading() {
            return true;
        }
        if let Some(proposal) = spec.proposal.as_deref() {
            if !proposal.is_empty() && !self.is_proposal_enabled(proposal) {
                return false;
            }
        }
        let name = spec.effective_name();
        if self.is_module_disabled(name) {
            return false;
        }
        spec.enabled || self.overrides.enabled_modules.contains(name)
    }

    /// Entries the executor gets to see; stable ids are carried over untouched
    pub fn filter_entries(&self, entries: &[ModuleEntry]) -> Vec<ModuleEntry> {
        entries
            .iter()
            .filter(|e| self.is_step_enabled(&e.spec))
            .cloned()
            .collect()
    }

    /// Enabled modules of the proposal `proposal`
    pub fn filter_proposal_modules(
        &self,
        proposal: &str,
        modules: &[ProposalModule],
    ) -> Vec<ProposalModule> {
        modules
            .iter()
            .filter(|m| self.is_sub_proposal_enabled(proposal, &m.name))
            .cloned()
            .collect()
    }

    /// Disable every module and proposal `query` selects.
    ///
    /// The scope is keyed by the query's (stage, mode); the query's arch and
    /// parameters pick the block, as they do for the executor. A scope that is
    /// already disabled is left alone.
    pub fn disable_all_in_scope(&mut self, catalog: &Catalog, query: &Query) {
        let scope = (query.stage.clone(), query.mode.clone());
        if self.scopes.contains_key(&scope) {
            log::debug!("Scope {}/{} already disabled", query.stage, query.mode);
            return;
        }

        let mut disable = ScopeDisable::default();
        let view = catalog.workflow(query);
        for entry in view.entries.iter().filter(|e| !e.spec.is_heading()) {
            if !entry.spec.name.is_empty() {
                disable.modules.insert(entry.spec.name.clone());
            }
            if let Some(proposal) = entry.spec.proposal.as_deref().filter(|p| !p.is_empty()) {
                disable.proposals.insert(proposal.to_string());
            }
        }
        for proposal in catalog
            .proposals()
            .iter()
            .filter(|p| selector::proposal_matches(p, query))
        {
            disable.proposals.insert(proposal.name.clone());
        }

        log::info!(
            "Disabled all modules and proposals in {}/{} ({} module(s), {} proposal(s))",
            query.stage,
            query.mode,
            disable.modules.len(),
            disable.proposals.len()
        );
        self.scopes.insert(scope, disable);
    }

    /// Undo `disable_all_in_scope` for (stage, mode).
    ///
    /// Returns false if the scope was not disabled.
    pub fn enable_all_in_scope(&mut self, stage: &str, mode: &str) -> bool {
        let scope = (stage.to_string(), mode.to_string());
        if self.scopes.remove(&scope).is_some() {
            log::info!("Restored module enablement for {}/{}", stage, mode);
            true
        } else {
            log::warn!("Scope {}/{} was not disabled, nothing to restore", stage, mode);
            false
        }
    }
}
