//! Add-on patch operations on module lists
//!
//! A patch edits the ordered module list of one workflow block, or the
//! proposal-module list of one proposal block. Patches never fail: a patch
//! that names a module the list does not contain is logged and skipped,
//! leaving the list as it was.

use crate::control::document::{ProposalBlock, ProposalModule, StepSpec, TabSpec};

/// Entry of a patchable list
pub trait PatchEntry: Clone {
    /// Name patches match against
    fn patch_name(&self) -> &str;

    /// Text domain used to resolve this entry's labels
    fn textdomain(&self) -> Option<&str>;

    fn set_textdomain(&mut self, domain: String);
}

impl PatchEntry for StepSpec {
    fn patch_name(&self) -> &str {
        self.effective_name()
    }

    fn textdomain(&self) -> Option<&str> {
        self.textdomain.as_deref()
    }

    fn set_textdomain(&mut self, domain: String) {
        self.textdomain = Some(domain);
    }
}

impl PatchEntry for ProposalModule {
    fn patch_name(&self) -> &str {
        &self.name
    }

    fn textdomain(&self) -> Option<&str> {
        self.textdomain.as_deref()
    }

    fn set_textdomain(&mut self, domain: String) {
        self.textdomain = Some(domain);
    }
}

/// A single list edit
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    /// Drop every entry whose name is listed
    Remove { names: Vec<String> },
    /// Put `new` where the first entry named `old` was
    Replace { old: String, new: Vec<T> },
    /// Put `new` before the first entry named `before`; the anchor stays if `keep`
    Insert {
        before: String,
        new: Vec<T>,
        keep: bool,
    },
    /// Push `new` to the end of the list
    Append { new: Vec<T> },
}

/// Ordered patches contributed by one add-on
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSet<T> {
    /// Text domain of the originating add-on, stamped on every added entry
    pub textdomain: Option<String>,
    pub patches: Vec<Patch<T>>,
}

impl<T> Default for PatchSet<T> {
    fn default() -> Self {
        Self {
            textdomain: None,
            patches: Vec::new(),
        }
    }
}

impl<T: PatchEntry> PatchSet<T> {
    pub fn new(textdomain: Option<String>) -> Self {
        Self {
            textdomain,
            patches: Vec::new(),
        }
    }

    pub fn push(&mut self, patch: Patch<T>) {
        self.patches.push(patch);
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Apply every patch in order to `list`
    pub fn apply(&self, list: &mut Vec<T>) {
        for patch in &self.patches {
            apply_patch(list, patch, self.textdomain.as_deref());
        }
    }
}

fn tagged<T: PatchEntry>(entries: &[T], domain: Option<&str>) -> Vec<T> {
    entries
        .iter()
        .cloned()
        .map(|mut entry| {
            if let Some(domain) = domain {
                if entry.textdomain().is_none() {
                    entry.set_textdomain(domain.to_string());
                }
            }
            entry
        })
        .collect()
}

/// Apply one patch to `list`, stamping added entries with `domain`
pub fn apply_patch<T: PatchEntry>(list: &mut Vec<T>, patch: &Patch<T>, domain: Option<&str>) {
    match patch {
        Patch::Remove { names } => {
            for name in names {
                if !list.iter().any(|entry| entry.patch_name() == name) {
                    log::warn!("Cannot remove module '{}': not present in target list", name);
                }
            }
            list.retain(|entry| !names.iter().any(|name| name == entry.patch_name()));
        }
        Patch::Replace { old, new } => {
            splice_at(list, old, tagged(new, domain), false, "replace");
        }
        Patch::Insert { before, new, keep } => {
            splice_at(list, before, tagged(new, domain), *keep, "insert before");
        }
        Patch::Append { new } => {
            list.extend(tagged(new, domain));
        }
    }
}

fn splice_at<T: PatchEntry>(list: &mut Vec<T>, anchor: &str, new: Vec<T>, keep: bool, op: &str) {
    let Some(pos) = list.iter().position(|entry| entry.patch_name() == anchor) else {
        log::warn!("Cannot {} module '{}': not present in target list", op, anchor);
        return;
    };
    let end = if keep { pos } else { pos + 1 };
    list.splice(pos..end, new);
}

/// Apply proposal-module patches to a proposal block.
///
/// Tabs are kept in step with the module list: removed names leave their tabs,
/// replaced names are swapped in place, and appended modules get a tab of their
/// own labelled `display_name` when the block uses tabs at all.
pub fn apply_proposal_patches(
    block: &mut ProposalBlock,
    set: &PatchSet<ProposalModule>,
    display_name: &str,
) {
    for patch in &set.patches {
        apply_patch(&mut block.proposal_modules, patch, set.textdomain.as_deref());

        let Some(tabs) = block.proposal_tabs.as_mut() else {
            continue;
        };
        match patch {
            Patch::Remove { names } => {
                for tab in tabs.iter_mut() {
                    tab.proposal_modules.retain(|m| !names.contains(m));
                }
            }
            Patch::Replace { old, new } => {
                let names: Vec<String> = new.iter().map(|m| m.name.clone()).collect();
                for tab in tabs.iter_mut() {
                    if let Some(pos) = tab.proposal_modules.iter().position(|m| m == old) {
                        tab.proposal_modules.splice(pos..=pos, names.iter().cloned());
                    }
                }
            }
            Patch::Insert { .. } => {
                log::warn!("Insert is not supported for proposal tabs of '{}'", block.name);
            }
            Patch::Append { new } => {
                tabs.push(TabSpec {
                    label: display_name.to_string(),
                    proposal_modules: new.iter().map(|m| m.name.clone()).collect(),
                });
            }
        }
    }
}
