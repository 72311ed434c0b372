//! Add-on control documents
//!
//! An add-on ships a control document that extends the base one instead of
//! replacing it. Besides new workflows and proposals it may carry an `update`
//! section that edits existing blocks:
//! ```json
//! {
//!   "display_name": "SDK",
//!   "textdomain": "sdk",
//!   "update": {
//!     "workflows": [
//!       { "stage": "initial", "mode": "installation",
//!         "insert_modules": [ { "before": "disks", "modules": [ { "name": "sdk_license" } ] } ],
//!         "append_modules": [ { "name": "sdk_setup" } ] }
//!     ],
//!     "proposals": [
//!       { "stage": "initial", "mode": "installation", "name": "initial",
//!         "append_modules": ["sdk_proposal"] }
//!     ],
//!     "inst_finish": { "chroot": ["sdk_finish"] }
//!   }
//! }
//! ```
//! The file bytes are fingerprinted so the same add-on is never merged twice.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::control::document::{
    BlockDefaults, ProposalBlock, ProposalModule, StepSpec, WorkflowBlock,
};
use crate::error::{Result, WorkflowError};
use crate::patch::{Patch, PatchSet};

/// Content hash and byte size of an add-on document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentFingerprint {
    /// Lowercase hex SHA-256 of the file content
    pub hash: String,
    pub size: u64,
}

impl ContentFingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            hash: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
        }
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}/{}", self.hash, self.size)
    }
}

/// `{ "replace": old, "modules": [...] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplaceEntry<T> {
    pub replace: String,
    #[serde(default = "Vec::new")]
    pub modules: Vec<T>,
}

/// `{ "before": anchor, "modules": [...] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertEntry {
    pub before: String,
    #[serde(default)]
    pub modules: Vec<StepSpec>,
}

/// Edits to the workflow of one stage/mode/arch scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub archs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<BlockDefaults>,
    #[serde(default)]
    pub remove_modules: Vec<String>,
    #[serde(default)]
    pub replace_modules: Vec<ReplaceEntry<StepSpec>>,
    #[serde(default)]
    pub insert_modules: Vec<InsertEntry>,
    #[serde(default)]
    pub append_modules: Vec<StepSpec>,
    /// Keys this engine does not understand
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl WorkflowUpdate {
    /// Patches in application order: remove, replace, insert, append
    pub fn patch_set(&self, textdomain: Option<String>) -> PatchSet<StepSpec> {
        for key in self.unknown.keys() {
            log::warn!(
                "Ignoring unknown workflow update '{}' for stage '{}', mode '{}'",
                key,
                self.stage,
                self.mode
            );
        }

        let mut set = PatchSet::new(textdomain);
        if !self.remove_modules.is_empty() {
            set.push(Patch::Remove {
                names: self.remove_modules.clone(),
            });
        }
        for entry in &self.replace_modules {
            set.push(Patch::Replace {
                old: entry.replace.clone(),
                new: entry.modules.clone(),
            });
        }
        for entry in &self.insert_modules {
            set.push(Patch::Insert {
                before: entry.before.clone(),
                new: entry.modules.clone(),
                keep: true,
            });
        }
        if !self.append_modules.is_empty() {
            set.push(Patch::Append {
                new: self.append_modules.clone(),
            });
        }
        set
    }
}

/// Edits to the proposal `name` of one stage/mode/arch scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalUpdate {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub archs: String,
    pub name: String,
    #[serde(default)]
    pub remove_modules: Vec<String>,
    #[serde(default)]
    pub replace_modules: Vec<ReplaceEntry<ProposalModule>>,
    #[serde(default)]
    pub append_modules: Vec<ProposalModule>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl ProposalUpdate {
    /// Patches in application order: remove, replace, append
    pub fn patch_set(&self, textdomain: Option<String>) -> PatchSet<ProposalModule> {
        for key in self.unknown.keys() {
            log::warn!(
                "Ignoring unknown proposal update '{}' for proposal '{}'",
                key,
                self.name
            );
        }

        let mut set = PatchSet::new(textdomain);
        if !self.remove_modules.is_empty() {
            set.push(Patch::Remove {
                names: self.remove_modules.clone(),
            });
        }
        for entry in &self.replace_modules {
            set.push(Patch::Replace {
                old: entry.replace.clone(),
                new: entry.modules.clone(),
            });
        }
        if !self.append_modules.is_empty() {
            set.push(Patch::Append {
                new: self.append_modules.clone(),
            });
        }
        set
    }
}

/// Finish steps contributed by an add-on, grouped by when they run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonFinishSteps {
    pub before_chroot: Vec<String>,
    pub chroot: Vec<String>,
    pub after_chroot: Vec<String>,
}

impl AddonFinishSteps {
    pub fn is_empty(&self) -> bool {
        self.before_chroot.is_empty() && self.chroot.is_empty() && self.after_chroot.is_empty()
    }

    pub fn extend(&mut self, other: &AddonFinishSteps) {
        self.before_chroot.extend(other.before_chroot.iter().cloned());
        self.chroot.extend(other.chroot.iter().cloned());
        self.after_chroot.extend(other.after_chroot.iter().cloned());
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct UpdateSection {
    workflows: Vec<WorkflowUpdate>,
    proposals: Vec<ProposalUpdate>,
    inst_finish: AddonFinishSteps,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AddonDocument {
    display_name: Option<String>,
    textdomain: Option<String>,
    workflows: Vec<WorkflowBlock>,
    proposals: Vec<ProposalBlock>,
    clone_modules: Vec<String>,
    globals: Map<String, Value>,
    software: Map<String, Value>,
    network: Map<String, Value>,
    partitioning: Map<String, Value>,
    requires_registration: bool,
    update: UpdateSection,
}

/// Everything the merger needs to know about one add-on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddonDescriptor {
    /// Where the add-on came from (repository URL, path)
    pub source_id: String,
    pub fingerprint: ContentFingerprint,
    pub display_name: String,
    pub textdomain: Option<String>,
    pub workflow_updates: Vec<WorkflowUpdate>,
    pub proposal_updates: Vec<ProposalUpdate>,
    /// Feature sections overriding the base ones key by key
    pub features: BTreeMap<String, Map<String, Value>>,
    pub new_workflows: Vec<WorkflowBlock>,
    pub new_proposals: Vec<ProposalBlock>,
    pub finish_steps: AddonFinishSteps,
    pub clone_modules: Vec<String>,
    pub requires_registration: bool,
}

impl AddonDescriptor {
    /// Parse an add-on document, fingerprinting its raw bytes
    pub fn from_bytes(source_id: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let source_id = source_id.into();
        let doc: AddonDocument = serde_json::from_slice(bytes)
            .map_err(|e| WorkflowError::addon(format!("{}: {}", source_id, e)))?;

        for key in doc.update.unknown.keys() {
            log::warn!("Add-on '{}': ignoring unknown update section '{}'", source_id, key);
        }

        let features = [
            ("globals", doc.globals),
            ("software", doc.software),
            ("network", doc.network),
            ("partitioning", doc.partitioning),
        ]
        .into_iter()
        .filter(|(_, section)| !section.is_empty())
        .map(|(name, section)| (name.to_string(), section))
        .collect();

        Ok(Self {
            display_name: doc.display_name.unwrap_or_else(|| source_id.clone()),
            fingerprint: ContentFingerprint::of_bytes(bytes),
            source_id,
            textdomain: doc.textdomain,
            workflow_updates: doc.update.workflows,
            proposal_updates: doc.update.proposals,
            features,
            new_workflows: doc.workflows,
            new_proposals: doc.proposals,
            finish_steps: doc.update.inst_finish,
            clone_modules: doc.clone_modules,
            requires_registration: doc.requires_registration,
        })
    }

    /// Read and parse an add-on document; the path doubles as source id
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            WorkflowError::addon(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(path.display().to_string(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ADDON: &str = r#"{
        "display_name": "SDK",
        "textdomain": "sdk",
        "requires_registration": true,
        "globals": { "enable_sdk": true },
        "update": {
            "workflows": [{
                "stage": "initial", "mode": "installation",
                "remove_modules": ["obsolete"],
                "replace_modules": [{ "replace": "disks", "modules": [{ "name": "sdk_disks" }] }],
                "insert_modules": [{ "before": "users", "modules": [{ "name": "sdk_license" }] }],
                "append_modules": [{ "name": "sdk_setup" }],
                "rename_modules": []
            }],
            "proposals": [{
                "stage": "initial", "mode": "installation", "name": "initial",
                "append_modules": ["sdk_proposal"]
            }],
            "inst_finish": { "chroot": ["sdk_finish"] }
        }
    }"#;

    #[test]
    fn test_parse_addon() {
        let addon = AddonDescriptor::from_bytes("dvd:///sdk", ADDON.as_bytes()).unwrap();
        assert_eq!(addon.display_name, "SDK");
        assert_eq!(addon.textdomain.as_deref(), Some("sdk"));
        assert!(addon.requires_registration);
        assert_eq!(addon.features["globals"]["enable_sdk"], Value::Bool(true));
        assert!(!addon.features.contains_key("software"));
        assert_eq!(addon.finish_steps.chroot, vec!["sdk_finish".to_string()]);
        assert_eq!(addon.proposal_updates[0].append_modules[0].name, "sdk_proposal");
        assert!(addon.workflow_updates[0].unknown.contains_key("rename_modules"));
    }

    #[test]
    fn test_patch_order() {
        let addon = AddonDescriptor::from_bytes("dvd:///sdk", ADDON.as_bytes()).unwrap();
        let set = addon.workflow_updates[0].patch_set(addon.textdomain.clone());
        assert_eq!(set.patches.len(), 4);
        assert!(matches!(set.patches[0], Patch::Remove { .. }));
        assert!(matches!(set.patches[1], Patch::Replace { .. }));
        assert!(matches!(set.patches[2], Patch::Insert { keep: true, .. }));
        assert!(matches!(set.patches[3], Patch::Append { .. }));
        assert_eq!(set.textdomain.as_deref(), Some("sdk"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ContentFingerprint::of_bytes(ADDON.as_bytes());
        let b = ContentFingerprint::of_bytes(ADDON.as_bytes());
        assert_eq!(a, b);
        assert_eq!(a.size, ADDON.len() as u64);
        assert_eq!(a.hash.len(), 64);

        let c = ContentFingerprint::of_bytes(b"{}");
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_known_value() {
        let fp = ContentFingerprint::of_bytes(b"");
        assert_eq!(
            fp.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fp.to_string(), format!("sha256:{}/0", fp.hash));
    }

    #[test]
    fn test_display_name_defaults_to_source() {
        let addon = AddonDescriptor::from_bytes("http://repo/addon", b"{}").unwrap();
        assert_eq!(addon.display_name, "http://repo/addon");
        assert!(addon.workflow_updates.is_empty());
    }

    #[test]
    fn test_invalid_addon_is_error() {
        let err = AddonDescriptor::from_bytes("broken", b"{ nope").unwrap_err();
        assert!(matches!(err, WorkflowError::Addon(_)));
    }

    #[test]
    fn test_from_file_uses_path_as_source() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(ADDON.as_bytes()).unwrap();
        file.flush().unwrap();
        let addon = AddonDescriptor::from_file(file.path()).unwrap();
        assert_eq!(addon.source_id, file.path().display().to_string());
        assert_eq!(addon.fingerprint, ContentFingerprint::of_bytes(ADDON.as_bytes()));
    }
}
