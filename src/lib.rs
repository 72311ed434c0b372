//! installflow library
//!
//! Installation workflow engine: control documents declare which steps run in
//! which stage, mode and architecture; add-ons patch those declarations; the
//! executor walks the selected step list and persists where it is.
//!
//! ```text
//! control doc ──> Catalog (expanded) ──┐
//! add-on docs ──> AddonDescriptor ─────┴─> MergeSession ──> effective Catalog
//!                                                              │
//!            ModuleEnablement ──> StepExecutor <── RunContext ─┘
//!                                   │      │
//!                          StepInvoker    RecoveryStore
//! ```

pub mod catalog;
pub mod cli;
pub mod config_file;
pub mod control;
pub mod enablement;
pub mod error;
pub mod executor;
pub mod expand;
pub mod invoker;
pub mod merge;
pub mod patch;
pub mod recovery;
pub mod selector;
pub mod types;

// Re-export main types for convenience
pub use catalog::{Catalog, ModuleEntry, WorkflowView};
pub use config_file::EngineConfig;
pub use control::addon::{AddonDescriptor, ContentFingerprint};
pub use control::document::{ControlDocument, ProposalBlock, ProposalModule, StepSpec, WorkflowBlock};
pub use enablement::ModuleEnablement;
pub use error::{Result, WorkflowError};
pub use executor::{ExecutionState, RunContext, StepArguments, StepExecutor, StepInvoker};
pub use merge::{MergeOutcome, MergeSession, merge_all};
pub use patch::{Patch, PatchSet};
pub use recovery::{FileRecoveryStore, MemoryRecoveryStore, RecoveryStore};
pub use selector::Query;
pub use types::{FailureDecision, Outcome};
