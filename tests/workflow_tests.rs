//! End-to-end tests: control document -> add-ons -> enablement -> executor
//!
//! Documents are written as JSON the way they appear on installation media.

use std::collections::{BTreeMap, VecDeque};

use installflow::{
    AddonDescriptor, Catalog, ControlDocument, FileRecoveryStore, MemoryRecoveryStore,
    MergeSession, ModuleEnablement, Outcome, Query, RecoveryStore, RunContext, StepArguments,
    StepExecutor, StepInvoker, merge_all,
};
use tempfile::TempDir;

const CONTROL: &str = r#"{
    "textdomain": "control",
    "workflows": [
        {
            "stage": "continue",
            "mode": "installation,update",
            "label": "Configuration",
            "modules": [
                { "heading": "System" },
                { "name": "a" },
                { "name": "b" },
                { "name": "c" }
            ]
        },
        {
            "stage": "initial,continue",
            "mode": "autoinstallation",
            "archs": "x86_64,aarch64",
            "modules": [ { "name": "auto_a" }, { "name": "auto_b" } ]
        }
    ],
    "proposals": [
        { "stage": "continue", "mode": "installation", "name": "network",
          "proposal_modules": ["lan", "firewall"] }
    ]
}"#;

fn base() -> Catalog {
    Catalog::from_document(ControlDocument::from_json(CONTROL).unwrap())
}

fn addon(source: &str, json: &str) -> AddonDescriptor {
    AddonDescriptor::from_bytes(source, json.as_bytes()).unwrap()
}

fn step_names(catalog: &Catalog, stage: &str, mode: &str) -> Vec<String> {
    catalog
        .workflow(&Query::new(stage, mode))
        .entries
        .iter()
        .filter(|e| !e.spec.is_heading())
        .map(|e| e.spec.name.clone())
        .collect()
}

/// Invoker replaying canned outcomes per client; unscripted steps return Next
#[derive(Default)]
struct Scripted {
    outcomes: BTreeMap<String, VecDeque<Outcome>>,
    calls: Vec<String>,
}

impl Scripted {
    fn with(mut self, client: &str, outcomes: &[Outcome]) -> Self {
        self.outcomes
            .insert(client.to_string(), outcomes.iter().copied().collect());
        self
    }
}

impl StepInvoker for Scripted {
    fn invoke(&mut self, client: &str, _arguments: &StepArguments) -> Option<Outcome> {
        self.calls.push(client.to_string());
        Some(
            self.outcomes
                .get_mut(client)
                .and_then(|q| q.pop_front())
                .unwrap_or(Outcome::Next),
        )
    }
}

fn context() -> RunContext {
    RunContext::new("continue", "installation").with_arch("x86_64")
}

// =============================================================================
// Expansion
// =============================================================================

#[test]
fn test_multi_valued_block_expands_to_product() {
    let doc = ControlDocument::from_json(
        r#"{ "workflows": [ { "stage": "initial,continue", "mode": "installation,update",
             "modules": [ { "name": "a" }, { "name": "b" } ] } ] }"#,
    )
    .unwrap();
    let catalog = Catalog::from_document(doc);
    assert_eq!(catalog.workflows().len(), 4);

    let first = &catalog.workflows()[0].modules;
    assert!(catalog.workflows().iter().all(|w| &w.modules == first));
    for (stage, mode) in [
        ("initial", "installation"),
        ("continue", "installation"),
        ("initial", "update"),
        ("continue", "update"),
    ] {
        assert_eq!(step_names(&catalog, stage, mode), vec!["a", "b"]);
    }
}

#[test]
fn test_arch_expanded_blocks_select_by_arch() {
    let catalog = base();
    let query = Query::new("initial", "autoinstallation").with_arch("aarch64");
    let view = catalog.workflow(&query);
    assert_eq!(view.entries.len(), 2);
    assert_eq!(view.defaults.archs, "aarch64");

    let query = Query::new("initial", "autoinstallation").with_arch("s390_64");
    assert!(catalog.workflow(&query).entries.is_empty());
}

// =============================================================================
// Add-on merging
// =============================================================================

#[test]
fn test_replace_splices_in_place() {
    let replace = addon(
        "replace",
        r#"{ "update": { "workflows": [ { "stage": "continue", "mode": "installation",
             "replace_modules": [ { "replace": "b", "modules": [ { "name": "x" }, { "name": "y" } ] } ] } ] } }"#,
    );
    let merged = merge_all(&base(), &[replace]);
    assert_eq!(
        step_names(&merged.catalog, "continue", "installation"),
        vec!["a", "x", "y", "c"]
    );
    // the other mode of the same declaration is untouched
    assert_eq!(step_names(&merged.catalog, "continue", "update"), vec!["a", "b", "c"]);
}

#[test]
fn test_insert_keeps_anchor() {
    let insert = addon(
        "insert",
        r#"{ "update": { "workflows": [ { "stage": "continue", "mode": "installation",
             "insert_modules": [ { "before": "b", "modules": [ { "name": "x" } ] } ] } ] } }"#,
    );
    let merged = merge_all(&base(), &[insert]);
    assert_eq!(
        step_names(&merged.catalog, "continue", "installation"),
        vec!["a", "x", "b", "c"]
    );
}

#[test]
fn test_merge_is_idempotent() {
    let json = r#"{ "display_name": "SDK", "textdomain": "sdk",
        "update": { "workflows": [ { "stage": "continue", "mode": "installation",
            "append_modules": [ { "name": "sdk_setup" } ] } ] } }"#;

    let mut session = MergeSession::new(base());
    session.register_addon(addon("dvd:///sdk", json));
    let once = session.effective().clone();

    session.rebuild();
    assert_eq!(session.effective(), &once);

    // same content from another medium is a duplicate
    session.register_addon(addon("http://mirror/sdk", json));
    assert_eq!(session.effective(), &once);
    assert_eq!(session.last_merge().duplicates, vec!["http://mirror/sdk".to_string()]);
    assert_eq!(
        step_names(session.effective(), "continue", "installation"),
        vec!["a", "b", "c", "sdk_setup"]
    );

    assert!(session.unregister_addon("dvd:///sdk"));
    // the copy from the mirror now applies on its own
    assert_eq!(session.effective(), &once);
    session.reset();
    assert_eq!(session.effective(), session.base());
}

#[test]
fn test_arch_specific_update_falls_back_to_agnostic_block() {
    let update = addon(
        "arch",
        r#"{ "update": { "workflows": [ { "stage": "continue", "mode": "installation",
             "archs": "x86_64", "append_modules": [ { "name": "x86_only" } ] } ] } }"#,
    );
    let merged = merge_all(&base(), &[update]);
    assert_eq!(
        step_names(&merged.catalog, "continue", "installation"),
        vec!["a", "b", "c", "x86_only"]
    );
}

#[test]
fn test_proposal_update_and_registration() {
    let sdk = addon(
        "sdk",
        r#"{ "display_name": "SDK", "requires_registration": true,
             "update": { "proposals": [ { "stage": "continue", "mode": "installation",
                 "name": "network", "remove_modules": ["firewall"],
                 "append_modules": ["sdk_proposal"] } ] } }"#,
    );
    let mut session = MergeSession::new(base());
    session.register_addon(sdk);

    let proposal = session
        .effective()
        .proposal(&Query::new("continue", "installation"), "network");
    let names: Vec<&str> = proposal.proposal_modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["lan", "sdk_proposal"]);
    assert!(session.requires_registration("sdk"));
    assert_eq!(session.registration_required().get("sdk").map(String::as_str), Some("SDK"));
}

// =============================================================================
// Enablement
// =============================================================================

#[test]
fn test_stable_id_survives_disabling_earlier_step() {
    let catalog = base();
    let mut enablement = ModuleEnablement::new();
    enablement.disable_module("a");

    let mut exec = StepExecutor::new(
        &catalog,
        &enablement,
        context(),
        Scripted::default(),
        MemoryRecoveryStore::new(),
    );
    assert_eq!(exec.resume_index("continue_2"), Some(1));
    assert_eq!(exec.resume_index("continue_1"), None);

    assert_eq!(exec.run(0, false).unwrap(), Outcome::Next);
    assert_eq!(exec.invoker().calls, vec!["b", "c"]);
    assert_eq!(exec.store().history(), ["continue_2", "continue_3"]);
}

#[test]
fn test_scope_disable_restores_exact_prior_state() {
    let catalog = base();
    let mut enablement = ModuleEnablement::new();
    enablement.disable_module("c");
    enablement.disable_sub_proposal("network", "firewall");
    let before = enablement.state();

    enablement.disable_all_in_scope(&catalog, &context().query());
    {
        let exec = StepExecutor::new(
            &catalog,
            &enablement,
            context(),
            Scripted::default(),
            MemoryRecoveryStore::new(),
        );
        assert!(exec.filtered().entries.iter().all(|e| e.spec.is_heading()));
    }
    assert!(!enablement.is_proposal_enabled("network"));

    assert!(enablement.enable_all_in_scope("continue", "installation"));
    assert_eq!(enablement.state(), before);
}

// =============================================================================
// Execution
// =============================================================================

#[test]
fn test_first_step_back_without_back_runs_again() {
    let catalog = base();
    let enablement = ModuleEnablement::new();
    let invoker = Scripted::default().with("a", &[Outcome::Back, Outcome::Next]);
    let mut exec = StepExecutor::new(&catalog, &enablement, context(), invoker, MemoryRecoveryStore::new());

    assert_eq!(exec.run(0, false).unwrap(), Outcome::Next);
    assert_eq!(exec.invoker().calls, vec!["a", "a", "b", "c"]);
}

#[test]
fn test_reboot_then_resume_from_file_marker() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("step");
    let catalog = base();
    let enablement = ModuleEnablement::new();

    let invoker = Scripted::default().with("b", &[Outcome::RebootSameStep]);
    let mut exec = StepExecutor::new(
        &catalog,
        &enablement,
        context(),
        invoker,
        FileRecoveryStore::new(&marker),
    );
    assert_eq!(exec.run(0, false).unwrap(), Outcome::RebootSameStep);
    assert_eq!(
        FileRecoveryStore::new(&marker).load().unwrap().as_deref(),
        Some("continue_2")
    );

    // after the reboot
    let mut exec = StepExecutor::new(
        &catalog,
        &enablement,
        context(),
        Scripted::default(),
        FileRecoveryStore::new(&marker),
    );
    let index = exec.pending_resume().unwrap().unwrap();
    assert_eq!(exec.run(index, false).unwrap(), Outcome::Next);
    assert_eq!(exec.invoker().calls, vec!["b", "c"]);
    assert!(!marker.exists());
}

#[test]
fn test_addon_steps_run_with_addon_textdomain() {
    let mut session = MergeSession::new(base());
    session.register_addon(addon(
        "sdk",
        r#"{ "textdomain": "sdk", "update": { "workflows": [ { "stage": "continue",
             "mode": "installation", "append_modules": [ { "name": "sdk_setup" } ] } ] } }"#,
    ));
    let enablement = ModuleEnablement::new();
    let mut exec = StepExecutor::new(
        session.effective(),
        &enablement,
        context(),
        Scripted::default(),
        MemoryRecoveryStore::new(),
    );
    let last = exec.filtered().entries.last().cloned().unwrap();
    assert_eq!(last.spec.textdomain.as_deref(), Some("sdk"));
    assert_eq!(last.stable_id.as_deref(), Some("continue_4"));

    assert_eq!(exec.run(0, true).unwrap(), Outcome::Next);
    assert_eq!(exec.invoker().calls, vec!["a", "b", "c", "sdk_setup"]);
    assert!(exec.state().ran_step_names.contains("sdk_setup"));
}
