//! Step executor
//!
//! Walks the effective, filtered module list of one (stage, mode) workflow and
//! hands every dispatchable step to a [`StepInvoker`]. The outcome the step
//! returns decides where the executor goes next.
//!
//! # Navigation
//!
//! ```text
//!            Next/Accept/Ok            Back
//!   [i-1] <───────────── [i] ─────────────> [i+1]
//!                         │
//!                         ├─ Again           -> dispatch [i] again
//!                         ├─ Auto            -> repeat the previous direction
//!                         └─ Cancel/Abort/Finish/Restart*/Reboot* -> stop
//! ```
//!
//! The first step dispatched by a run never leaves it backwards: a `Back` it
//! returns before the run has moved is turned into `Again`. A run started
//! without back navigation also keeps a lower bound that follows the steps
//! forward, passed-over entries included, and a `Back` returned at or below it
//! is turned into `Again` too. A step at or below the bound is offered no back
//! button unless the step or its workflow sets `enable_back` explicitly.
//!
//! Headings, steps for other architectures and steps that do not apply in
//! update mode are passed over in the current direction without being
//! dispatched.
//!
//! Before each dispatch the step's stable id is written to the recovery store
//! and removed again when the step returns a non-terminal outcome.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{Catalog, ModuleEntry};
use crate::control::document::BlockDefaults;
use crate::enablement::ModuleEnablement;
use crate::error::{Result, WorkflowError};
use crate::recovery::RecoveryStore;
use crate::selector::Query;
use crate::types::{FailureDecision, Outcome, arch_matches, current_arch};

/// Argument keys the executor fills in itself
pub const RESERVED_ARGUMENTS: [&str; 4] = ["enable_back", "enable_next", "proposal", "going_back"];

/// Stage in which progress is not persisted: the target system is not mounted yet
pub const FIRST_STAGE: &str = "initial";

/// Mode in which steps declared `update: false` are passed over
pub const UPDATE_MODE: &str = "update";

/// Arguments handed to a dispatched step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepArguments {
    pub enable_back: bool,
    pub enable_next: bool,
    pub proposal: Option<String>,
    /// The executor arrived here by going back
    pub going_back: bool,
    /// Step-declared arguments, ordered by key, reserved keys excluded
    pub extra: Vec<(String, Value)>,
}

impl StepArguments {
    /// Flatten into a single argument map
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.insert("enable_back".into(), Value::Bool(self.enable_back));
        map.insert("enable_next".into(), Value::Bool(self.enable_next));
        if let Some(proposal) = &self.proposal {
            map.insert("proposal".into(), Value::String(proposal.clone()));
        }
        if self.going_back {
            map.insert("going_back".into(), Value::Bool(true));
        }
        map
    }

    /// Look up an extra argument
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// The executor's only call-out: running one step
pub trait StepInvoker {
    /// Run `client`; `None` means the step crashed or returned nothing usable
    fn invoke(&mut self, client: &str, arguments: &StepArguments) -> Option<Outcome>;

    /// Ask what to do after `client` returned nothing
    fn on_step_failure(&mut self, client: &str) -> FailureDecision {
        log::error!("Step '{}' failed and no handler is installed, giving up", client);
        FailureDecision::GiveUp
    }

    /// Called after a step flagged `retranslate` has run
    fn retranslate(&mut self) {}
}

/// Where and how a workflow runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub stage: String,
    pub mode: String,
    pub arch: String,
    /// Write the recovery marker around each dispatch
    pub persist_progress: bool,
    /// Extra selection parameters, e.g. `add_on_mode`
    pub params: BTreeMap<String, String>,
}

impl RunContext {
    /// Context for the running machine; progress is persisted outside the first stage
    pub fn new(stage: impl Into<String>, mode: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            persist_progress: stage != FIRST_STAGE,
            stage,
            mode: mode.into(),
            arch: current_arch().to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist_progress = persist;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Selector query for this context
    pub fn query(&self) -> Query {
        let mut query = Query::new(self.stage.clone(), self.mode.clone()).with_arch(self.arch.clone());
        for (key, value) in &self.params {
            query = query.with_param(key.clone(), value.clone());
        }
        query
    }

    pub fn is_update(&self) -> bool {
        self.mode == UPDATE_MODE
    }
}

/// Book-keeping of one `run` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    /// Index into the filtered list; -1 after leaving it backwards
    pub current_index: isize,
    pub minimum_back_index: isize,
    /// Outcomes in dispatch order, after alias folding
    pub result_history: Vec<Outcome>,
    pub ran_step_names: BTreeSet<String>,
    /// Marker currently written to the recovery store
    pub persisted_step_id: Option<String>,
}

/// The module list a run walks, after enable/disable filtering
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilteredWorkflow {
    pub defaults: BlockDefaults,
    pub entries: Vec<ModuleEntry>,
}

/// Why an entry is passed over without dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Heading,
    Architecture,
    NotForUpdate,
}

fn skip_reason(entry: &ModuleEntry, defaults: &BlockDefaults, context: &RunContext) -> Option<SkipReason> {
    let spec = &entry.spec;
    if spec.is_heading() {
        return Some(SkipReason::Heading);
    }
    let filter = spec.archs.as_deref().unwrap_or(&defaults.archs);
    if !arch_matches(filter, &context.arch) {
        return Some(SkipReason::Architecture);
    }
    if context.is_update() && !spec.applicable_during_update {
        return Some(SkipReason::NotForUpdate);
    }
    None
}

/// Whether back navigation at this step was configured explicitly
fn back_overridden(entry: &ModuleEntry, defaults: &BlockDefaults) -> bool {
    entry.spec.enable_back.is_some() || defaults.enable_back.is_some()
}

fn build_arguments(
    entry: &ModuleEntry,
    defaults: &BlockDefaults,
    at_lower_bound: bool,
    going_back: bool,
) -> StepArguments {
    let spec = &entry.spec;
    let mut enable_back = spec.enable_back.or(defaults.enable_back).unwrap_or(true);
    if at_lower_bound && !back_overridden(entry, defaults) {
        enable_back = false;
    }

    let extra = spec
        .arguments
        .iter()
        .filter(|(key, _)| {
            let reserved = RESERVED_ARGUMENTS.contains(&key.as_str());
            if reserved {
                log::warn!(
                    "Step '{}' sets reserved argument '{}', ignoring it",
                    spec.client_name(),
                    key
                );
            }
            !reserved
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    StepArguments {
        enable_back,
        enable_next: spec.enable_next.or(defaults.enable_next).unwrap_or(true),
        proposal: spec.proposal.clone().filter(|p| !p.is_empty()),
        going_back,
        extra,
    }
}

/// Runs the workflow selected by a [`RunContext`]
pub struct StepExecutor<'a, I, S> {
    catalog: &'a Catalog,
    enablement: &'a ModuleEnablement,
    context: RunContext,
    invoker: I,
    store: S,
    state: ExecutionState,
}

impl<'a, I: StepInvoker, S: RecoveryStore> StepExecutor<'a, I, S> {
    pub fn new(
        catalog: &'a Catalog,
        enablement: &'a ModuleEnablement,
        context: RunContext,
        invoker: I,
        store: S,
    ) -> Self {
        Self {
            catalog,
            enablement,
            context,
            invoker,
            store,
            state: ExecutionState::default(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// State left behind by the last `run`
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (I, S) {
        (self.invoker, self.store)
    }

    /// The list `run` walks: selected workflow minus disabled entries
    pub fn filtered(&self) -> FilteredWorkflow {
        let view = self.catalog.workflow(&self.context.query());
        FilteredWorkflow {
            entries: self.enablement.filter_entries(&view.entries),
            defaults: view.defaults,
        }
    }

    /// Filtered index of the step with `stable_id`
    pub fn resume_index(&self, stable_id: &str) -> Option<usize> {
        self.filtered()
            .entries
            .iter()
            .position(|e| e.stable_id.as_deref() == Some(stable_id))
    }

    /// Index of the step the recovery marker points at, if it is still in the list
    pub fn pending_resume(&self) -> Result<Option<usize>> {
        let Some(id) = self.store.load()? else {
            return Ok(None);
        };
        let index = self.resume_index(&id);
        if index.is_none() {
            log::warn!("Recovery marker '{}' does not name a step of this workflow", id);
        }
        Ok(index)
    }

    /// Walk the workflow starting at `from_index`.
    ///
    /// With `allow_back` false the steps before `from_index`, and every step
    /// the run has moved past, cannot be reached by going back.
    pub fn run(&mut self, from_index: usize, allow_back: bool) -> Result<Outcome> {
        let workflow = self.filtered();
        let entries = &workflow.entries;
        let defaults = &workflow.defaults;
        let len = isize::try_from(entries.len())
            .map_err(|_| WorkflowError::execution("workflow too long"))?;
        let from = isize::try_from(from_index)
            .map_err(|_| WorkflowError::execution(format!("invalid start index {}", from_index)))?;

        log::info!(
            "Running workflow {}/{} ({} entries) from index {}, back {}",
            self.context.stage,
            self.context.mode,
            len,
            from,
            if allow_back { "allowed" } else { "disallowed" }
        );

        self.state = ExecutionState {
            current_index: from,
            minimum_back_index: if allow_back { 0 } else { from },
            ..Default::default()
        };
        self.state.minimum_back_index = self.state.minimum_back_index.min(from);

        // direction used to pass over entries that are not dispatched
        let mut moving_back = false;
        // set once the run has moved off the first dispatched step
        let mut left_start = false;
        let mut previous: Option<Outcome> = None;
        let mut terminal: Option<Outcome> = None;

        while (0..len).contains(&self.state.current_index) {
            let index = self.state.current_index;
            let entry = &entries[index as usize];

            if let Some(reason) = skip_reason(entry, defaults, &self.context) {
                log::debug!("Passing over entry {} ({:?})", index, reason);
                if moving_back {
                    self.state.current_index -= 1;
                } else {
                    if !allow_back && index <= self.state.minimum_back_index {
                        self.state.minimum_back_index += 1;
                    }
                    self.state.current_index += 1;
                }
                continue;
            }

            let at_lower_bound = index <= self.state.minimum_back_index;
            let going_back = previous == Some(Outcome::Back);
            let arguments = build_arguments(entry, defaults, at_lower_bound, going_back);
            let client = entry.spec.client_name();

            let persisted = match (&entry.stable_id, self.context.persist_progress) {
                (Some(id), true) => {
                    self.store.save(id)?;
                    self.state.persisted_step_id = Some(id.clone());
                    true
                }
                _ => false,
            };

            log::info!(
                "Dispatching '{}' ({})",
                client,
                entry.stable_id.as_deref().unwrap_or("-")
            );
            let returned = self.invoker.invoke(client, &arguments);
            self.state.ran_step_names.insert(client.to_string());
            if entry.spec.retranslate {
                self.invoker.retranslate();
            }

            let mut outcome = match returned {
                Some(outcome) => outcome.normalize(),
                None if entry.spec.optional => {
                    log::warn!("Optional step '{}' returned no result, continuing", client);
                    Outcome::Next
                }
                None => {
                    log::error!("Step '{}' returned no result", client);
                    match self.invoker.on_step_failure(client) {
                        FailureDecision::Next => Outcome::Next,
                        FailureDecision::Back => Outcome::Back,
                        FailureDecision::Again => Outcome::Again,
                        FailureDecision::GiveUp => Outcome::Abort,
                    }
                }
            };
            self.state.result_history.push(outcome);

            if outcome == Outcome::Auto {
                outcome = match previous {
                    Some(Outcome::Back) => Outcome::Back,
                    _ => Outcome::Next,
                };
            }
            if outcome == Outcome::Back && !left_start {
                log::info!("Step '{}' is the first of this run and cannot go back, running it again", client);
                outcome = Outcome::Again;
            } else if outcome == Outcome::Back && !allow_back && at_lower_bound {
                log::info!("Step '{}' cannot go back from here, running it again", client);
                outcome = Outcome::Again;
            }

            if persisted && !outcome.is_terminal() {
                self.store.clear()?;
                self.state.persisted_step_id = None;
            }

            match outcome {
                Outcome::Next => {
                    if !allow_back && index <= self.state.minimum_back_index {
                        self.state.minimum_back_index += 1;
                    }
                    self.state.current_index += 1;
                    moving_back = false;
                    left_start = true;
                }
                Outcome::Back => {
                    self.state.current_index -= 1;
                    moving_back = true;
                    left_start = true;
                }
                Outcome::Again => {}
                other => {
                    log::info!("Step '{}' ended the workflow with '{}'", client, other);
                    terminal = Some(other);
                    break;
                }
            }
            previous = Some(outcome);
        }

        let result = terminal.unwrap_or(if self.state.current_index < 0 {
            Outcome::Back
        } else {
            Outcome::Next
        });
        log::info!(
            "Workflow {}/{} finished with '{}' at index {}",
            self.context.stage,
            self.context.mode,
            result,
            self.state.current_index
        );
        Ok(result)
    }
}
