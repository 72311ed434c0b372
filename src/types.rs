//! Closed vocabularies shared by the executor and the CLI
//!
//! Outcome symbols returned by dispatched steps are modelled as an enum instead
//! of free-form strings. `Accept` and `Ok` are aliases of `Next` and are folded
//! into it by [`Outcome::normalize`] at the dispatch boundary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Result symbol a dispatched step hands back to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Next,
    Back,
    Cancel,
    Abort,
    Finish,
    Again,
    Auto,
    Restart,
    RestartSameStep,
    Reboot,
    RebootSameStep,
    Accept,
    Ok,
}

impl Outcome {
    /// Fold the `Next` aliases into `Next`
    pub const fn normalize(self) -> Self {
        match self {
            Self::Accept | Self::Ok => Self::Next,
            other => other,
        }
    }

    /// Returns true if this outcome ends the run
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancel
                | Self::Abort
                | Self::Finish
                | Self::Restart
                | Self::RestartSameStep
                | Self::Reboot
                | Self::RebootSameStep
        )
    }

    /// Returns true if the caller is expected to restart or reboot
    pub const fn requests_restart(self) -> bool {
        matches!(
            self,
            Self::Restart | Self::RestartSameStep | Self::Reboot | Self::RebootSameStep
        )
    }
}

/// Choice offered to the user when a step returns no outcome at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum FailureDecision {
    Next,
    Back,
    Again,
    GiveUp,
}

/// Architecture token for the running machine, in control-document spelling.
pub fn current_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        "powerpc" => "ppc",
        "powerpc64" => "ppc64",
        "s390x" => "s390_64",
        other => other,
    }
}

/// Returns true if `arch` passes a comma-separated architecture filter.
///
/// An empty filter and the `all` token match every architecture.
pub fn arch_matches(filter: &str, arch: &str) -> bool {
    let filter = filter.trim();
    if filter.is_empty() {
        return true;
    }
    filter
        .split(',')
        .map(str::trim)
        .any(|token| token == "all" || token == arch)
}
