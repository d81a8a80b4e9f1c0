//! Phases and combined-phase aggregation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of installations, executions and deploy items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Init,
    /// Waiting for imports or dependencies
    Pending,
    Progressing,
    /// Terminal success (an installation in this phase is "completed")
    Succeeded,
    Failed,
    Deleting,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    pub fn is_succeeded(self) -> bool {
        self == Phase::Succeeded
    }

    pub fn is_failed(self) -> bool {
        self == Phase::Failed
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "Init",
            Phase::Pending => "Pending",
            Phase::Progressing => "Progressing",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// Aggregate the phases of a set of objects.
///
/// Any failure makes the set Failed, all successes make it Succeeded and
/// anything else is Progressing. An empty set has no combined phase.
pub fn combined_phase<I>(phases: I) -> Option<Phase>
where
    I: IntoIterator<Item = Phase>,
{
    let mut seen = false;
    let mut all_succeeded = true;
    for phase in phases {
        seen = true;
        if phase == Phase::Failed {
            return Some(Phase::Failed);
        }
        if phase != Phase::Succeeded {
            all_succeeded = false;
        }
    }
    if !seen {
        None
    } else if all_succeeded {
        Some(Phase::Succeeded)
    } else {
        Some(Phase::Progressing)
    }
}
