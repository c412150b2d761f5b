use shared::domain::{PatchId, PatchStatus};
use thiserror::Error;

/// Conditions reported back to callers of the engine's command entry points.
///
/// Only `NetworkFailure` ever involves the gateway; the other variants are
/// decided synchronously against the current store contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("inventory gateway failure: {0}")]
    NetworkFailure(String),
    #[error("patch {patch_id} cannot be applied while {status}")]
    InvalidTransition {
        patch_id: PatchId,
        status: PatchStatus,
    },
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("patch {0} is not present in the inventory")]
    UnknownPatch(PatchId),
}

impl CoreError {
    pub(crate) fn network(err: &anyhow::Error) -> Self {
        Self::NetworkFailure(format!("{err:#}"))
    }

    pub fn is_network_failure(&self) -> bool {
        matches!(self, CoreError::NetworkFailure(_))
    }
}
