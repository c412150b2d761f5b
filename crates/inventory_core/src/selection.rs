use shared::domain::{PatchId, ServerId};
use tracing::{debug, info};

use crate::{error::CoreError, store::EntityStore};

/// The server and patch the operator is focused on.
///
/// Invariant: a selected patch always belongs to the selected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub server_id: Option<ServerId>,
    pub patch_id: Option<PatchId>,
}

impl Selection {
    /// Focuses `server_id` and always drops patch focus.
    ///
    /// Once servers have loaded, ids missing from the inventory are rejected
    /// and the selection is left as it was. Before that any id is accepted,
    /// since patches may be listed for servers the store has not seen yet.
    pub fn select_server(
        &mut self,
        store: &EntityStore,
        server_id: ServerId,
    ) -> Result<(), CoreError> {
        if store.servers_loaded() && !store.contains_server(server_id) {
            return Err(CoreError::InvalidSelection(format!(
                "server {server_id} is not in the inventory"
            )));
        }
        self.server_id = Some(server_id);
        self.patch_id = None;
        Ok(())
    }

    pub fn select_patch(
        &mut self,
        store: &EntityStore,
        patch_id: PatchId,
    ) -> Result<(), CoreError> {
        let Some(server_id) = self.server_id else {
            return Err(CoreError::InvalidSelection(format!(
                "patch {patch_id} selected without a selected server"
            )));
        };
        let Some(patch) = store.patch(patch_id) else {
            return Err(CoreError::InvalidSelection(format!(
                "patch {patch_id} is not in the inventory"
            )));
        };
        if patch.server_id != server_id {
            return Err(CoreError::InvalidSelection(format!(
                "patch {patch_id} belongs to server {}, not selected server {server_id}",
                patch.server_id
            )));
        }
        self.patch_id = Some(patch_id);
        Ok(())
    }

    pub fn clear(&mut self) -> bool {
        let changed = self.server_id.is_some() || self.patch_id.is_some();
        *self = Self::default();
        changed
    }

    /// Re-validates the selection against the store after a mutation.
    /// Returns true when anything was cleared.
    pub fn reconcile(&mut self, store: &EntityStore) -> bool {
        let before = *self;

        if let Some(server_id) = self.server_id {
            if store.servers_loaded() && !store.contains_server(server_id) {
                info!(
                    server_id = server_id.0,
                    "selection: selected server left the inventory; clearing selection"
                );
                self.server_id = None;
                self.patch_id = None;
            }
        } else {
            self.patch_id = None;
        }

        if let Some(patch_id) = self.patch_id {
            let still_owned = store
                .patch(patch_id)
                .is_some_and(|patch| Some(patch.server_id) == self.server_id);
            if !still_owned {
                debug!(patch_id = patch_id.0, "selection: dropping stale patch focus");
                self.patch_id = None;
            }
        }

        *self != before
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
