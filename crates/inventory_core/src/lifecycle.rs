//! Patch apply state machine.
//!
//! PENDING and FAILED may move to APPLYING; APPLYING resolves to APPLIED or
//! FAILED; APPLIED is terminal. Retries are operator-initiated only.

use std::collections::HashMap;

use shared::{
    domain::{PatchId, PatchStatus, ServerId},
    protocol::Patch,
};
use tracing::{debug, info, warn};

use crate::{error::CoreError, store::EntityStore, InventoryClient, InventoryEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ApplyTicket {
    pub patch_id: PatchId,
    pub server_id: ServerId,
    attempt: u64,
}

/// Outcome of an apply that a patch fetch issued earlier does not yet know
/// about.
#[derive(Debug, Clone)]
struct ResolvedApply {
    /// Latest fetch generation issued when the apply resolved.
    issued_before: u64,
    record: Patch,
}

#[derive(Debug, Default)]
pub(crate) struct PatchLifecycle {
    in_flight: HashMap<PatchId, ApplyTicket>,
    resolved: HashMap<PatchId, ResolvedApply>,
    next_attempt: u64,
}

impl PatchLifecycle {
    /// Validates the transition to APPLYING and records it in the store.
    pub fn begin(
        &mut self,
        store: &mut EntityStore,
        patch_id: PatchId,
    ) -> Result<ApplyTicket, CoreError> {
        let patch = store
            .patch(patch_id)
            .ok_or(CoreError::UnknownPatch(patch_id))?;
        if self.in_flight.contains_key(&patch_id) {
            return Err(CoreError::InvalidTransition {
                patch_id,
                status: PatchStatus::Applying,
            });
        }
        if !patch.status.can_apply() {
            return Err(CoreError::InvalidTransition {
                patch_id,
                status: patch.status,
            });
        }

        self.next_attempt += 1;
        let ticket = ApplyTicket {
            patch_id,
            server_id: patch.server_id,
            attempt: self.next_attempt,
        };
        self.in_flight.insert(patch_id, ticket);
        store.set_patch_status(patch_id, PatchStatus::Applying);
        Ok(ticket)
    }

    /// Releases `ticket`. Returns false when the ticket is no longer current,
    /// in which case its result must not touch the store.
    pub fn finish(&mut self, ticket: ApplyTicket) -> bool {
        match self.in_flight.get(&ticket.patch_id) {
            Some(current) if *current == ticket => {
                self.in_flight.remove(&ticket.patch_id);
                true
            }
            _ => false,
        }
    }

    /// Remembers the stored record of a resolved apply so that a patch fetch
    /// issued before the resolution cannot roll it back.
    pub fn record_resolved(&mut self, store: &EntityStore, patch_id: PatchId) {
        if let Some(record) = store.patch(patch_id) {
            self.resolved.insert(
                patch_id,
                ResolvedApply {
                    issued_before: store.latest_generation(),
                    record: record.clone(),
                },
            );
        }
    }

    /// A re-fetch replaces records verbatim. Patches with an apply in flight
    /// keep showing APPLYING, and applies that resolved after the fetch was
    /// issued keep their resolved record.
    pub fn reassert_after_fetch(
        &mut self,
        store: &mut EntityStore,
        server_id: ServerId,
        generation: u64,
    ) {
        for patch_id in self.in_flight.keys() {
            store.set_patch_status(*patch_id, PatchStatus::Applying);
        }
        self.resolved.retain(|patch_id, resolved| {
            if resolved.record.server_id != server_id {
                return true;
            }
            if generation <= resolved.issued_before
                && !self.in_flight.contains_key(patch_id)
                && store.replace_patch(resolved.record.clone())
            {
                debug!(
                    patch_id = patch_id.0,
                    generation, "lifecycle: keeping apply result over older fetch"
                );
            }
            false
        });
    }

    pub fn is_applying(&self, patch_id: PatchId) -> bool {
        self.in_flight.contains_key(&patch_id)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.resolved.clear();
    }
}

/// Interprets the gateway's answer: the record to store, if any, and what the
/// caller sees.
fn resolve_apply(
    ticket: ApplyTicket,
    response: anyhow::Result<Patch>,
) -> (Option<Patch>, Result<Patch, CoreError>) {
    match response {
        Ok(patch) if patch.id != ticket.patch_id => {
            let err = CoreError::NetworkFailure(format!(
                "authority answered apply of patch {} with patch {}",
                ticket.patch_id, patch.id
            ));
            (None, Err(err))
        }
        Ok(patch) if patch.status == PatchStatus::Failed => {
            let err = CoreError::NetworkFailure(format!(
                "patch {} was rejected by the inventory authority",
                ticket.patch_id
            ));
            (Some(patch), Err(err))
        }
        Ok(mut patch) => {
            patch.status = PatchStatus::Applied;
            (Some(patch.clone()), Ok(patch))
        }
        Err(err) => (None, Err(CoreError::network(&err))),
    }
}

impl InventoryClient {
    /// Starts an apply for `patch_id` and waits for the authority's answer.
    ///
    /// Rejections (`UnknownPatch`, `InvalidTransition`) are returned before any
    /// gateway call is made.
    pub async fn apply_patch(&self, patch_id: PatchId) -> Result<Patch, CoreError> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let ticket = state.lifecycle.begin(&mut state.store, patch_id)?;
            info!(
                patch_id = patch_id.0,
                server_id = ticket.server_id.0,
                attempt = ticket.attempt,
                "lifecycle: apply started"
            );
            self.emit(InventoryEvent::PatchStatusChanged {
                patch_id,
                server_id: ticket.server_id,
                status: PatchStatus::Applying,
            });
            self.reconcile_selection(state);
            ticket
        };

        let response = self
            .gateway
            .apply_patch(ticket.server_id, ticket.patch_id)
            .await;
        let (record, result) = resolve_apply(ticket, response);

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if !state.lifecycle.finish(ticket) {
            debug!(
                patch_id = patch_id.0,
                attempt = ticket.attempt,
                "lifecycle: discarding result of superseded apply"
            );
            return result;
        }

        match record {
            Some(record) => {
                state.store.replace_patch(record);
            }
            None => {
                state.store.set_patch_status(patch_id, PatchStatus::Failed);
            }
        }
        state.lifecycle.record_resolved(&state.store, patch_id);

        match &result {
            Ok(_) => info!(patch_id = patch_id.0, "lifecycle: patch applied"),
            Err(err) => warn!(patch_id = patch_id.0, error = %err, "lifecycle: apply failed"),
        }

        if let Some(stored) = state.store.patch(patch_id) {
            self.emit(InventoryEvent::PatchStatusChanged {
                patch_id,
                server_id: stored.server_id,
                status: stored.status,
            });
        }
        self.reconcile_selection(state);
        result
    }

    pub async fn is_applying(&self, patch_id: PatchId) -> bool {
        self.inner.lock().await.lifecycle.is_applying(patch_id)
    }
}
