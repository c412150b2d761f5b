//! Normalized in-memory collections of servers and patches.
//!
//! The store never fails: unknown ids are ignored so that late gateway
//! responses can be applied without pre-checks. Callers hold the engine lock
//! for the whole of a mutation, which is what keeps replacements atomic for
//! readers.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{PatchId, PatchStatus, ServerId},
    protocol::{Patch, Server},
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Servers,
    Patches(ServerId),
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Servers => f.write_str("servers"),
            CollectionKey::Patches(server_id) => write!(f, "patches[{server_id}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionState {
    pub status: LoadStatus,
    pub last_error: Option<String>,
    /// Generation of the most recent request issued for this key.
    pub generation: u64,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl CollectionState {
    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }

    /// True once any fetch for this key has succeeded; data may be stale if
    /// a later refresh failed.
    pub fn has_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }
}

#[derive(Debug, Default)]
pub struct EntityStore {
    servers: BTreeMap<ServerId, Server>,
    patches: BTreeMap<PatchId, Patch>,
    servers_state: CollectionState,
    patch_states: HashMap<ServerId, CollectionState>,
    next_generation: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_servers(&mut self, servers: Vec<Server>) {
        self.servers = servers
            .into_iter()
            .map(|server| (server.id, server))
            .collect();
        Self::mark_ready(&mut self.servers_state);
    }

    /// Replaces the patches owned by `server_id`; other servers' patches are
    /// left untouched.
    pub fn replace_patches(&mut self, server_id: ServerId, patches: Vec<Patch>) {
        self.patches.retain(|_, patch| patch.server_id != server_id);
        for patch in patches {
            if patch.server_id != server_id {
                warn!(
                    server_id = server_id.0,
                    patch_id = patch.id.0,
                    owner = patch.server_id.0,
                    "inventory: dropping patch listed under a different server"
                );
                continue;
            }
            self.patches.insert(patch.id, patch);
        }
        Self::mark_ready(self.patch_states.entry(server_id).or_default());
    }

    /// Swaps in an authoritative record for a patch that is still present.
    /// Returns false when the patch is unknown, e.g. dropped by a re-fetch.
    pub fn replace_patch(&mut self, patch: Patch) -> bool {
        match self.patches.get_mut(&patch.id) {
            Some(existing) => {
                *existing = patch;
                true
            }
            None => false,
        }
    }

    /// Returns true when the stored status actually changed.
    pub fn set_patch_status(&mut self, patch_id: PatchId, status: PatchStatus) -> bool {
        match self.patches.get_mut(&patch_id) {
            Some(patch) if patch.status != status => {
                patch.status = status;
                true
            }
            _ => false,
        }
    }

    /// Marks `key` as loading and returns the generation of the new request.
    pub fn mark_loading(&mut self, key: CollectionKey) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let state = self.state_mut(key);
        state.status = LoadStatus::Loading;
        state.last_error = None;
        state.generation = generation;
        generation
    }

    /// Records a failed fetch; previously loaded data stays in place.
    pub fn mark_error(&mut self, key: CollectionKey, message: impl Into<String>) {
        let state = self.state_mut(key);
        state.status = LoadStatus::Error;
        state.last_error = Some(message.into());
    }

    /// Drops every record and collection status. Generations keep counting
    /// upward so requests issued before the clear stay recognisably stale.
    pub fn clear(&mut self) {
        self.servers.clear();
        self.patches.clear();
        self.servers_state = CollectionState::default();
        self.patch_states.clear();
    }

    /// Generation of the most recently issued request, across all keys.
    pub fn latest_generation(&self) -> u64 {
        self.next_generation
    }

    pub fn collection(&self, key: CollectionKey) -> CollectionState {
        match key {
            CollectionKey::Servers => self.servers_state.clone(),
            CollectionKey::Patches(server_id) => self
                .patch_states
                .get(&server_id)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn generation(&self, key: CollectionKey) -> u64 {
        match key {
            CollectionKey::Servers => self.servers_state.generation,
            CollectionKey::Patches(server_id) => self
                .patch_states
                .get(&server_id)
                .map(|state| state.generation)
                .unwrap_or_default(),
        }
    }

    pub fn servers_loaded(&self) -> bool {
        self.servers_state.has_loaded()
    }

    pub fn patches_loaded(&self, server_id: ServerId) -> bool {
        self.patch_states
            .get(&server_id)
            .is_some_and(CollectionState::has_loaded)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    pub fn server(&self, server_id: ServerId) -> Option<&Server> {
        self.servers.get(&server_id)
    }

    pub fn contains_server(&self, server_id: ServerId) -> bool {
        self.servers.contains_key(&server_id)
    }

    pub fn all_patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn patches_for(&self, server_id: ServerId) -> impl Iterator<Item = &Patch> {
        self.patches
            .values()
            .filter(move |patch| patch.server_id == server_id)
    }

    pub fn patch(&self, patch_id: PatchId) -> Option<&Patch> {
        self.patches.get(&patch_id)
    }

    fn state_mut(&mut self, key: CollectionKey) -> &mut CollectionState {
        match key {
            CollectionKey::Servers => &mut self.servers_state,
            CollectionKey::Patches(server_id) => self.patch_states.entry(server_id).or_default(),
        }
    }

    fn mark_ready(state: &mut CollectionState) {
        state.status = LoadStatus::Ready;
        state.last_error = None;
        state.loaded_at = Some(Utc::now());
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
