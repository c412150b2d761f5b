use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{PatchId, PatchStatus, ServerId},
    protocol::{Patch, Server},
};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

pub mod command;
pub mod config;
pub mod error;
mod fetch;
pub mod gateway;
mod lifecycle;
pub mod selection;
pub mod stats;
pub mod store;

pub use command::{CommandOutcome, InventoryCommand};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use error::CoreError;
pub use gateway::{HttpInventoryGateway, InventoryGateway, MissingInventoryGateway};
pub use selection::Selection;
pub use stats::{DashboardStats, SeverityCounts, StatusCounts};
pub use store::{CollectionKey, CollectionState, EntityStore, LoadStatus};

use fetch::InflightFetch;
use lifecycle::PatchLifecycle;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notifications for presentation layers that prefer push over polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryEvent {
    ServersUpdated,
    PatchesUpdated {
        server_id: ServerId,
    },
    CollectionFailed {
        key: CollectionKey,
        message: String,
    },
    PatchStatusChanged {
        patch_id: PatchId,
        server_id: ServerId,
        status: PatchStatus,
    },
    SelectionChanged(Selection),
    Reset,
}

/// Consistent read of everything a dashboard view needs, taken under one lock.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub servers: Vec<Server>,
    pub patches: Vec<Patch>,
    pub servers_state: CollectionState,
    pub selection: Selection,
    pub stats: DashboardStats,
}

#[async_trait]
pub trait InventoryHandle: Send + Sync {
    async fn request_servers(&self) -> Result<Vec<Server>, CoreError>;
    async fn request_patches(&self, server_id: ServerId) -> Result<Vec<Patch>, CoreError>;
    async fn select_server(&self, server_id: ServerId) -> Result<Selection, CoreError>;
    async fn select_patch(&self, patch_id: PatchId) -> Result<Selection, CoreError>;
    async fn apply_patch(&self, patch_id: PatchId) -> Result<Patch, CoreError>;
    async fn dispatch(&self, command: InventoryCommand) -> Result<CommandOutcome, CoreError>;
    async fn servers(&self) -> Vec<Server>;
    async fn patches_for(&self, server_id: ServerId) -> Vec<Patch>;
    async fn selection(&self) -> Selection;
    async fn stats(&self) -> DashboardStats;
    fn subscribe_events(&self) -> broadcast::Receiver<InventoryEvent>;
}

/// The inventory engine: owns the entity store and is the only writer to it.
pub struct InventoryClient {
    gateway: Arc<dyn InventoryGateway>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<InventoryEvent>,
}

#[derive(Default)]
struct EngineState {
    store: EntityStore,
    selection: Selection,
    lifecycle: PatchLifecycle,
    servers_fetch: Option<InflightFetch<Server>>,
    patch_fetches: HashMap<ServerId, InflightFetch<Patch>>,
}

impl InventoryClient {
    pub fn new(gateway: Arc<dyn InventoryGateway>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            gateway,
            inner: Mutex::new(EngineState::default()),
            events,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Arc<Self>> {
        let gateway = HttpInventoryGateway::from_settings(settings)?;
        Ok(Self::new(Arc::new(gateway)))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<InventoryEvent> {
        self.events.subscribe()
    }

    pub async fn servers(&self) -> Vec<Server> {
        let guard = self.inner.lock().await;
        guard.store.servers().cloned().collect()
    }

    pub async fn server(&self, server_id: ServerId) -> Option<Server> {
        let guard = self.inner.lock().await;
        guard.store.server(server_id).cloned()
    }

    pub async fn patches_for(&self, server_id: ServerId) -> Vec<Patch> {
        let guard = self.inner.lock().await;
        guard.store.patches_for(server_id).cloned().collect()
    }

    pub async fn patch(&self, patch_id: PatchId) -> Option<Patch> {
        let guard = self.inner.lock().await;
        guard.store.patch(patch_id).cloned()
    }

    pub async fn collection(&self, key: CollectionKey) -> CollectionState {
        let guard = self.inner.lock().await;
        guard.store.collection(key)
    }

    pub async fn selection(&self) -> Selection {
        self.inner.lock().await.selection
    }

    pub async fn selected_server(&self) -> Option<Server> {
        let guard = self.inner.lock().await;
        guard
            .selection
            .server_id
            .and_then(|server_id| guard.store.server(server_id).cloned())
    }

    pub async fn selected_patch(&self) -> Option<Patch> {
        let guard = self.inner.lock().await;
        guard
            .selection
            .patch_id
            .and_then(|patch_id| guard.store.patch(patch_id).cloned())
    }

    pub async fn stats(&self) -> DashboardStats {
        let guard = self.inner.lock().await;
        DashboardStats::compute(&guard.store)
    }

    pub async fn server_stats(&self, server_id: ServerId) -> DashboardStats {
        let guard = self.inner.lock().await;
        DashboardStats::for_server(&guard.store, server_id)
    }

    pub async fn snapshot(&self) -> InventorySnapshot {
        let guard = self.inner.lock().await;
        InventorySnapshot {
            servers: guard.store.servers().cloned().collect(),
            patches: guard.store.all_patches().cloned().collect(),
            servers_state: guard.store.collection(CollectionKey::Servers),
            selection: guard.selection,
            stats: DashboardStats::compute(&guard.store),
        }
    }

    pub async fn select_server(&self, server_id: ServerId) -> Result<Selection, CoreError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let before = state.selection;
        state.selection.select_server(&state.store, server_id)?;
        if state.selection != before {
            info!(server_id = server_id.0, "selection: server selected");
            self.emit(InventoryEvent::SelectionChanged(state.selection));
        }
        Ok(state.selection)
    }

    pub async fn select_patch(&self, patch_id: PatchId) -> Result<Selection, CoreError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let before = state.selection;
        state.selection.select_patch(&state.store, patch_id)?;
        if state.selection != before {
            info!(patch_id = patch_id.0, "selection: patch selected");
            self.emit(InventoryEvent::SelectionChanged(state.selection));
        }
        Ok(state.selection)
    }

    pub async fn clear_selection(&self) -> Selection {
        let mut guard = self.inner.lock().await;
        if guard.selection.clear() {
            self.emit(InventoryEvent::SelectionChanged(guard.selection));
        }
        guard.selection
    }

    /// Forgets all inventory, selection and in-flight bookkeeping. Gateway
    /// calls already in flight still finish, but their results are discarded.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        state.store.clear();
        state.selection.clear();
        state.lifecycle.clear();
        state.servers_fetch = None;
        state.patch_fetches.clear();
        info!("inventory: state reset");
        self.emit(InventoryEvent::Reset);
    }

    fn emit(&self, event: InventoryEvent) {
        let _ = self.events.send(event);
    }

    /// Runs after every store mutation so selection never points at data the
    /// store no longer holds.
    fn reconcile_selection(&self, state: &mut EngineState) {
        if state.selection.reconcile(&state.store) {
            self.emit(InventoryEvent::SelectionChanged(state.selection));
        }
    }
}

#[async_trait]
impl InventoryHandle for Arc<InventoryClient> {
    async fn request_servers(&self) -> Result<Vec<Server>, CoreError> {
        InventoryClient::request_servers(self).await
    }

    async fn request_patches(&self, server_id: ServerId) -> Result<Vec<Patch>, CoreError> {
        InventoryClient::request_patches(self, server_id).await
    }

    async fn select_server(&self, server_id: ServerId) -> Result<Selection, CoreError> {
        InventoryClient::select_server(self, server_id).await
    }

    async fn select_patch(&self, patch_id: PatchId) -> Result<Selection, CoreError> {
        InventoryClient::select_patch(self, patch_id).await
    }

    async fn apply_patch(&self, patch_id: PatchId) -> Result<Patch, CoreError> {
        InventoryClient::apply_patch(self, patch_id).await
    }

    async fn dispatch(&self, command: InventoryCommand) -> Result<CommandOutcome, CoreError> {
        InventoryClient::dispatch(self, command).await
    }

    async fn servers(&self) -> Vec<Server> {
        InventoryClient::servers(self).await
    }

    async fn patches_for(&self, server_id: ServerId) -> Vec<Patch> {
        InventoryClient::patches_for(self, server_id).await
    }

    async fn selection(&self) -> Selection {
        InventoryClient::selection(self).await
    }

    async fn stats(&self) -> DashboardStats {
        InventoryClient::stats(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<InventoryEvent> {
        InventoryClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
