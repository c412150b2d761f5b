//! Deduplicated inventory fetches.
//!
//! Each collection key has at most one gateway call in flight. The call runs
//! on its own task and its outcome is shared with every caller that asked
//! while it was outstanding. Completions carry the generation they were
//! issued under and are discarded once the key has moved on.

use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use shared::{
    domain::ServerId,
    protocol::{Patch, Server},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{error::CoreError, store::CollectionKey, EngineState, InventoryClient, InventoryEvent};

type FetchOutcome<T> = Result<Vec<T>, CoreError>;

pub(crate) struct InflightFetch<T> {
    generation: u64,
    outcome: Shared<BoxFuture<'static, FetchOutcome<T>>>,
}

impl<T> InflightFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn spawn(
        generation: u64,
        task: impl Future<Output = FetchOutcome<T>> + Send + 'static,
    ) -> Self {
        let outcome = tokio::spawn(task)
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    Err(CoreError::NetworkFailure(format!(
                        "fetch task ended unexpectedly: {err}"
                    )))
                })
            })
            .boxed()
            .shared();
        Self {
            generation,
            outcome,
        }
    }

    fn outcome(&self) -> Shared<BoxFuture<'static, FetchOutcome<T>>> {
        self.outcome.clone()
    }
}

impl EngineState {
    fn clear_inflight(&mut self, key: CollectionKey) {
        match key {
            CollectionKey::Servers => self.servers_fetch = None,
            CollectionKey::Patches(server_id) => {
                self.patch_fetches.remove(&server_id);
            }
        }
    }
}

impl InventoryClient {
    /// Fetches the server list, joining an outstanding fetch if there is one.
    pub async fn request_servers(self: &Arc<Self>) -> FetchOutcome<Server> {
        let outcome = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            match &state.servers_fetch {
                Some(inflight) => {
                    debug!(
                        generation = inflight.generation,
                        "inventory: joining in-flight servers fetch"
                    );
                    inflight.outcome()
                }
                None => {
                    let generation = state.store.mark_loading(CollectionKey::Servers);
                    info!(generation, "inventory: servers fetch started");
                    let client = Arc::clone(self);
                    let inflight = InflightFetch::spawn(generation, async move {
                        client.run_servers_fetch(generation).await
                    });
                    let outcome = inflight.outcome();
                    state.servers_fetch = Some(inflight);
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Fetches one server's patches. Keys are per server, so different
    /// servers load and fail independently.
    pub async fn request_patches(self: &Arc<Self>, server_id: ServerId) -> FetchOutcome<Patch> {
        let outcome = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            match state.patch_fetches.get(&server_id) {
                Some(inflight) => {
                    debug!(
                        server_id = server_id.0,
                        generation = inflight.generation,
                        "inventory: joining in-flight patches fetch"
                    );
                    inflight.outcome()
                }
                None => {
                    let generation = state
                        .store
                        .mark_loading(CollectionKey::Patches(server_id));
                    info!(
                        server_id = server_id.0,
                        generation, "inventory: patches fetch started"
                    );
                    let client = Arc::clone(self);
                    let inflight = InflightFetch::spawn(generation, async move {
                        client.run_patches_fetch(server_id, generation).await
                    });
                    let outcome = inflight.outcome();
                    state.patch_fetches.insert(server_id, inflight);
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Refreshes the server list, then every listed server's patches
    /// concurrently. All patch fetches run even if some fail; the first
    /// failure is returned.
    pub async fn refresh_all(self: &Arc<Self>) -> Result<(), CoreError> {
        self.request_servers().await?;
        let server_ids: Vec<ServerId> = {
            let guard = self.inner.lock().await;
            guard.store.servers().map(|server| server.id).collect()
        };
        let results = join_all(
            server_ids
                .into_iter()
                .map(|server_id| self.request_patches(server_id)),
        )
        .await;
        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Calls [`refresh_all`](Self::refresh_all) every `interval` until the
    /// client is dropped or the handle is aborted.
    pub fn spawn_periodic_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    debug!("inventory: client dropped; stopping periodic refresh");
                    break;
                };
                if let Err(err) = client.refresh_all().await {
                    warn!(error = %err, "inventory: periodic refresh failed");
                }
            }
        })
    }

    async fn run_servers_fetch(&self, generation: u64) -> FetchOutcome<Server> {
        let result = self.gateway.list_servers().await;
        let mut guard = self.inner.lock().await;
        self.finish_fetch(
            &mut guard,
            CollectionKey::Servers,
            generation,
            result,
            |client, state, servers| {
                info!(count = servers.len(), "inventory: servers fetch completed");
                state.store.replace_servers(servers);
                client.emit(InventoryEvent::ServersUpdated);
            },
        )
    }

    async fn run_patches_fetch(&self, server_id: ServerId, generation: u64) -> FetchOutcome<Patch> {
        let result = self.gateway.list_patches(server_id).await;
        let mut guard = self.inner.lock().await;
        self.finish_fetch(
            &mut guard,
            CollectionKey::Patches(server_id),
            generation,
            result,
            |client, state, patches| {
                info!(
                    server_id = server_id.0,
                    count = patches.len(),
                    "inventory: patches fetch completed"
                );
                state.store.replace_patches(server_id, patches);
                state
                    .lifecycle
                    .reassert_after_fetch(&mut state.store, server_id, generation);
                client.emit(InventoryEvent::PatchesUpdated { server_id });
            },
        )
    }

    fn finish_fetch<T: Clone>(
        &self,
        state: &mut EngineState,
        key: CollectionKey,
        generation: u64,
        result: anyhow::Result<Vec<T>>,
        apply: impl FnOnce(&Self, &mut EngineState, Vec<T>),
    ) -> FetchOutcome<T> {
        let current = state.store.generation(key);
        if current != generation {
            debug!(
                %key,
                generation,
                current, "inventory: discarding stale fetch result"
            );
            return result.map_err(|err| CoreError::network(&err));
        }
        state.clear_inflight(key);

        match result {
            Ok(records) => {
                apply(self, state, records.clone());
                self.reconcile_selection(state);
                Ok(records)
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(%key, error = %message, "inventory: fetch failed; keeping previous data");
                state.store.mark_error(key, message.clone());
                self.emit(InventoryEvent::CollectionFailed {
                    key,
                    message: message.clone(),
                });
                self.reconcile_selection(state);
                Err(CoreError::NetworkFailure(message))
            }
        }
    }
}
