//! Fixtures and a scripted gateway shared by the unit tests.

use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{
    domain::{PatchId, PatchStatus, ServerId, ServerStatus, Severity},
    protocol::{Patch, Server},
};
use tokio::sync::{oneshot, Mutex};

use crate::gateway::InventoryGateway;

pub(crate) fn server(id: i64, status: ServerStatus) -> Server {
    Server {
        id: ServerId(id),
        name: format!("server-{id}"),
        ip_address: format!("10.0.0.{id}"),
        status,
        os_version: "Ubuntu 22.04".to_string(),
        last_checked: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    }
}

pub(crate) fn patch(id: i64, server_id: i64, severity: Severity, status: PatchStatus) -> Patch {
    Patch {
        id: PatchId(id),
        server_id: ServerId(server_id),
        package_name: format!("package-{id}"),
        current_version: "1.0.0".to_string(),
        available_version: "1.0.1".to_string(),
        severity,
        status,
    }
}

/// Gateway double: responses are scripted per call site, calls are counted,
/// and each call can be held open by a gate until the test releases it.
/// Responses are read after the gate opens.
pub(crate) struct TestGateway {
    servers: Mutex<Result<Vec<Server>, String>>,
    patches: Mutex<HashMap<ServerId, Result<Vec<Patch>, String>>>,
    apply_results: Mutex<HashMap<PatchId, VecDeque<Result<Patch, String>>>>,
    server_calls: Mutex<u32>,
    patch_calls: Mutex<HashMap<ServerId, u32>>,
    apply_calls: Mutex<Vec<PatchId>>,
    server_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    patch_gates: Mutex<HashMap<ServerId, VecDeque<oneshot::Receiver<()>>>>,
    apply_gates: Mutex<HashMap<PatchId, VecDeque<oneshot::Receiver<()>>>>,
}

impl TestGateway {
    pub(crate) fn new() -> Self {
        Self {
            servers: Mutex::new(Ok(Vec::new())),
            patches: Mutex::new(HashMap::new()),
            apply_results: Mutex::new(HashMap::new()),
            server_calls: Mutex::new(0),
            patch_calls: Mutex::new(HashMap::new()),
            apply_calls: Mutex::new(Vec::new()),
            server_gates: Mutex::new(VecDeque::new()),
            patch_gates: Mutex::new(HashMap::new()),
            apply_gates: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn set_servers(&self, servers: Vec<Server>) {
        *self.servers.lock().await = Ok(servers);
    }

    pub(crate) async fn fail_servers(&self, message: &str) {
        *self.servers.lock().await = Err(message.to_string());
    }

    pub(crate) async fn set_patches(&self, server_id: i64, patches: Vec<Patch>) {
        self.patches
            .lock()
            .await
            .insert(ServerId(server_id), Ok(patches));
    }

    pub(crate) async fn fail_patches(&self, server_id: i64, message: &str) {
        self.patches
            .lock()
            .await
            .insert(ServerId(server_id), Err(message.to_string()));
    }

    /// Queues the answer for the next apply of `patch_id`.
    pub(crate) async fn push_apply(&self, patch_id: i64, result: Result<Patch, String>) {
        self.apply_results
            .lock()
            .await
            .entry(PatchId(patch_id))
            .or_default()
            .push_back(result);
    }

    pub(crate) async fn gate_servers(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.server_gates.lock().await.push_back(rx);
        tx
    }

    pub(crate) async fn gate_patches(&self, server_id: i64) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.patch_gates
            .lock()
            .await
            .entry(ServerId(server_id))
            .or_default()
            .push_back(rx);
        tx
    }

    pub(crate) async fn gate_apply(&self, patch_id: i64) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.apply_gates
            .lock()
            .await
            .entry(PatchId(patch_id))
            .or_default()
            .push_back(rx);
        tx
    }

    pub(crate) async fn server_calls(&self) -> u32 {
        *self.server_calls.lock().await
    }

    pub(crate) async fn patch_calls(&self, server_id: i64) -> u32 {
        self.patch_calls
            .lock()
            .await
            .get(&ServerId(server_id))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) async fn apply_calls(&self) -> Vec<PatchId> {
        self.apply_calls.lock().await.clone()
    }
}

async fn wait_for_gate(gate: Option<oneshot::Receiver<()>>) {
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

#[async_trait]
impl InventoryGateway for TestGateway {
    async fn list_servers(&self) -> Result<Vec<Server>> {
        *self.server_calls.lock().await += 1;
        let gate = self.server_gates.lock().await.pop_front();
        wait_for_gate(gate).await;
        self.servers.lock().await.clone().map_err(|err| anyhow!(err))
    }

    async fn list_patches(&self, server_id: ServerId) -> Result<Vec<Patch>> {
        *self
            .patch_calls
            .lock()
            .await
            .entry(server_id)
            .or_default() += 1;
        let gate = self
            .patch_gates
            .lock()
            .await
            .get_mut(&server_id)
            .and_then(VecDeque::pop_front);
        wait_for_gate(gate).await;
        self.patches
            .lock()
            .await
            .get(&server_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(|err| anyhow!(err))
    }

    async fn apply_patch(&self, _server_id: ServerId, patch_id: PatchId) -> Result<Patch> {
        self.apply_calls.lock().await.push(patch_id);
        let gate = self
            .apply_gates
            .lock()
            .await
            .get_mut(&patch_id)
            .and_then(VecDeque::pop_front);
        wait_for_gate(gate).await;
        self.apply_results
            .lock()
            .await
            .get_mut(&patch_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(format!("no scripted apply result for patch {}", patch_id.0)))
            .map_err(|err| anyhow!(err))
    }
}
