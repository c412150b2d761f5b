//! Dashboard statistics derived from the current store contents.

use serde::Serialize;
use shared::{
    domain::{PatchStatus, ServerId, ServerStatus, Severity},
    protocol::Patch,
};

use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub applying: usize,
    pub applied: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn get(&self, status: PatchStatus) -> usize {
        match status {
            PatchStatus::Pending => self.pending,
            PatchStatus::Applying => self.applying,
            PatchStatus::Applied => self.applied,
            PatchStatus::Failed => self.failed,
        }
    }

    fn bump(&mut self, status: PatchStatus) {
        match status {
            PatchStatus::Pending => self.pending += 1,
            PatchStatus::Applying => self.applying += 1,
            PatchStatus::Applied => self.applied += 1,
            PatchStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DashboardStats {
    pub server_count: usize,
    pub online_server_count: usize,
    pub offline_server_count: usize,
    pub maintenance_server_count: usize,
    /// Servers with loaded patches and nothing pending or failed.
    pub compliant_server_count: usize,
    pub patch_count: usize,
    pub counts_by_severity: SeverityCounts,
    pub counts_by_status: StatusCounts,
}

impl DashboardStats {
    pub fn compute(store: &EntityStore) -> Self {
        let mut stats = Self::default();
        for server in store.servers() {
            stats.count_server(server.status);
            if is_compliant(store, server.id) {
                stats.compliant_server_count += 1;
            }
        }
        stats.count_patches(
            store
                .all_patches()
                .filter(|patch| in_inventory(store, patch.server_id)),
        );
        stats
    }

    /// Statistics restricted to one server. Server counts are 0 or 1.
    pub fn for_server(store: &EntityStore, server_id: ServerId) -> Self {
        let mut stats = Self::default();
        if let Some(server) = store.server(server_id) {
            stats.count_server(server.status);
            if is_compliant(store, server_id) {
                stats.compliant_server_count = 1;
            }
        }
        if in_inventory(store, server_id) {
            stats.count_patches(store.patches_for(server_id));
        }
        stats
    }

    /// Share of `severity` among all patches, in percent; 0 when there are no patches.
    pub fn severity_proportion(&self, severity: Severity) -> f64 {
        percentage(self.counts_by_severity.get(severity), self.patch_count)
    }

    /// Share of online servers, in percent; 0 when there are no servers.
    pub fn online_ratio(&self) -> f64 {
        percentage(self.online_server_count, self.server_count)
    }

    fn count_server(&mut self, status: ServerStatus) {
        self.server_count += 1;
        match status {
            ServerStatus::Online => self.online_server_count += 1,
            ServerStatus::Offline => self.offline_server_count += 1,
            ServerStatus::Maintenance => self.maintenance_server_count += 1,
        }
    }

    fn count_patches<'a>(&mut self, patches: impl Iterator<Item = &'a Patch>) {
        for patch in patches {
            self.patch_count += 1;
            self.counts_by_severity.bump(patch.severity);
            self.counts_by_status.bump(patch.status);
        }
    }
}

/// Patches of servers dropped from a loaded server list no longer count.
/// Before the first servers load every patch counts.
fn in_inventory(store: &EntityStore, server_id: ServerId) -> bool {
    !store.servers_loaded() || store.contains_server(server_id)
}

fn is_compliant(store: &EntityStore, server_id: ServerId) -> bool {
    store.patches_loaded(server_id)
        && store
            .patches_for(server_id)
            .all(|patch| !matches!(patch.status, PatchStatus::Pending | PatchStatus::Failed))
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

#[cfg(test)]
#[path = "tests/stats_tests.rs"]
mod tests;
