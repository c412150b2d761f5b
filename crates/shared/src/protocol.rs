use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PatchId, PatchStatus, ServerId, ServerStatus, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub ip_address: String,
    pub status: ServerStatus,
    pub os_version: String,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub id: PatchId,
    pub server_id: ServerId,
    pub package_name: String,
    pub current_version: String,
    pub available_version: String,
    pub severity: Severity,
    pub status: PatchStatus,
}
