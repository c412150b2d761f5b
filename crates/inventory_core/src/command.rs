//! Commands a presentation layer dispatches into the engine.

use std::sync::Arc;

use shared::{
    domain::{PatchId, ServerId},
    protocol::{Patch, Server},
};
use tracing::{debug, warn};

use crate::{error::CoreError, selection::Selection, InventoryClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryCommand {
    RequestServers,
    RequestPatches { server_id: ServerId },
    RefreshAll,
    SelectServer { server_id: ServerId },
    SelectPatch { patch_id: PatchId },
    ClearSelection,
    ApplyPatch { patch_id: PatchId },
}

impl InventoryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            InventoryCommand::RequestServers => "request_servers",
            InventoryCommand::RequestPatches { .. } => "request_patches",
            InventoryCommand::RefreshAll => "refresh_all",
            InventoryCommand::SelectServer { .. } => "select_server",
            InventoryCommand::SelectPatch { .. } => "select_patch",
            InventoryCommand::ClearSelection => "clear_selection",
            InventoryCommand::ApplyPatch { .. } => "apply_patch",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Servers(Vec<Server>),
    Patches(Vec<Patch>),
    Refreshed,
    Selection(Selection),
    Patch(Patch),
}

impl InventoryClient {
    pub async fn dispatch(
        self: &Arc<Self>,
        command: InventoryCommand,
    ) -> Result<CommandOutcome, CoreError> {
        let name = command.name();
        debug!(command = name, "inventory: dispatching command");

        let outcome = match command {
            InventoryCommand::RequestServers => {
                self.request_servers().await.map(CommandOutcome::Servers)
            }
            InventoryCommand::RequestPatches { server_id } => self
                .request_patches(server_id)
                .await
                .map(CommandOutcome::Patches),
            InventoryCommand::RefreshAll => {
                self.refresh_all().await.map(|()| CommandOutcome::Refreshed)
            }
            InventoryCommand::SelectServer { server_id } => self
                .select_server(server_id)
                .await
                .map(CommandOutcome::Selection),
            InventoryCommand::SelectPatch { patch_id } => self
                .select_patch(patch_id)
                .await
                .map(CommandOutcome::Selection),
            InventoryCommand::ClearSelection => {
                Ok(CommandOutcome::Selection(self.clear_selection().await))
            }
            InventoryCommand::ApplyPatch { patch_id } => {
                self.apply_patch(patch_id).await.map(CommandOutcome::Patch)
            }
        };

        if let Err(err) = &outcome {
            warn!(command = name, error = %err, "inventory: command failed");
        }
        outcome
    }
}
