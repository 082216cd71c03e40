//! VM snapshot operations.
//!
//! Restore and delete only look at the top level of the snapshot tree.

use crate::api::VimApi;
use crate::error::VsphereResult;
use crate::inventory::find;
use crate::task::{execute_task, settle, settle_opt};
use crate::types::*;

use serde::{Deserialize, Serialize};

/// Format of [`SnapshotEntry::date`].
pub const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(rename = "Name")]
    pub name: String,
    /// Creation time in UTC, `YYYY-MM-DD HH:MM:SS`
    #[serde(rename = "Date")]
    pub date: String,
}

impl From<&SnapshotTree> for SnapshotEntry {
    fn from(tree: &SnapshotTree) -> Self {
        Self {
            name: tree.name.clone(),
            date: tree.create_time.format(SNAPSHOT_DATE_FORMAT).to_string(),
        }
    }
}

/// Exact-name match among the top-level snapshots.
pub fn find_root_snapshot<'t>(roots: &'t [SnapshotTree], name: &str) -> Option<&'t SnapshotTree> {
    roots.iter().find(|s| s.name == name)
}

pub struct SnapshotManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    /// Snapshot with memory state; the guest filesystem is not quiesced.
    pub async fn create(&self, vm_name: &str, snapshot_name: &str, description: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            log::info!("Creating snapshot {snapshot_name:?} of {vm_name}");
            execute_task(
                self.api,
                self.api
                    .create_snapshot(&vm.moref, snapshot_name, description, true, false),
            )
            .await
        }
        .await;
        settle("create_snapshot", result)
    }

    pub async fn restore(&self, vm_name: &str, snapshot_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let Some(snapshot) = self.root_snapshot(vm_name, snapshot_name).await? else {
                return Ok(false);
            };
            log::info!("Reverting {vm_name} to snapshot {snapshot_name:?}");
            execute_task(self.api, self.api.revert_to_snapshot(&snapshot)).await
        }
        .await;
        settle("restore_snapshot", result)
    }

    /// Remove one snapshot, keeping its children.
    pub async fn delete(&self, vm_name: &str, snapshot_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let Some(snapshot) = self.root_snapshot(vm_name, snapshot_name).await? else {
                return Ok(false);
            };
            log::info!("Removing snapshot {snapshot_name:?} of {vm_name}");
            execute_task(self.api, self.api.remove_snapshot(&snapshot, false)).await
        }
        .await;
        settle("delete_snapshot", result)
    }

    /// Top-level snapshots of a VM; empty when it has none.
    pub async fn list(&self, vm_name: &str) -> Option<Vec<SnapshotEntry>> {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            let props = self.api.vm_properties(&vm.moref).await?;
            let entries: Vec<SnapshotEntry> = props
                .root_snapshots
                .unwrap_or_default()
                .iter()
                .map(SnapshotEntry::from)
                .collect();
            Ok(Some(entries))
        }
        .await;
        settle_opt("list_snapshots", result)
    }

    async fn root_snapshot(&self, vm_name: &str, snapshot_name: &str) -> VsphereResult<Option<MoRef>> {
        let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
        let props = self.api.vm_properties(&vm.moref).await?;
        let roots = props.root_snapshots.unwrap_or_default();
        let found = find_root_snapshot(&roots, snapshot_name).map(|s| s.snapshot.clone());
        if found.is_none() {
            log::warn!("Snapshot {snapshot_name:?} not found on {vm_name}");
        }
        Ok(found)
    }
}
