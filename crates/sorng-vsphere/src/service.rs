//! Aggregate service façade.
//!
//! `VsphereService` owns the session and the config, and hands every
//! operation to the matching manager. Hosts share it as
//! `VsphereServiceState = Arc<Mutex<VsphereService>>`.

use crate::api::VimApi;
use crate::attributes::{AttributeManager, CustomAttributes};
use crate::error::{VsphereError, VsphereResult};
use crate::inventory::{ClusterInfo, InventoryManager};
use crate::network::NetworkManager;
use crate::session;
use crate::snapshot::{SnapshotEntry, SnapshotManager};
use crate::storage::{DiskInfo, StorageManager};
use crate::transfer::FileTransfer;
use crate::types::*;
use crate::vm::{VmManager, VmMeta};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the service.
pub type VsphereServiceState = Arc<Mutex<VsphereService>>;

#[derive(Default)]
pub struct VsphereService {
    session: Option<Arc<dyn VimApi>>,
    config: Option<VsphereConfig>,
}

impl VsphereService {
    /// A disconnected service.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_state() -> VsphereServiceState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// A service bound to an already open session.
    pub fn with_session(config: VsphereConfig, session: Arc<dyn VimApi>) -> Self {
        Self {
            session: Some(session),
            config: Some(config),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn require_session(&self) -> VsphereResult<&dyn VimApi> {
        self.session
            .as_deref()
            .ok_or_else(|| VsphereError::connection("Not connected to vSphere. Call connect first."))
    }

    /// The open session, for callers that drive managers directly.
    pub fn session(&self) -> Option<Arc<dyn VimApi>> {
        self.session.clone()
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Open a session, replacing any previous one.
    pub async fn connect(&mut self, config: VsphereConfig) -> VsphereResult<()> {
        if self.session.is_some() {
            self.disconnect().await;
        }
        let client = session::connect(&config).await?;
        self.session = Some(Arc::new(client));
        self.config = Some(config);
        Ok(())
    }

    /// Release the session. Returns whether the control plane accepted the
    /// logout; the service is disconnected either way.
    pub async fn disconnect(&mut self) -> bool {
        let released = match self.session.take() {
            Some(s) => session::disconnect(&*s).await,
            None => true,
        };
        self.config = None;
        released
    }

    /// Current config (without password).
    pub fn get_config(&self) -> Option<VsphereConfigSafe> {
        self.config.as_ref().map(VsphereConfigSafe::from)
    }

    // ── Inventory ───────────────────────────────────────────────────

    pub async fn get_object(&self, kind: ObjectKind, name: &str) -> VsphereResult<Option<ManagedObject>> {
        let s = self.require_session()?;
        Ok(InventoryManager::new(s).get_object(kind, name).await)
    }

    pub async fn list_objects(&self, kind: ObjectKind) -> VsphereResult<Option<Vec<ManagedObject>>> {
        let s = self.require_session()?;
        Ok(InventoryManager::new(s).list_objects(kind).await)
    }

    pub async fn get_clusters(&self) -> VsphereResult<Option<Vec<String>>> {
        let s = self.require_session()?;
        Ok(InventoryManager::new(s).get_clusters().await)
    }

    pub async fn get_cluster_info(&self, name: &str) -> VsphereResult<Option<ClusterInfo>> {
        let s = self.require_session()?;
        Ok(InventoryManager::new(s).get_cluster_info(name).await)
    }

    // ── VMs ─────────────────────────────────────────────────────────

    pub async fn get_vms(&self) -> VsphereResult<Option<Vec<String>>> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).get_vms().await)
    }

    pub async fn get_vm_meta(&self, vm_name: &str) -> VsphereResult<Option<VmMeta>> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).get_vm_meta(vm_name).await)
    }

    pub async fn get_vm_metas_by_name(&self, vm_names: &[&str]) -> VsphereResult<Option<Vec<VmMeta>>> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).get_vm_metas_by_name(vm_names).await)
    }

    pub async fn power_on_vm(&self, vm_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).power_on(vm_name).await)
    }

    pub async fn power_off_vm(&self, vm_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).power_off(vm_name).await)
    }

    pub async fn reboot_vm(&self, vm_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).reboot(vm_name).await)
    }

    pub async fn delete_vm(&self, vm_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).delete_vm(vm_name).await)
    }

    pub async fn rename_vm(&self, vm_name: &str, new_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).rename_vm(vm_name, new_name).await)
    }

    pub async fn resize_vm(&self, vm_name: &str, cpu_count: Option<i32>, ram_gb: Option<i64>) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(VmManager::new(s).resize_vm(vm_name, cpu_count, ram_gb).await)
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub async fn snapshot_vm(&self, vm_name: &str, snapshot_name: &str, description: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(SnapshotManager::new(s).create(vm_name, snapshot_name, description).await)
    }

    pub async fn restore_vm_from_snapshot(&self, vm_name: &str, snapshot_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(SnapshotManager::new(s).restore(vm_name, snapshot_name).await)
    }

    pub async fn delete_vm_snapshot(&self, vm_name: &str, snapshot_name: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(SnapshotManager::new(s).delete(vm_name, snapshot_name).await)
    }

    pub async fn list_vm_snapshots(&self, vm_name: &str) -> VsphereResult<Option<Vec<SnapshotEntry>>> {
        let s = self.require_session()?;
        Ok(SnapshotManager::new(s).list(vm_name).await)
    }

    // ── Disks / CD-ROM ──────────────────────────────────────────────

    pub async fn list_vm_hard_disks(&self, vm_name: &str) -> VsphereResult<Option<Vec<DiskInfo>>> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s).list_vm_hard_disks(vm_name).await)
    }

    pub async fn add_disk_to_vm(&self, vm_name: &str, size_gb: i64) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s).add_disk(vm_name, size_gb).await)
    }

    pub async fn remove_disk_from_vm(&self, vm_name: &str, disk_label: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s).remove_disk(vm_name, disk_label).await)
    }

    pub async fn extend_vm_hard_disk(&self, vm_name: &str, disk_label: &str, size_gb: i64) -> VsphereResult<bool> {
        let s = self.require_session()?;
        StorageManager::new(s).extend_disk(vm_name, disk_label, size_gb).await
    }

    pub async fn attach_iso_to_vm(&self, vm_name: &str, cdrom_number: u32, datastore: &str, iso_path: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s)
            .attach_iso_to_vm(vm_name, cdrom_number, datastore, iso_path)
            .await)
    }

    pub async fn disconnect_cdrom(&self, vm_name: &str, cdrom_number: u32) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s).disconnect_cdrom(vm_name, cdrom_number).await)
    }

    pub async fn attach_cdrom_to_vm(&self, vm_name: &str, datastore: &str, iso_path: &str) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(StorageManager::new(s).attach_cdrom_to_vm(vm_name, datastore, iso_path).await)
    }

    // ── Networking ──────────────────────────────────────────────────

    pub async fn create_portgroup(&self, name: &str, dvs_name: &str, vlan_id: i32, num_ports: Option<i32>) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(NetworkManager::new(s).create_portgroup(name, dvs_name, vlan_id, num_ports).await)
    }

    pub async fn get_port_by_portgroup(&self, portgroup_name: &str) -> VsphereResult<Option<DistributedPort>> {
        let s = self.require_session()?;
        Ok(NetworkManager::new(s).get_port_by_portgroup(portgroup_name).await)
    }

    pub async fn attach_portgroup_to_vm(&self, vm_name: &str, portgroup_name: &str, vm_port: u32) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(NetworkManager::new(s)
            .attach_portgroup_to_vm(vm_name, portgroup_name, vm_port)
            .await)
    }

    // ── Custom attributes ───────────────────────────────────────────

    pub async fn set_vm_custom_attributes(&self, vm_name: &str, attrs: &CustomAttributes) -> VsphereResult<bool> {
        let s = self.require_session()?;
        Ok(AttributeManager::new(s).set_vm_custom_attributes(vm_name, attrs).await)
    }

    pub async fn get_vm_custom_attributes(&self, vm_name: &str) -> VsphereResult<Option<HashMap<String, String>>> {
        let s = self.require_session()?;
        Ok(AttributeManager::new(s).get_vm_custom_attributes(vm_name).await)
    }

    // ── Upload ──────────────────────────────────────────────────────

    pub async fn upload_file_to_datastore(
        &self,
        cloud_url: &str,
        datastore_name: &str,
        data: Vec<u8>,
        upload_folder: &str,
        upload_file: &str,
    ) -> VsphereResult<bool> {
        let s = self.require_session()?;
        FileTransfer::new(s)?
            .upload_file_to_datastore(cloud_url, datastore_name, data, upload_folder, upload_file)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockVimApi;
    use crate::error::VsphereErrorKind;

    #[tokio::test]
    async fn operations_require_a_session() {
        let svc = VsphereService::new();
        assert!(!svc.is_connected());
        let err = svc.power_on_vm("web01").await.unwrap_err();
        assert_eq!(err.kind, VsphereErrorKind::ConnectionError);
        assert!(svc.get_config().is_none());
    }

    #[tokio::test]
    async fn config_view_hides_password_and_disconnect_clears_it() {
        let mut api = MockVimApi::new();
        api.expect_logout().times(1).returning(|| Ok(()));
        let config = VsphereConfig::new("vc.lab", "administrator@vsphere.local", "s3cret");
        let mut svc = VsphereService::with_session(config, Arc::new(api));

        let safe = svc.get_config().unwrap();
        assert_eq!(safe.host, "vc.lab");
        assert_eq!(safe.port, 443);
        assert!(!serde_json::to_string(&safe).unwrap().contains("s3cret"));

        assert!(svc.disconnect().await);
        assert!(!svc.is_connected());
        assert!(svc.get_config().is_none());
    }
}
