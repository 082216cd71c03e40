//! The control-plane seam.
//!
//! `VimApi` is the slice of the vim25 object model the managers drive.
//! [`SoapClient`](crate::vsphere::SoapClient) implements it over HTTPS;
//! tests plug in fakes.
//!
//! Methods ending in a task return the task's `MoRef`; callers hand it to
//! [`wait_for_task`](crate::task::wait_for_task).

use crate::error::VsphereResult;
use crate::types::*;

use async_trait::async_trait;
use std::time::Duration;

/// Poll interval used when an implementation does not override it.
pub const DEFAULT_TASK_POLL: Duration = Duration::from_millis(500);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VimApi: Send + Sync {
    /// Raw session cookie as set by the control plane
    /// (`name="value"; Path=/; HttpOnly; Secure;`).
    fn session_cookie(&self) -> Option<String>;

    /// Delay between two task state polls.
    fn task_poll_interval(&self) -> Duration {
        DEFAULT_TASK_POLL
    }

    async fn logout(&self) -> VsphereResult<()>;

    // ── Inventory ───────────────────────────────────────────────────

    /// Recursive container view from the root folder, in view order.
    async fn list_objects(&self, kind: ObjectKind) -> VsphereResult<Vec<ManagedObject>>;

    async fn vm_properties(&self, vm: &MoRef) -> VsphereResult<VmProperties>;

    async fn vm_power_state(&self, vm: &MoRef) -> VsphereResult<PowerState>;

    async fn datastore_location(&self, datastore: &MoRef) -> VsphereResult<DatastoreLocation>;

    /// Clusters that are direct children of the datacenter's host folder.
    async fn datacenter_clusters(&self, datacenter: &MoRef) -> VsphereResult<Vec<ManagedObject>>;

    async fn cluster_usage(&self, cluster: &MoRef) -> VsphereResult<ClusterUsage>;

    // ── Tasks ───────────────────────────────────────────────────────

    async fn task_info(&self, task: &MoRef) -> VsphereResult<TaskInfo>;

    // ── VM lifecycle ────────────────────────────────────────────────

    async fn power_on_vm(&self, vm: &MoRef) -> VsphereResult<MoRef>;

    async fn power_off_vm(&self, vm: &MoRef) -> VsphereResult<MoRef>;

    async fn reset_vm(&self, vm: &MoRef) -> VsphereResult<MoRef>;

    /// Guest-level reboot via VMware Tools; returns without a task.
    async fn reboot_guest(&self, vm: &MoRef) -> VsphereResult<()>;

    async fn destroy(&self, entity: &MoRef) -> VsphereResult<MoRef>;

    async fn rename(&self, entity: &MoRef, new_name: &str) -> VsphereResult<MoRef>;

    async fn reconfigure_vm(&self, vm: &MoRef, spec: &ConfigSpec) -> VsphereResult<MoRef>;

    // ── Snapshots ───────────────────────────────────────────────────

    async fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        memory: bool,
        quiesce: bool,
    ) -> VsphereResult<MoRef>;

    async fn revert_to_snapshot(&self, snapshot: &MoRef) -> VsphereResult<MoRef>;

    async fn remove_snapshot(&self, snapshot: &MoRef, remove_children: bool) -> VsphereResult<MoRef>;

    // ── Custom fields ───────────────────────────────────────────────

    async fn set_custom_value(&self, entity: &MoRef, key: &str, value: &str) -> VsphereResult<()>;

    async fn custom_field_definitions(&self) -> VsphereResult<Vec<CustomFieldDef>>;

    // ── Distributed switching ───────────────────────────────────────

    async fn portgroup_binding(&self, portgroup: &MoRef) -> VsphereResult<PortgroupBinding>;

    async fn add_portgroup(&self, switch: &MoRef, spec: &PortgroupSpec) -> VsphereResult<MoRef>;

    async fn fetch_ports(&self, switch: &MoRef, criteria: &PortCriteria) -> VsphereResult<Vec<DistributedPort>>;
}
