//! Shared types for the vSphere control client.
//!
//! These mirror the slice of the vim25 object model the client touches:
//! managed object references, tasks, virtual devices and reconfiguration
//! specs, snapshot trees, custom fields and distributed switch ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for connecting to a vCenter / ESXi host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfig {
    /// vCenter or ESXi hostname / IP (e.g. "vcenter.lab.local")
    pub host: String,
    /// Port (default 443)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    /// Password
    pub password: String,
    /// Skip TLS certificate verification (on unless explicitly disabled)
    #[serde(default = "default_insecure")]
    pub insecure: bool,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// vim25 API version sent in the SOAPAction header
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Delay between task state polls
    #[serde(default = "default_task_poll")]
    pub task_poll_millis: u64,
}

fn default_port() -> u16 { 443 }
fn default_insecure() -> bool { true }
fn default_timeout() -> u64 { 30 }
fn default_api_version() -> String { "7.0.3.0".to_string() }
fn default_task_poll() -> u64 { 500 }

impl VsphereConfig {
    /// Config for `host` with the given credentials and default options.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

impl Default for VsphereConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            port: default_port(),
            insecure: default_insecure(),
            timeout_secs: default_timeout(),
            api_version: default_api_version(),
            task_poll_millis: default_task_poll(),
        }
    }
}

/// Config view that is safe to hand back to callers (no password).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfigSafe {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub insecure: bool,
    pub api_version: String,
}

impl From<&VsphereConfig> for VsphereConfigSafe {
    fn from(c: &VsphereConfig) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            username: c.username.clone(),
            insecure: c.insecure,
            api_version: c.api_version.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Managed objects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Managed object reference, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoRef {
    pub type_name: String,
    pub value: String,
}

impl MoRef {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), value: value.into() }
    }
}

impl fmt::Display for MoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.value)
    }
}

/// Object types the client looks up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    VirtualMachine,
    Datastore,
    Datacenter,
    Cluster,
    DistributedSwitch,
    DistributedPortgroup,
}

impl ObjectKind {
    /// vim25 type name used in container views.
    pub fn vim_type(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "VirtualMachine",
            Self::Datastore => "Datastore",
            Self::Datacenter => "Datacenter",
            Self::Cluster => "ClusterComputeResource",
            Self::DistributedSwitch => "DistributedVirtualSwitch",
            Self::DistributedPortgroup => "DistributedVirtualPortgroup",
        }
    }
}

/// A managed object together with its inventory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub moref: MoRef,
    pub name: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Power state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PowerState {
    pub fn from_vim(s: &str) -> Self {
        match s {
            "poweredOn" => Self::PoweredOn,
            "poweredOff" => Self::PoweredOff,
            "suspended" => Self::Suspended,
            _ => Self::Unknown,
        }
    }

    pub fn as_vim(&self) -> &'static str {
        match self {
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
            Self::Suspended => "suspended",
            Self::Unknown => "unknown",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn from_vim(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Fault attached to a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFault {
    /// vim25 fault type, e.g. `CpuHotPlugNotSupported`
    pub fault_type: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub state: TaskState,
    #[serde(default)]
    pub error: Option<TaskFault>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Virtual devices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `VirtualDeviceConnectInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub start_connected: bool,
    pub allow_guest_control: bool,
    pub connected: bool,
    #[serde(default)]
    pub status: Option<String>,
}

/// Distributed switch port a NIC is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConnection {
    pub switch_uuid: String,
    #[serde(default)]
    pub portgroup_key: Option<String>,
    #[serde(default)]
    pub port_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceBacking {
    /// `VirtualDiskFlatVer2BackingInfo`
    DiskFlat {
        file_name: String,
        disk_mode: String,
        thin_provisioned: Option<bool>,
    },
    /// `VirtualCdromIsoBackingInfo`
    Iso { file_name: String },
    /// `VirtualCdromRemotePassthroughBackingInfo`
    RemotePassthrough { device_name: String, exclusive: bool },
    /// `VirtualEthernetCardDistributedVirtualPortBackingInfo`
    DistributedPort { port: PortConnection },
    /// Any backing the client does not model; holds the vim25 type name.
    Other { vim_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeviceKind {
    Disk { capacity_kb: i64 },
    Cdrom,
    IdeController { devices: Vec<i32> },
    ScsiController { devices: Vec<i32> },
    Ethernet {
        mac_address: Option<String>,
        wake_on_lan: Option<bool>,
    },
    Other,
}

/// One entry of `config.hardware.device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    /// Concrete vim25 type, e.g. `VirtualVmxnet3` or `ParaVirtualSCSIController`
    pub type_name: String,
    pub key: i32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub controller_key: Option<i32>,
    #[serde(default)]
    pub unit_number: Option<i32>,
    #[serde(default)]
    pub connectable: Option<ConnectInfo>,
    #[serde(default)]
    pub backing: Option<DeviceBacking>,
    pub kind: DeviceKind,
}

impl VirtualDevice {
    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk { .. })
    }

    pub fn is_cdrom(&self) -> bool {
        matches!(self.kind, DeviceKind::Cdrom)
    }

    pub fn is_ethernet(&self) -> bool {
        matches!(self.kind, DeviceKind::Ethernet { .. })
    }

    pub fn is_scsi_controller(&self) -> bool {
        matches!(self.kind, DeviceKind::ScsiController { .. })
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }

    pub fn capacity_kb(&self) -> Option<i64> {
        match self.kind {
            DeviceKind::Disk { capacity_kb } => Some(capacity_kb),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOperation {
    Add,
    Edit,
    Remove,
}

impl DeviceOperation {
    pub fn as_vim(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOperation {
    Create,
    Destroy,
}

impl FileOperation {
    pub fn as_vim(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
        }
    }
}

/// `VirtualDeviceConfigSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChange {
    pub operation: DeviceOperation,
    #[serde(default)]
    pub file_operation: Option<FileOperation>,
    pub device: VirtualDevice,
}

/// The subset of `VirtualMachineConfigSpec` the client submits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    #[serde(default)]
    pub num_cpus: Option<i32>,
    #[serde(default)]
    pub memory_mb: Option<i64>,
    #[serde(default)]
    pub device_change: Vec<DeviceChange>,
}

impl ConfigSpec {
    /// Spec carrying a single device change.
    pub fn with_change(change: DeviceChange) -> Self {
        Self {
            device_change: vec![change],
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM properties
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A top-level node of `snapshot.rootSnapshotList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTree {
    pub snapshot: MoRef,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub create_time: DateTime<Utc>,
}

/// `CustomFieldStringValue` set on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomValue {
    pub key: i32,
    pub value: String,
}

/// Entry of the custom fields manager catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldDef {
    pub key: i32,
    pub name: String,
}

/// Properties of a virtual machine read in one round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmProperties {
    pub name: String,
    pub power_state: PowerState,
    pub num_cpu: i32,
    pub memory_mb: i64,
    #[serde(default)]
    pub guest_full_name: Option<String>,
    #[serde(default)]
    pub devices: Vec<VirtualDevice>,
    /// `None` when the VM has never had a snapshot
    #[serde(default)]
    pub root_snapshots: Option<Vec<SnapshotTree>>,
    #[serde(default)]
    pub custom_values: Vec<CustomValue>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Datastores / clusters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a datastore lives, as needed by the `/folder` file endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreLocation {
    pub datastore_name: String,
    pub datacenter_name: String,
}

/// `ClusterUsageSummary` fields the client reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUsage {
    pub total_cpu_capacity_mhz: i64,
    pub total_mem_capacity_mb: i64,
    pub cpu_demand_mhz: i64,
    pub mem_demand_mb: i64,
    pub cpu_reservation_mhz: i64,
    pub mem_reservation_mb: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Distributed switching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Key of a port group and the switch that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortgroupBinding {
    pub key: String,
    pub switch: MoRef,
}

/// `DVPortgroupConfigSpec` as submitted by `AddDVPortgroup_Task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortgroupSpec {
    pub name: String,
    pub num_ports: i32,
    pub vlan_id: i32,
    /// `earlyBinding`, `ephemeral`, ...
    pub binding: String,
    pub allow_promiscuous: bool,
    pub forged_transmits: bool,
    pub mac_changes: bool,
}

/// `DistributedVirtualSwitchPortCriteria`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortCriteria {
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub inside: Option<bool>,
    #[serde(default)]
    pub portgroup_keys: Vec<String>,
    #[serde(default)]
    pub port_keys: Vec<String>,
}

/// `DistributedVirtualPort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedPort {
    pub key: String,
    pub dvs_uuid: String,
    #[serde(default)]
    pub portgroup_key: Option<String>,
}
