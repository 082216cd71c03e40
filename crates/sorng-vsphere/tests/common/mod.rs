//! In-memory control plane for scenario tests.
//!
//! Every call is recorded under its vim25 method name. Task methods apply
//! their effect immediately and return a task that is already `success`,
//! unless a fault was queued for that method with [`FakeVim::fail_next`],
//! in which case the task ends in `error` with that fault.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sorng_vsphere::api::VimApi;
use sorng_vsphere::error::{VsphereError, VsphereResult};
use sorng_vsphere::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const COOKIE: &str = r#"vmware_soap_session="5fd1c0e2"; Path=/; HttpOnly; Secure;"#;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    objects: Vec<(ObjectKind, ManagedObject)>,
    vms: HashMap<String, VmProperties>,
    faults: HashMap<String, VecDeque<(String, String)>>,
    tasks: HashMap<String, TaskInfo>,
    fields: Vec<CustomFieldDef>,
    portgroups: HashMap<String, PortgroupBinding>,
    ports: Vec<(DistributedPort, bool)>,
    switch_uuid: HashMap<String, String>,
    datastore_dc: HashMap<String, String>,
    next_id: u32,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn take_fault(&mut self, method: &str) -> Option<(String, String)> {
        self.faults.get_mut(method).and_then(|q| q.pop_front())
    }

    fn vm(&mut self, vm: &MoRef) -> VsphereResult<&mut VmProperties> {
        self.vms
            .get_mut(&vm.value)
            .ok_or_else(|| VsphereError::fault("ManagedObjectNotFound", format!("{vm} is gone")))
    }

    /// Record `method` and produce its task. The effect runs only when no
    /// fault is queued.
    fn task(&mut self, method: &str, effect: impl FnOnce(&mut State) -> VsphereResult<()>) -> VsphereResult<MoRef> {
        self.calls.push(method.to_string());
        let info = match self.take_fault(method) {
            Some((fault_type, message)) => TaskInfo {
                state: TaskState::Error,
                error: Some(TaskFault { fault_type, message }),
            },
            None => {
                effect(self)?;
                TaskInfo { state: TaskState::Success, error: None }
            }
        };
        let id = self.id("task");
        self.tasks.insert(id.clone(), info);
        Ok(MoRef::new("Task", id))
    }
}

pub struct FakeVim {
    state: Mutex<State>,
}

pub fn device(type_name: &str, key: i32, label: &str, kind: DeviceKind) -> VirtualDevice {
    VirtualDevice {
        type_name: type_name.into(),
        key,
        label: Some(label.into()),
        controller_key: None,
        unit_number: None,
        connectable: None,
        backing: None,
        kind,
    }
}

/// The hardware of a freshly deployed template: one IDE channel in use,
/// a PVSCSI controller with one disk, a CD drive and a vmxnet3 adapter.
pub fn standard_hardware() -> Vec<VirtualDevice> {
    vec![
        device("VirtualIDEController", 200, "IDE 0", DeviceKind::IdeController { devices: vec![3000, 3001] }),
        device("VirtualIDEController", 201, "IDE 1", DeviceKind::IdeController { devices: vec![] }),
        device("ParaVirtualSCSIController", 1000, "SCSI controller 0", DeviceKind::ScsiController { devices: vec![2000] }),
        VirtualDevice {
            controller_key: Some(1000),
            unit_number: Some(0),
            backing: Some(DeviceBacking::DiskFlat {
                file_name: "[ds1] web01/web01.vmdk".into(),
                disk_mode: "persistent".into(),
                thin_provisioned: Some(true),
            }),
            ..device("VirtualDisk", 2000, "Hard disk 1", DeviceKind::Disk { capacity_kb: 40 * 1024 * 1024 })
        },
        VirtualDevice {
            controller_key: Some(200),
            connectable: Some(ConnectInfo {
                start_connected: false,
                allow_guest_control: true,
                connected: false,
                status: None,
            }),
            ..device("VirtualCdrom", 3000, "CD/DVD drive 1", DeviceKind::Cdrom)
        },
        VirtualDevice {
            controller_key: Some(100),
            connectable: Some(ConnectInfo {
                start_connected: true,
                allow_guest_control: true,
                connected: true,
                status: Some("ok".into()),
            }),
            ..device(
                "VirtualVmxnet3",
                4000,
                "Network adapter 1",
                DeviceKind::Ethernet {
                    mac_address: Some("00:50:56:9a:01:02".into()),
                    wake_on_lan: Some(true),
                },
            )
        },
    ]
}

impl FakeVim {
    pub fn new() -> Self {
        let state = State {
            fields: vec![
                CustomFieldDef { key: 101, name: "BLName".into() },
                CustomFieldDef { key: 102, name: "CDM".into() },
                CustomFieldDef { key: 103, name: "Category".into() },
                CustomFieldDef { key: 104, name: "Maint.Window".into() },
                CustomFieldDef { key: 105, name: "PatchWeek".into() },
            ],
            ..State::default()
        };
        Self { state: Mutex::new(state) }
    }

    fn add_object(&self, kind: ObjectKind, moref: MoRef, name: &str) {
        self.state.lock().unwrap().objects.push((
            kind,
            ManagedObject { moref, name: name.to_string() },
        ));
    }

    /// Add a VM with [`standard_hardware`].
    pub fn with_vm(self, id: &str, name: &str, power: PowerState, cpus: i32, memory_mb: i64) -> Self {
        self.add_object(ObjectKind::VirtualMachine, MoRef::new("VirtualMachine", id), name);
        self.state.lock().unwrap().vms.insert(
            id.to_string(),
            VmProperties {
                name: name.to_string(),
                power_state: power,
                num_cpu: cpus,
                memory_mb,
                guest_full_name: Some("Red Hat Enterprise Linux 9 (64-bit)".into()),
                devices: standard_hardware(),
                root_snapshots: None,
                custom_values: Vec::new(),
            },
        );
        self
    }

    pub fn with_datastore(self, id: &str, name: &str, datacenter: &str) -> Self {
        self.add_object(ObjectKind::Datastore, MoRef::new("Datastore", id), name);
        self.state
            .lock()
            .unwrap()
            .datastore_dc
            .insert(id.to_string(), datacenter.to_string());
        self
    }

    pub fn with_datacenter(self, id: &str, name: &str) -> Self {
        self.add_object(ObjectKind::Datacenter, MoRef::new("Datacenter", id), name);
        self
    }

    pub fn with_cluster(self, id: &str, name: &str) -> Self {
        self.add_object(ObjectKind::Cluster, MoRef::new("ClusterComputeResource", id), name);
        self
    }

    pub fn with_switch(self, id: &str, name: &str, uuid: &str) -> Self {
        self.add_object(
            ObjectKind::DistributedSwitch,
            MoRef::new("VmwareDistributedVirtualSwitch", id),
            name,
        );
        self.state
            .lock()
            .unwrap()
            .switch_uuid
            .insert(id.to_string(), uuid.to_string());
        self
    }

    /// Add a port group with `ports` ports, the first `connected` of which
    /// are in use.
    pub fn with_portgroup(self, id: &str, name: &str, switch_id: &str, ports: u32, connected: u32) -> Self {
        self.add_object(
            ObjectKind::DistributedPortgroup,
            MoRef::new("DistributedVirtualPortgroup", id),
            name,
        );
        {
            let mut st = self.state.lock().unwrap();
            let uuid = st.switch_uuid.get(switch_id).cloned().unwrap_or_default();
            st.portgroups.insert(
                id.to_string(),
                PortgroupBinding {
                    key: id.to_string(),
                    switch: MoRef::new("VmwareDistributedVirtualSwitch", switch_id),
                },
            );
            for n in 0..ports {
                st.ports.push((
                    DistributedPort {
                        key: format!("{}", 100 + n),
                        dvs_uuid: uuid.clone(),
                        portgroup_key: Some(id.to_string()),
                    },
                    n < connected,
                ));
            }
        }
        self
    }

    pub fn with_snapshot(self, vm_id: &str, snapshot_id: &str, name: &str) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let props = st.vms.get_mut(vm_id).expect("unknown vm");
            props.root_snapshots.get_or_insert_with(Vec::new).push(SnapshotTree {
                snapshot: MoRef::new("VirtualMachineSnapshot", snapshot_id),
                name: name.to_string(),
                description: None,
                create_time: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            });
        }
        self
    }

    pub fn with_custom_value(self, vm_id: &str, key: i32, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .vms
            .get_mut(vm_id)
            .expect("unknown vm")
            .custom_values
            .push(CustomValue { key, value: value.to_string() });
        self
    }

    /// Make the next call of `method` fail with `fault_type`.
    pub fn fail_next(&self, method: &str, fault_type: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(method.to_string())
            .or_default()
            .push_back((fault_type.to_string(), format!("{fault_type} injected")));
    }

    /// Mutating calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn vm(&self, id: &str) -> Option<VmProperties> {
        self.state.lock().unwrap().vms.get(id).cloned()
    }

    pub fn set_power(&self, id: &str, power: PowerState) {
        if let Some(vm) = self.state.lock().unwrap().vms.get_mut(id) {
            vm.power_state = power;
        }
    }

    pub fn object_names(&self, kind: ObjectKind) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, o)| o.name.clone())
            .collect()
    }
}

fn apply_device_change(devices: &mut Vec<VirtualDevice>, change: &DeviceChange, new_key: i32) {
    match change.operation {
        DeviceOperation::Add => {
            let mut device = change.device.clone();
            device.key = new_key;
            if device.label.is_none() {
                let prefix = match device.kind {
                    DeviceKind::Disk { .. } => "Hard disk",
                    DeviceKind::Cdrom => "CD/DVD drive",
                    _ => "Device",
                };
                let n = devices.iter().filter(|d| d.kind_name() == device.kind_name()).count() + 1;
                device.label = Some(format!("{prefix} {n}"));
            }
            devices.push(device);
        }
        DeviceOperation::Remove => devices.retain(|d| d.key != change.device.key),
        DeviceOperation::Edit => {
            if let Some(existing) = devices.iter_mut().find(|d| d.key == change.device.key) {
                let label = existing.label.clone();
                let controller = existing.controller_key;
                let unit = existing.unit_number;
                *existing = change.device.clone();
                existing.label = label;
                existing.controller_key = existing.controller_key.or(controller);
                existing.unit_number = existing.unit_number.or(unit);
            }
        }
    }
}

trait KindName {
    fn kind_name(&self) -> &'static str;
}

impl KindName for VirtualDevice {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Disk { .. } => "disk",
            DeviceKind::Cdrom => "cdrom",
            DeviceKind::IdeController { .. } => "ide",
            DeviceKind::ScsiController { .. } => "scsi",
            DeviceKind::Ethernet { .. } => "ethernet",
            DeviceKind::Other => "other",
        }
    }
}

#[async_trait]
impl VimApi for FakeVim {
    fn session_cookie(&self) -> Option<String> {
        Some(COOKIE.to_string())
    }

    fn task_poll_interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn logout(&self) -> VsphereResult<()> {
        self.state.lock().unwrap().calls.push("Logout".into());
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind) -> VsphereResult<Vec<ManagedObject>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .objects
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn vm_properties(&self, vm: &MoRef) -> VsphereResult<VmProperties> {
        let mut st = self.state.lock().unwrap();
        st.vm(vm).map(|p| p.clone())
    }

    async fn vm_power_state(&self, vm: &MoRef) -> VsphereResult<PowerState> {
        let mut st = self.state.lock().unwrap();
        st.vm(vm).map(|p| p.power_state)
    }

    async fn datastore_location(&self, datastore: &MoRef) -> VsphereResult<DatastoreLocation> {
        let st = self.state.lock().unwrap();
        let name = st
            .objects
            .iter()
            .find(|(_, o)| o.moref == *datastore)
            .map(|(_, o)| o.name.clone())
            .ok_or_else(|| VsphereError::not_found("datastore"))?;
        let datacenter_name = st
            .datastore_dc
            .get(&datastore.value)
            .cloned()
            .ok_or_else(|| VsphereError::not_found("datacenter"))?;
        Ok(DatastoreLocation { datastore_name: name, datacenter_name })
    }

    async fn datacenter_clusters(&self, _datacenter: &MoRef) -> VsphereResult<Vec<ManagedObject>> {
        self.list_objects(ObjectKind::Cluster).await
    }

    async fn cluster_usage(&self, _cluster: &MoRef) -> VsphereResult<ClusterUsage> {
        Ok(ClusterUsage {
            total_cpu_capacity_mhz: 64000,
            total_mem_capacity_mb: 262144,
            cpu_demand_mhz: 8000,
            mem_demand_mb: 98304,
            cpu_reservation_mhz: 2000,
            mem_reservation_mb: 16384,
        })
    }

    async fn task_info(&self, task: &MoRef) -> VsphereResult<TaskInfo> {
        let st = self.state.lock().unwrap();
        st.tasks
            .get(&task.value)
            .cloned()
            .ok_or_else(|| VsphereError::fault("ManagedObjectNotFound", "unknown task"))
    }

    async fn power_on_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("PowerOnVM_Task", |st| {
            st.vm(vm)?.power_state = PowerState::PoweredOn;
            Ok(())
        })
    }

    async fn power_off_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("PowerOffVM_Task", |st| {
            st.vm(vm)?.power_state = PowerState::PoweredOff;
            Ok(())
        })
    }

    async fn reset_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("ResetVM_Task", |st| {
            st.vm(vm)?.power_state = PowerState::PoweredOn;
            Ok(())
        })
    }

    async fn reboot_guest(&self, _vm: &MoRef) -> VsphereResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("RebootGuest".into());
        match st.take_fault("RebootGuest") {
            Some((fault, msg)) => Err(VsphereError::fault(fault, msg)),
            None => Ok(()),
        }
    }

    async fn destroy(&self, entity: &MoRef) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("Destroy_Task", |st| {
            st.vms.remove(&entity.value);
            st.objects.retain(|(_, o)| o.moref != *entity);
            Ok(())
        })
    }

    async fn rename(&self, entity: &MoRef, new_name: &str) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("Rename_Task", |st| {
            if let Some((_, o)) = st.objects.iter_mut().find(|(_, o)| o.moref == *entity) {
                o.name = new_name.to_string();
            }
            if let Some(vm) = st.vms.get_mut(&entity.value) {
                vm.name = new_name.to_string();
            }
            Ok(())
        })
    }

    async fn reconfigure_vm(&self, vm: &MoRef, spec: &ConfigSpec) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("ReconfigVM_Task", |st| {
            let new_key = 9000 + st.next_id as i32;
            let props = st.vm(vm)?;
            if let Some(cpus) = spec.num_cpus {
                props.num_cpu = cpus;
            }
            if let Some(mb) = spec.memory_mb {
                props.memory_mb = mb;
            }
            for change in &spec.device_change {
                apply_device_change(&mut props.devices, change, new_key);
            }
            Ok(())
        })
    }

    async fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        _memory: bool,
        _quiesce: bool,
    ) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("CreateSnapshot_Task", |st| {
            let id = st.id("snapshot");
            st.vm(vm)?.root_snapshots.get_or_insert_with(Vec::new).push(SnapshotTree {
                snapshot: MoRef::new("VirtualMachineSnapshot", id),
                name: name.to_string(),
                description: Some(description.to_string()),
                create_time: Utc.with_ymd_and_hms(2024, 6, 2, 22, 0, 0).unwrap(),
            });
            Ok(())
        })
    }

    async fn revert_to_snapshot(&self, _snapshot: &MoRef) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("RevertToSnapshot_Task", |_| Ok(()))
    }

    async fn remove_snapshot(&self, snapshot: &MoRef, _remove_children: bool) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("RemoveSnapshot_Task", |st| {
            for vm in st.vms.values_mut() {
                if let Some(roots) = vm.root_snapshots.as_mut() {
                    roots.retain(|s| s.snapshot != *snapshot);
                }
            }
            Ok(())
        })
    }

    async fn set_custom_value(&self, entity: &MoRef, key: &str, value: &str) -> VsphereResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("setCustomValue:{key}"));
        if let Some((fault, msg)) = st.take_fault("setCustomValue") {
            return Err(VsphereError::fault(fault, msg));
        }
        let field = st
            .fields
            .iter()
            .find(|f| f.name == key)
            .map(|f| f.key)
            .ok_or_else(|| VsphereError::fault("InvalidArgument", format!("no field {key}")))?;
        let vm = st.vm(entity)?;
        vm.custom_values.retain(|cv| cv.key != field);
        vm.custom_values.push(CustomValue { key: field, value: value.to_string() });
        Ok(())
    }

    async fn custom_field_definitions(&self) -> VsphereResult<Vec<CustomFieldDef>> {
        Ok(self.state.lock().unwrap().fields.clone())
    }

    async fn portgroup_binding(&self, portgroup: &MoRef) -> VsphereResult<PortgroupBinding> {
        let st = self.state.lock().unwrap();
        st.portgroups
            .get(&portgroup.value)
            .cloned()
            .ok_or_else(|| VsphereError::not_found("portgroup"))
    }

    async fn add_portgroup(&self, switch: &MoRef, spec: &PortgroupSpec) -> VsphereResult<MoRef> {
        let mut st = self.state.lock().unwrap();
        st.task("AddDVPortgroup_Task", |st| {
            let id = st.id("dvportgroup");
            st.objects.push((
                ObjectKind::DistributedPortgroup,
                ManagedObject {
                    moref: MoRef::new("DistributedVirtualPortgroup", id.clone()),
                    name: spec.name.clone(),
                },
            ));
            st.portgroups.insert(
                id.clone(),
                PortgroupBinding { key: id, switch: switch.clone() },
            );
            Ok(())
        })
    }

    async fn fetch_ports(&self, switch: &MoRef, criteria: &PortCriteria) -> VsphereResult<Vec<DistributedPort>> {
        let st = self.state.lock().unwrap();
        let uuid = st.switch_uuid.get(&switch.value).cloned().unwrap_or_default();
        Ok(st
            .ports
            .iter()
            .filter(|(p, _)| p.dvs_uuid == uuid)
            .filter(|(_, connected)| criteria.connected.map_or(true, |c| c == *connected))
            .filter(|(p, _)| {
                criteria.portgroup_keys.is_empty()
                    || p.portgroup_key.as_ref().is_some_and(|k| criteria.portgroup_keys.contains(k))
            })
            .filter(|(p, _)| criteria.port_keys.is_empty() || criteria.port_keys.contains(&p.key))
            .map(|(p, _)| p.clone())
            .collect())
    }
}
