//! Virtual disks and CD/DVD drives.
//!
//! Every change is a single-device `ReconfigVM_Task`.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereErrorKind, VsphereResult};
use crate::inventory::find;
use crate::task::{execute_task, settle, settle_opt};
use crate::types::*;

use serde::{Deserialize, Serialize};

const KB_PER_GB: i64 = 1024 * 1024;

/// Type name of the drives created by [`StorageManager::attach_cdrom_to_vm`].
pub const CDROM_TYPE: &str = "VirtualCdrom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "Label")]
    pub label: Option<String>,
    #[serde(rename = "CapacityGB")]
    pub capacity_gb: f64,
    #[serde(rename = "UnitNumber")]
    pub unit_number: Option<i32>,
    /// Key of the controller the disk hangs off
    #[serde(rename = "BusNumber")]
    pub bus_number: Option<i32>,
}

impl DiskInfo {
    fn from_device(device: &VirtualDevice) -> Option<Self> {
        let capacity_kb = device.capacity_kb()?;
        Some(Self {
            label: device.label.clone(),
            capacity_gb: capacity_kb as f64 / KB_PER_GB as f64,
            unit_number: device.unit_number,
            bus_number: device.controller_key,
        })
    }
}

/// Device change adding a thick, persistent disk of `size_gb` to the
/// first SCSI controller, on the unit after the existing disks.
pub fn new_disk_change(devices: &[VirtualDevice], size_gb: i64) -> VsphereResult<DeviceChange> {
    let controller = devices
        .iter()
        .find(|d| d.is_scsi_controller())
        .ok_or_else(|| VsphereError::not_found("VM has no SCSI controller"))?;
    let disk_count = devices.iter().filter(|d| d.is_disk()).count() as i32;

    Ok(DeviceChange {
        operation: DeviceOperation::Add,
        file_operation: Some(FileOperation::Create),
        device: VirtualDevice {
            type_name: "VirtualDisk".into(),
            key: -1,
            label: None,
            controller_key: Some(controller.key),
            unit_number: Some(disk_count + 1),
            connectable: None,
            backing: Some(DeviceBacking::DiskFlat {
                file_name: String::new(),
                disk_mode: "persistent".into(),
                thin_provisioned: Some(false),
            }),
            kind: DeviceKind::Disk { capacity_kb: size_gb * KB_PER_GB },
        },
    })
}

/// Edit of an existing CD/DVD drive: ISO backed and connected when
/// `iso_path` is given, otherwise detached to a remote passthrough.
pub fn cdrom_edit(drive: &VirtualDevice, iso_path: Option<&str>) -> DeviceChange {
    let backing = match iso_path {
        Some(path) => DeviceBacking::Iso { file_name: path.to_string() },
        None => DeviceBacking::RemotePassthrough {
            device_name: String::new(),
            exclusive: false,
        },
    };
    DeviceChange {
        operation: DeviceOperation::Edit,
        file_operation: None,
        device: VirtualDevice {
            type_name: CDROM_TYPE.into(),
            key: drive.key,
            label: None,
            controller_key: drive.controller_key,
            unit_number: None,
            connectable: Some(ConnectInfo {
                start_connected: iso_path.is_some(),
                allow_guest_control: true,
                connected: iso_path.is_some(),
                status: None,
            }),
            backing: Some(backing),
            kind: DeviceKind::Cdrom,
        },
    }
}

/// First IDE controller with a free slot (two devices per channel).
pub fn free_ide_controller(devices: &[VirtualDevice]) -> Option<&VirtualDevice> {
    devices.iter().find(|d| match &d.kind {
        DeviceKind::IdeController { devices } => devices.len() < 2,
        _ => false,
    })
}

fn datastore_path(datastore: &str, path: &str) -> String {
    format!("[{datastore}] {path}")
}

fn cdrom_label(number: u32) -> String {
    format!("CD/DVD drive {number}")
}

pub struct StorageManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> StorageManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    async fn vm_devices(&self, vm_name: &str) -> VsphereResult<(MoRef, Vec<VirtualDevice>)> {
        let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
        let props = self.api.vm_properties(&vm.moref).await?;
        Ok((vm.moref, props.devices))
    }

    async fn reconfigure(&self, vm: &MoRef, change: DeviceChange) -> VsphereResult<bool> {
        let spec = ConfigSpec::with_change(change);
        execute_task(self.api, self.api.reconfigure_vm(vm, &spec)).await
    }

    // ── Disks ───────────────────────────────────────────────────────

    pub async fn list_vm_hard_disks(&self, vm_name: &str) -> Option<Vec<DiskInfo>> {
        let result: VsphereResult<_> = async {
            let (_, devices) = self.vm_devices(vm_name).await?;
            Ok(Some(devices.iter().filter_map(DiskInfo::from_device).collect()))
        }
        .await;
        settle_opt("list_vm_hard_disks", result)
    }

    pub async fn add_disk(&self, vm_name: &str, size_gb: i64) -> bool {
        let result: VsphereResult<_> = async {
            let (vm, devices) = self.vm_devices(vm_name).await?;
            let change = new_disk_change(&devices, size_gb)?;
            log::info!("Adding {size_gb} GB disk to {vm_name}");
            self.reconfigure(&vm, change).await
        }
        .await;
        settle("add_disk", result)
    }

    /// Detach a disk by label and delete its backing file.
    pub async fn remove_disk(&self, vm_name: &str, disk_label: &str) -> bool {
        let result: VsphereResult<_> = async {
            let (vm, devices) = self.vm_devices(vm_name).await?;
            let Some(disk) = devices.into_iter().find(|d| d.is_disk() && d.has_label(disk_label)) else {
                log::warn!("remove_disk: no disk {disk_label:?} on {vm_name}");
                return Ok(false);
            };
            log::info!("Removing {disk_label} from {vm_name}");
            let change = DeviceChange {
                operation: DeviceOperation::Remove,
                file_operation: Some(FileOperation::Destroy),
                device: disk,
            };
            self.reconfigure(&vm, change).await
        }
        .await;
        settle("remove_disk", result)
    }

    /// Grow a disk to `size_gb`. Unlike the other operations a missing VM
    /// or disk is reported as an error.
    pub async fn extend_disk(&self, vm_name: &str, disk_label: &str, size_gb: i64) -> VsphereResult<bool> {
        let not_found =
            || VsphereError::not_found(format!("Failed to find virtual disk \"{disk_label}\" for VM \"{vm_name}\""));

        let (vm, devices) = match self.vm_devices(vm_name).await {
            Ok(found) => found,
            Err(e) if e.kind == VsphereErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e),
        };
        let mut disk = devices
            .into_iter()
            .find(|d| d.is_disk() && d.has_label(disk_label))
            .ok_or_else(not_found)?;

        disk.kind = DeviceKind::Disk { capacity_kb: size_gb * KB_PER_GB };
        log::info!("Extending {disk_label} of {vm_name} to {size_gb} GB");
        let change = DeviceChange {
            operation: DeviceOperation::Edit,
            file_operation: None,
            device: disk,
        };
        self.reconfigure(&vm, change).await
    }

    // ── CD/DVD ──────────────────────────────────────────────────────

    /// Mount `[datastore] iso_path` in drive `CD/DVD drive {cdrom_number}`.
    pub async fn attach_iso_to_vm(&self, vm_name: &str, cdrom_number: u32, datastore: &str, iso_path: &str) -> bool {
        let path = datastore_path(datastore, iso_path);
        settle(
            "attach_iso_to_vm",
            self.edit_cdrom(vm_name, cdrom_number, Some(&path)).await,
        )
    }

    /// Eject whatever is mounted in drive `CD/DVD drive {cdrom_number}`.
    pub async fn disconnect_cdrom(&self, vm_name: &str, cdrom_number: u32) -> bool {
        settle(
            "disconnect_cdrom",
            self.edit_cdrom(vm_name, cdrom_number, None).await,
        )
    }

    async fn edit_cdrom(&self, vm_name: &str, cdrom_number: u32, iso_path: Option<&str>) -> VsphereResult<bool> {
        let (vm, devices) = self.vm_devices(vm_name).await?;
        let label = cdrom_label(cdrom_number);
        let drive = devices
            .iter()
            .rfind(|d| d.is_cdrom() && d.has_label(&label))
            .ok_or_else(|| VsphereError::not_found(format!("No {label} on {vm_name}")))?;
        self.reconfigure(&vm, cdrom_edit(drive, iso_path)).await
    }

    /// Add a new ISO-backed drive on the first IDE controller with a free slot.
    pub async fn attach_cdrom_to_vm(&self, vm_name: &str, datastore: &str, iso_path: &str) -> bool {
        let result: VsphereResult<_> = async {
            let (vm, devices) = self.vm_devices(vm_name).await?;
            let controller = free_ide_controller(&devices)
                .ok_or_else(|| VsphereError::not_found(format!("No free IDE controller on {vm_name}")))?;

            let change = DeviceChange {
                operation: DeviceOperation::Add,
                file_operation: None,
                device: VirtualDevice {
                    type_name: CDROM_TYPE.into(),
                    key: -1,
                    label: None,
                    controller_key: Some(controller.key),
                    unit_number: None,
                    connectable: Some(ConnectInfo {
                        start_connected: true,
                        allow_guest_control: true,
                        connected: true,
                        status: None,
                    }),
                    backing: Some(DeviceBacking::Iso {
                        file_name: datastore_path(datastore, iso_path),
                    }),
                    kind: DeviceKind::Cdrom,
                },
            };
            log::info!("Adding CD/DVD drive to {vm_name} on controller {}", controller.key);
            self.reconfigure(&vm, change).await
        }
        .await;
        settle("attach_cdrom_to_vm", result)
    }
}
