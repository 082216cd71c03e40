//! VM lifecycle: power, reboot, delete, rename, resize and summaries.

use crate::api::VimApi;
use crate::attributes::resolve_custom_values;
use crate::error::VsphereResult;
use crate::inventory::find;
use crate::task::{execute_task, settle, settle_opt};
use crate::types::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fault raised by `ReconfigVM_Task` when vCPUs cannot change on a running VM.
pub const CPU_HOT_PLUG_NOT_SUPPORTED: &str = "CpuHotPlugNotSupported";

/// Summary of one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmMeta {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "PowerState")]
    pub power_state: PowerState,
    #[serde(rename = "CPU")]
    pub cpu: i32,
    /// Memory in GB (fractional)
    #[serde(rename = "RAM")]
    pub ram_gb: f64,
    #[serde(rename = "Attributes")]
    pub attributes: HashMap<String, String>,
}

pub struct VmManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> VmManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    /// Names of every VM in the inventory.
    pub async fn get_vms(&self) -> Option<Vec<String>> {
        let result = self.api.list_objects(ObjectKind::VirtualMachine).await;
        settle_opt(
            "get_vms",
            result.map(|vms| Some(vms.into_iter().map(|vm| vm.name).collect())),
        )
    }

    // ── Power ───────────────────────────────────────────────────────

    pub async fn power_on(&self, vm_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            self.set_power(&vm.moref, PowerState::PoweredOn).await
        }
        .await;
        settle("power_on", result)
    }

    pub async fn power_off(&self, vm_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            self.set_power(&vm.moref, PowerState::PoweredOff).await
        }
        .await;
        settle("power_off", result)
    }

    /// Reboot through the guest tools, falling back to a hard reset.
    pub async fn reboot(&self, vm_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            match self.api.reboot_guest(&vm.moref).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    log::info!("Guest reboot of {vm_name} failed ({e}), resetting");
                    execute_task(self.api, self.api.reset_vm(&vm.moref)).await
                }
            }
        }
        .await;
        settle("reboot", result)
    }

    /// Destroy a VM, powering it off first when it is running.
    pub async fn delete_vm(&self, vm_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            if self.api.vm_power_state(&vm.moref).await? == PowerState::PoweredOn
                && !self.set_power(&vm.moref, PowerState::PoweredOff).await?
            {
                return Ok(false);
            }
            log::info!("Destroying VM {vm_name}");
            execute_task(self.api, self.api.destroy(&vm.moref)).await
        }
        .await;
        settle("delete_vm", result)
    }

    /// Rename a VM. The new name is always stored upper-cased.
    pub async fn rename_vm(&self, vm_name: &str, new_name: &str) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            let new_name = new_name.to_uppercase();
            execute_task(self.api, self.api.rename(&vm.moref, &new_name)).await
        }
        .await;
        settle("rename_vm", result)
    }

    // ── Resize ──────────────────────────────────────────────────────

    /// Change the vCPU count and/or memory (GB).
    ///
    /// Downsizing a running VM powers it off first. A reconfiguration
    /// rejected with `CpuHotPlugNotSupported` on a running VM is retried
    /// once after powering off. A VM that was running is powered back on.
    pub async fn resize_vm(&self, vm_name: &str, cpu_count: Option<i32>, ram_gb: Option<i64>) -> bool {
        settle("resize_vm", self.resize(vm_name, cpu_count, ram_gb).await)
    }

    async fn resize(&self, vm_name: &str, cpu_count: Option<i32>, ram_gb: Option<i64>) -> VsphereResult<bool> {
        let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
        let props = self.api.vm_properties(&vm.moref).await?;
        let was_on = props.power_state == PowerState::PoweredOn;

        let current_ram_gb = props.memory_mb as f64 / 1024.0;
        let downsizing = cpu_count.is_some_and(|c| c < props.num_cpu)
            || ram_gb.is_some_and(|gb| (gb as f64) < current_ram_gb);

        let spec = ConfigSpec {
            num_cpus: cpu_count,
            memory_mb: ram_gb.map(|gb| gb * 1024),
            device_change: Vec::new(),
        };

        if downsizing && was_on {
            log::info!("Powering off {vm_name} before downsizing");
            if !self.set_power(&vm.moref, PowerState::PoweredOff).await? {
                return Ok(false);
            }
        }

        let applied = match execute_task(self.api, self.api.reconfigure_vm(&vm.moref, &spec)).await {
            Err(e) if e.is_fault(CPU_HOT_PLUG_NOT_SUPPORTED) => {
                if self.api.vm_power_state(&vm.moref).await? != PowerState::PoweredOn {
                    return Err(e);
                }
                log::info!("{vm_name} does not support CPU hot plug, powering off to resize");
                if !self.set_power(&vm.moref, PowerState::PoweredOff).await? {
                    return Ok(false);
                }
                execute_task(self.api, self.api.reconfigure_vm(&vm.moref, &spec)).await?
            }
            other => other?,
        };
        if !applied {
            return Ok(false);
        }

        if was_on && self.api.vm_power_state(&vm.moref).await? == PowerState::PoweredOff {
            return self.set_power(&vm.moref, PowerState::PoweredOn).await;
        }
        Ok(true)
    }

    // ── Summaries ───────────────────────────────────────────────────

    pub async fn get_vm_meta(&self, vm_name: &str) -> Option<VmMeta> {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            self.meta(&vm.moref).await.map(Some)
        }
        .await;
        settle_opt("get_vm_meta", result)
    }

    /// Summaries for several VMs, matching names exactly. `None` as soon as
    /// one name is missing.
    pub async fn get_vm_metas_by_name(&self, vm_names: &[&str]) -> Option<Vec<VmMeta>> {
        if vm_names.is_empty() {
            return Some(Vec::new());
        }
        let result: VsphereResult<_> = async {
            let vms = self.api.list_objects(ObjectKind::VirtualMachine).await?;
            let mut metas = Vec::with_capacity(vm_names.len());
            for name in vm_names {
                let Some(vm) = vms.iter().find(|vm| vm.name == *name) else {
                    log::warn!("get_vm_metas_by_name: VM {name:?} not found");
                    return Ok(None);
                };
                metas.push(self.meta(&vm.moref).await?);
            }
            Ok(Some(metas))
        }
        .await;
        settle_opt("get_vm_metas_by_name", result)
    }

    async fn meta(&self, vm: &MoRef) -> VsphereResult<VmMeta> {
        let props = self.api.vm_properties(vm).await?;
        let attributes = resolve_custom_values(self.api, &props.custom_values).await?;
        Ok(VmMeta {
            name: props.name,
            power_state: props.power_state,
            cpu: props.num_cpu,
            ram_gb: props.memory_mb as f64 / 1024.0,
            attributes,
        })
    }

    /// Drive `vm` to `target`; already being there counts as success
    /// and submits nothing.
    async fn set_power(&self, vm: &MoRef, target: PowerState) -> VsphereResult<bool> {
        if self.api.vm_power_state(vm).await? == target {
            return Ok(true);
        }
        log::info!("Changing power state of {} to {}", vm.value, target.as_vim());
        match target {
            PowerState::PoweredOn => execute_task(self.api, self.api.power_on_vm(vm)).await,
            _ => execute_task(self.api, self.api.power_off_vm(vm)).await,
        }
    }
}
