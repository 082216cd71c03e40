//! Distributed switch networking: port groups, free-port search and
//! wiring VM adapters to a port.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::inventory::find;
use crate::task::{execute_task, settle, settle_opt};
use crate::types::*;

/// Port count used when the caller does not ask for one.
pub const DEFAULT_NUM_PORTS: i32 = 8;

/// Spec for a new early-binding port group: promiscuous mode off, forged
/// transmits and MAC changes allowed.
pub fn portgroup_spec(name: &str, vlan_id: i32, num_ports: i32) -> PortgroupSpec {
    PortgroupSpec {
        name: name.to_string(),
        num_ports,
        vlan_id,
        binding: "earlyBinding".into(),
        allow_promiscuous: false,
        forged_transmits: true,
        mac_changes: true,
    }
}

/// Edit rewiring `nic` to `port`, keeping its identity and connect state.
pub fn nic_edit(nic: &VirtualDevice, port: &DistributedPort) -> DeviceChange {
    DeviceChange {
        operation: DeviceOperation::Edit,
        file_operation: None,
        device: VirtualDevice {
            type_name: nic.type_name.clone(),
            key: nic.key,
            label: None,
            controller_key: None,
            unit_number: None,
            connectable: nic.connectable.clone(),
            backing: Some(DeviceBacking::DistributedPort {
                port: PortConnection {
                    switch_uuid: port.dvs_uuid.clone(),
                    portgroup_key: port.portgroup_key.clone(),
                    port_key: Some(port.key.clone()),
                },
            }),
            kind: nic.kind.clone(),
        },
    }
}

pub struct NetworkManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> NetworkManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    /// Add a port group to the distributed switch `dvs_name`.
    /// `num_ports` defaults to [`DEFAULT_NUM_PORTS`].
    pub async fn create_portgroup(&self, name: &str, dvs_name: &str, vlan_id: i32, num_ports: Option<i32>) -> bool {
        let result: VsphereResult<_> = async {
            let dvs = find(self.api, ObjectKind::DistributedSwitch, dvs_name).await?;
            let spec = portgroup_spec(name, vlan_id, num_ports.unwrap_or(DEFAULT_NUM_PORTS));
            log::info!("Creating port group {name} (VLAN {vlan_id}) on {dvs_name}");
            execute_task(self.api, self.api.add_portgroup(&dvs.moref, &spec)).await
        }
        .await;
        settle("create_portgroup", result)
    }

    /// Key of the first unconnected port inside the port group.
    pub async fn search_port(&self, switch: &MoRef, portgroup_key: &str) -> Option<String> {
        settle_opt("search_port", self.free_port_key(switch, portgroup_key).await)
    }

    async fn free_port_key(&self, switch: &MoRef, portgroup_key: &str) -> VsphereResult<Option<String>> {
        let criteria = PortCriteria {
            connected: Some(false),
            inside: Some(true),
            portgroup_keys: vec![portgroup_key.to_string()],
            port_keys: Vec::new(),
        };
        let ports = self.api.fetch_ports(switch, &criteria).await?;
        Ok(ports.into_iter().next().map(|p| p.key))
    }

    /// A free port of the named port group, with its switch UUID and
    /// port group key filled in.
    pub async fn get_port_by_portgroup(&self, portgroup_name: &str) -> Option<DistributedPort> {
        settle_opt("get_port_by_portgroup", self.port_for(portgroup_name).await)
    }

    async fn port_for(&self, portgroup_name: &str) -> VsphereResult<Option<DistributedPort>> {
        let portgroup = find(self.api, ObjectKind::DistributedPortgroup, portgroup_name).await?;
        let binding = self.api.portgroup_binding(&portgroup.moref).await?;
        let Some(port_key) = self.free_port_key(&binding.switch, &binding.key).await? else {
            log::warn!("No free port in port group {portgroup_name}");
            return Ok(None);
        };
        let criteria = PortCriteria {
            port_keys: vec![port_key],
            ..PortCriteria::default()
        };
        let ports = self.api.fetch_ports(&binding.switch, &criteria).await?;
        Ok(ports.into_iter().next())
    }

    /// Wire `Network adapter {vm_port}` of a VM to a free port of the
    /// named port group.
    pub async fn attach_portgroup_to_vm(&self, vm_name: &str, portgroup_name: &str, vm_port: u32) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            let port = self
                .port_for(portgroup_name)
                .await?
                .ok_or_else(|| VsphereError::not_found(format!("No free port in {portgroup_name}")))?;

            let label = format!("Network adapter {vm_port}");
            let props = self.api.vm_properties(&vm.moref).await?;
            let nic = props
                .devices
                .iter()
                .rfind(|d| d.is_ethernet() && d.has_label(&label))
                .ok_or_else(|| VsphereError::not_found(format!("No {label} on {vm_name}")))?;

            log::info!("Attaching {label} of {vm_name} to {portgroup_name} port {}", port.key);
            let spec = ConfigSpec::with_change(nic_edit(nic, &port));
            execute_task(self.api, self.api.reconfigure_vm(&vm.moref, &spec)).await
        }
        .await;
        settle("attach_portgroup_to_vm", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockVimApi;

    fn switch() -> MoRef {
        MoRef::new("VmwareDistributedVirtualSwitch", "dvs-21")
    }

    fn port(key: &str) -> DistributedPort {
        DistributedPort {
            key: key.into(),
            dvs_uuid: "50 2a 6b".into(),
            portgroup_key: Some("dvportgroup-40".into()),
        }
    }

    #[test]
    fn portgroup_spec_defaults() {
        let spec = portgroup_spec("app-vlan-120", 120, DEFAULT_NUM_PORTS);
        assert_eq!(spec.num_ports, 8);
        assert_eq!(spec.binding, "earlyBinding");
        assert!(!spec.allow_promiscuous);
        assert!(spec.forged_transmits && spec.mac_changes);
    }

    #[test]
    fn nic_edit_keeps_identity() {
        let nic = VirtualDevice {
            type_name: "VirtualVmxnet3".into(),
            key: 4000,
            label: Some("Network adapter 1".into()),
            controller_key: Some(100),
            unit_number: Some(7),
            connectable: Some(ConnectInfo {
                start_connected: true,
                allow_guest_control: true,
                connected: true,
                status: Some("ok".into()),
            }),
            backing: None,
            kind: DeviceKind::Ethernet {
                mac_address: Some("00:50:56:aa:bb:cc".into()),
                wake_on_lan: Some(true),
            },
        };
        let change = nic_edit(&nic, &port("12"));
        assert_eq!(change.operation, DeviceOperation::Edit);
        assert_eq!(change.device.type_name, "VirtualVmxnet3");
        assert_eq!(change.device.key, 4000);
        assert_eq!(change.device.connectable, nic.connectable);
        assert_eq!(change.device.kind, nic.kind);
        assert_eq!(
            change.device.backing,
            Some(DeviceBacking::DistributedPort {
                port: PortConnection {
                    switch_uuid: "50 2a 6b".into(),
                    portgroup_key: Some("dvportgroup-40".into()),
                    port_key: Some("12".into()),
                },
            })
        );
    }

    #[tokio::test]
    async fn search_port_asks_for_free_ports_inside_the_group() {
        let mut api = MockVimApi::new();
        api.expect_fetch_ports()
            .withf(|_, c| {
                c.connected == Some(false) && c.inside == Some(true) && c.portgroup_keys == ["dvportgroup-40"]
            })
            .returning(|_, _| Ok(vec![port("12"), port("13")]));

        let net = NetworkManager::new(&api);
        assert_eq!(net.search_port(&switch(), "dvportgroup-40").await.as_deref(), Some("12"));
    }

    #[tokio::test]
    async fn full_group_has_no_port() {
        let mut api = MockVimApi::new();
        api.expect_list_objects().returning(|_| {
            Ok(vec![ManagedObject {
                moref: MoRef::new("DistributedVirtualPortgroup", "dvportgroup-40"),
                name: "app".into(),
            }])
        });
        api.expect_portgroup_binding().returning(|_| {
            Ok(PortgroupBinding {
                key: "dvportgroup-40".into(),
                switch: switch(),
            })
        });
        api.expect_fetch_ports().times(1).returning(|_, _| Ok(Vec::new()));

        assert!(NetworkManager::new(&api).get_port_by_portgroup("app").await.is_none());
    }
}
