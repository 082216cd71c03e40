//! vim25 data-object marshalling.
//!
//! Encoders write request parameters in schema order (vim25 rejects
//! out-of-order elements); decoders turn `RetrievePropertiesEx` property
//! values and method results into the crate's types.

use crate::error::{VsphereError, VsphereResult};
use crate::types::*;
use crate::xml::{XmlNode, XmlWriter};

use chrono::{DateTime, Utc};

const SCSI_CONTROLLERS: &[&str] = &[
    "VirtualSCSIController",
    "VirtualLsiLogicController",
    "VirtualLsiLogicSASController",
    "ParaVirtualSCSIController",
    "VirtualBusLogicController",
];

const ETHERNET_CARDS: &[&str] = &[
    "VirtualEthernetCard",
    "VirtualE1000",
    "VirtualE1000e",
    "VirtualPCNet32",
    "VirtualVmxnet",
    "VirtualVmxnet2",
    "VirtualVmxnet3",
    "VirtualVmxnet3Vrdma",
    "VirtualSriovEthernetCard",
];

// ── Encoding ────────────────────────────────────────────────────────

pub fn write_config_spec(w: &mut XmlWriter, tag: &str, spec: &ConfigSpec) {
    w.open(tag);
    w.opt_display("numCPUs", spec.num_cpus);
    w.opt_display("memoryMB", spec.memory_mb);
    for change in &spec.device_change {
        w.open("deviceChange");
        w.text("operation", change.operation.as_vim());
        if let Some(op) = change.file_operation {
            w.text("fileOperation", op.as_vim());
        }
        write_device(w, "device", &change.device);
        w.close("deviceChange");
    }
    w.close(tag);
}

fn write_bool(w: &mut XmlWriter, tag: &str, value: bool) {
    w.display(tag, value);
}

fn write_device(w: &mut XmlWriter, tag: &str, device: &VirtualDevice) {
    w.open_typed(tag, &device.type_name);
    w.display("key", device.key);
    if let Some(backing) = &device.backing {
        write_backing(w, backing);
    }
    if let Some(c) = &device.connectable {
        w.open("connectable");
        write_bool(w, "startConnected", c.start_connected);
        write_bool(w, "allowGuestControl", c.allow_guest_control);
        write_bool(w, "connected", c.connected);
        if let Some(status) = &c.status {
            w.text("status", status);
        }
        w.close("connectable");
    }
    w.opt_display("controllerKey", device.controller_key);
    w.opt_display("unitNumber", device.unit_number);
    match &device.kind {
        DeviceKind::Disk { capacity_kb } => {
            w.display("capacityInKB", capacity_kb);
        }
        DeviceKind::Ethernet { mac_address, wake_on_lan } => {
            if let Some(mac) = mac_address {
                w.text("macAddress", mac);
            }
            w.opt_display("wakeOnLanEnabled", *wake_on_lan);
        }
        _ => {}
    }
    w.close(tag);
}

fn write_backing(w: &mut XmlWriter, backing: &DeviceBacking) {
    match backing {
        DeviceBacking::DiskFlat { file_name, disk_mode, thin_provisioned } => {
            w.open_typed("backing", "VirtualDiskFlatVer2BackingInfo");
            w.text("fileName", file_name);
            w.text("diskMode", disk_mode);
            w.opt_display("thinProvisioned", *thin_provisioned);
            w.close("backing");
        }
        DeviceBacking::Iso { file_name } => {
            w.open_typed("backing", "VirtualCdromIsoBackingInfo");
            w.text("fileName", file_name);
            w.close("backing");
        }
        DeviceBacking::RemotePassthrough { device_name, exclusive } => {
            w.open_typed("backing", "VirtualCdromRemotePassthroughBackingInfo");
            w.text("deviceName", device_name);
            write_bool(w, "useAutoDetect", false);
            write_bool(w, "exclusive", *exclusive);
            w.close("backing");
        }
        DeviceBacking::DistributedPort { port } => {
            w.open_typed("backing", "VirtualEthernetCardDistributedVirtualPortBackingInfo");
            w.open("port");
            w.text("switchUuid", &port.switch_uuid);
            if let Some(key) = &port.portgroup_key {
                w.text("portgroupKey", key);
            }
            if let Some(key) = &port.port_key {
                w.text("portKey", key);
            }
            w.close("port");
            w.close("backing");
        }
        // Unmodelled backings are left for the server to keep.
        DeviceBacking::Other { .. } => {}
    }
}

fn write_bool_policy(w: &mut XmlWriter, tag: &str, value: bool) {
    w.open(tag);
    write_bool(w, "inherited", false);
    write_bool(w, "value", value);
    w.close(tag);
}

pub fn write_portgroup_spec(w: &mut XmlWriter, tag: &str, spec: &PortgroupSpec) {
    w.open(tag);
    w.text("name", &spec.name);
    w.display("numPorts", spec.num_ports);
    w.open_typed("defaultPortConfig", "VMwareDVSPortSetting");
    w.open_typed("vlan", "VmwareDistributedVirtualSwitchVlanIdSpec");
    write_bool(w, "inherited", false);
    w.display("vlanId", spec.vlan_id);
    w.close("vlan");
    w.open("securityPolicy");
    write_bool(w, "inherited", false);
    write_bool_policy(w, "allowPromiscuous", spec.allow_promiscuous);
    write_bool_policy(w, "macChanges", spec.mac_changes);
    write_bool_policy(w, "forgedTransmits", spec.forged_transmits);
    w.close("securityPolicy");
    w.close("defaultPortConfig");
    w.text("type", &spec.binding);
    w.close(tag);
}

pub fn write_port_criteria(w: &mut XmlWriter, tag: &str, criteria: &PortCriteria) {
    w.open(tag);
    w.opt_display("connected", criteria.connected);
    for key in &criteria.portgroup_keys {
        w.text("portgroupKey", key);
    }
    w.opt_display("inside", criteria.inside);
    for key in &criteria.port_keys {
        w.text("portKey", key);
    }
    w.close(tag);
}

// ── Decoding ────────────────────────────────────────────────────────

/// One `ObjectContent` of a property collector result.
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub obj: MoRef,
    pub props: Vec<(String, XmlNode)>,
}

impl ObjectContent {
    pub fn from_node(node: &XmlNode) -> VsphereResult<Self> {
        let obj = node
            .child("obj")
            .and_then(XmlNode::as_moref)
            .ok_or_else(|| VsphereError::parse("ObjectContent without obj"))?;
        let props = node
            .children_named("propSet")
            .filter_map(|p| Some((p.child_text("name")?.to_string(), p.child("val")?.clone())))
            .collect();
        Ok(Self { obj, props })
    }

    pub fn prop(&self, name: &str) -> Option<&XmlNode> {
        self.props.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn prop_text(&self, name: &str) -> Option<&str> {
        self.prop(name).map(|v| v.text.as_str())
    }

    pub fn prop_parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.prop_text(name).and_then(|t| t.trim().parse().ok())
    }
}

fn device_kind(type_name: &str, node: &XmlNode) -> DeviceKind {
    match type_name {
        "VirtualDisk" => {
            let capacity_kb = node
                .parse_child::<i64>("capacityInKB")
                .or_else(|| node.parse_child::<i64>("capacityInBytes").map(|b| b / 1024))
                .unwrap_or(0);
            DeviceKind::Disk { capacity_kb }
        }
        "VirtualCdrom" => DeviceKind::Cdrom,
        "VirtualIDEController" => DeviceKind::IdeController {
            devices: node
                .children_named("device")
                .filter_map(|d| d.text.trim().parse().ok())
                .collect(),
        },
        t if SCSI_CONTROLLERS.contains(&t) => DeviceKind::ScsiController {
            devices: node
                .children_named("device")
                .filter_map(|d| d.text.trim().parse().ok())
                .collect(),
        },
        t if ETHERNET_CARDS.contains(&t) => DeviceKind::Ethernet {
            mac_address: node.child_text("macAddress").map(str::to_string),
            wake_on_lan: node.parse_child("wakeOnLanEnabled"),
        },
        _ => DeviceKind::Other,
    }
}

fn decode_backing(node: &XmlNode) -> DeviceBacking {
    let vim_type = node.xsi_type().unwrap_or_default();
    match vim_type {
        "VirtualDiskFlatVer2BackingInfo" => DeviceBacking::DiskFlat {
            file_name: node.child_text("fileName").unwrap_or_default().to_string(),
            disk_mode: node.child_text("diskMode").unwrap_or("persistent").to_string(),
            thin_provisioned: node.parse_child("thinProvisioned"),
        },
        "VirtualCdromIsoBackingInfo" => DeviceBacking::Iso {
            file_name: node.child_text("fileName").unwrap_or_default().to_string(),
        },
        "VirtualCdromRemotePassthroughBackingInfo" => DeviceBacking::RemotePassthrough {
            device_name: node.child_text("deviceName").unwrap_or_default().to_string(),
            exclusive: node.parse_child("exclusive").unwrap_or(false),
        },
        "VirtualEthernetCardDistributedVirtualPortBackingInfo" => {
            let port = node.child("port");
            DeviceBacking::DistributedPort {
                port: PortConnection {
                    switch_uuid: port
                        .and_then(|p| p.child_text("switchUuid"))
                        .unwrap_or_default()
                        .to_string(),
                    portgroup_key: port
                        .and_then(|p| p.child_text("portgroupKey"))
                        .map(str::to_string),
                    port_key: port.and_then(|p| p.child_text("portKey")).map(str::to_string),
                },
            }
        }
        other => DeviceBacking::Other { vim_type: other.to_string() },
    }
}

fn decode_connect_info(node: &XmlNode) -> ConnectInfo {
    ConnectInfo {
        start_connected: node.parse_child("startConnected").unwrap_or(false),
        allow_guest_control: node.parse_child("allowGuestControl").unwrap_or(false),
        connected: node.parse_child("connected").unwrap_or(false),
        status: node.child_text("status").map(str::to_string),
    }
}

pub fn decode_device(node: &XmlNode) -> Option<VirtualDevice> {
    let type_name = node.xsi_type().unwrap_or(node.name.as_str()).to_string();
    let key = node.parse_child("key")?;
    Some(VirtualDevice {
        key,
        label: node
            .path(&["deviceInfo", "label"])
            .map(|l| l.text.clone()),
        controller_key: node.parse_child("controllerKey"),
        unit_number: node.parse_child("unitNumber"),
        connectable: node.child("connectable").map(decode_connect_info),
        backing: node.child("backing").map(decode_backing),
        kind: device_kind(&type_name, node),
        type_name,
    })
}

pub fn parse_timestamp(text: &str) -> VsphereResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VsphereError::parse(format!("Bad timestamp {text:?}: {e}")))
}

fn decode_snapshot_tree(node: &XmlNode) -> VsphereResult<SnapshotTree> {
    Ok(SnapshotTree {
        snapshot: node
            .child("snapshot")
            .and_then(XmlNode::as_moref)
            .ok_or_else(|| VsphereError::parse("Snapshot tree node without snapshot"))?,
        name: node.child_text("name").unwrap_or_default().to_string(),
        description: node.child_text("description").map(str::to_string),
        create_time: parse_timestamp(node.child_text("createTime").unwrap_or_default())?,
    })
}

pub fn decode_vm_properties(content: &ObjectContent) -> VsphereResult<VmProperties> {
    let devices = content
        .prop("config.hardware.device")
        .map(|v| v.children.iter().filter_map(decode_device).collect())
        .unwrap_or_default();

    let root_snapshots = match content.prop("snapshot") {
        Some(info) => Some(
            info.children_named("rootSnapshotList")
                .map(decode_snapshot_tree)
                .collect::<VsphereResult<Vec<_>>>()?,
        ),
        None => None,
    };

    let custom_values = content
        .prop("customValue")
        .map(|v| {
            v.children
                .iter()
                .filter_map(|cv| {
                    Some(CustomValue {
                        key: cv.parse_child("key")?,
                        value: cv.child_text("value").unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(VmProperties {
        name: content.prop_text("name").unwrap_or_default().to_string(),
        power_state: PowerState::from_vim(content.prop_text("runtime.powerState").unwrap_or_default()),
        num_cpu: content.prop_parse("config.hardware.numCPU").unwrap_or(0),
        memory_mb: content.prop_parse("config.hardware.memoryMB").unwrap_or(0),
        guest_full_name: content.prop_text("config.guestFullName").map(str::to_string),
        devices,
        root_snapshots,
        custom_values,
    })
}

pub fn decode_task_info(content: &ObjectContent) -> VsphereResult<TaskInfo> {
    let raw = content.prop_text("info.state").unwrap_or_default();
    let state = TaskState::from_vim(raw)
        .ok_or_else(|| VsphereError::parse(format!("Unknown task state {raw:?}")))?;
    let error = content.prop("info.error").map(|e| TaskFault {
        fault_type: e
            .child("fault")
            .and_then(|f| f.xsi_type().map(str::to_string))
            .unwrap_or_else(|| "MethodFault".to_string()),
        message: e.child_text("localizedMessage").unwrap_or_default().to_string(),
    });
    Ok(TaskInfo { state, error })
}

pub fn decode_custom_field_defs(node: &XmlNode) -> Vec<CustomFieldDef> {
    node.children
        .iter()
        .filter_map(|d| {
            Some(CustomFieldDef {
                key: d.parse_child("key")?,
                name: d.child_text("name")?.to_string(),
            })
        })
        .collect()
}

pub fn decode_cluster_usage(node: &XmlNode) -> ClusterUsage {
    let num = |name: &str| node.parse_child::<i64>(name).unwrap_or(0);
    ClusterUsage {
        total_cpu_capacity_mhz: num("totalCpuCapacityMhz"),
        total_mem_capacity_mb: num("totalMemCapacityMB"),
        cpu_demand_mhz: num("cpuDemandMhz"),
        mem_demand_mb: num("memDemandMB"),
        cpu_reservation_mhz: num("cpuReservationMhz"),
        mem_reservation_mb: num("memReservationMB"),
    }
}

pub fn decode_port(node: &XmlNode) -> Option<DistributedPort> {
    Some(DistributedPort {
        key: node.child_text("key")?.to_string(),
        dvs_uuid: node.child_text("dvsUuid").unwrap_or_default().to_string(),
        portgroup_key: node.child_text("portgroupKey").map(str::to_string),
    })
}
