//! Inventory lookup: container-view scans by object type and name,
//! plus the datacenter / cluster views.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::task::settle_opt;
use crate::types::*;

use serde::{Deserialize, Serialize};

/// First object whose name matches `name`, ignoring case.
pub fn find_by_name<'o>(objects: &'o [ManagedObject], name: &str) -> Option<&'o ManagedObject> {
    let wanted = name.to_lowercase();
    objects.iter().find(|o| o.name.to_lowercase() == wanted)
}

/// Scan `kind` and return the first case-insensitive name match.
pub(crate) async fn find(api: &dyn VimApi, kind: ObjectKind, name: &str) -> VsphereResult<ManagedObject> {
    let objects = api.list_objects(kind).await?;
    find_by_name(&objects, name)
        .cloned()
        .ok_or_else(|| VsphereError::not_found(format!("{} {name:?} not found", kind.vim_type())))
}

/// Inventory operations.
pub struct InventoryManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> InventoryManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    /// Every object of `kind` under the root folder, in view order.
    pub async fn list_objects(&self, kind: ObjectKind) -> Option<Vec<ManagedObject>> {
        settle_opt("list_objects", self.api.list_objects(kind).await.map(Some))
    }

    /// First object of `kind` named `name` (case-insensitive). No caching:
    /// each call rescans the inventory.
    pub async fn get_object(&self, kind: ObjectKind, name: &str) -> Option<ManagedObject> {
        settle_opt("get_object", find(self.api, kind, name).await.map(Some))
    }

    /// Names of the clusters in the first datacenter's host folder.
    pub async fn get_clusters(&self) -> Option<Vec<String>> {
        let result: VsphereResult<_> = async {
            let datacenters = self.api.list_objects(ObjectKind::Datacenter).await?;
            let dc = datacenters
                .first()
                .ok_or_else(|| VsphereError::not_found("No datacenter in inventory"))?;
            let clusters = self.api.datacenter_clusters(&dc.moref).await?;
            Ok(Some(clusters.into_iter().map(|c| c.name).collect()))
        }
        .await;
        settle_opt("get_clusters", result)
    }

    /// Capacity / demand / reservation figures for one cluster.
    pub async fn get_cluster_info(&self, name: &str) -> Option<ClusterInfo> {
        let result: VsphereResult<_> = async {
            let cluster = find(self.api, ObjectKind::Cluster, name).await?;
            let usage = self.api.cluster_usage(&cluster.moref).await?;
            Ok(Some(ClusterInfo::from(usage)))
        }
        .await;
        settle_opt("get_cluster_info", result)
    }
}

/// Cluster usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "TotalClusterCPU")]
    pub total_cpu_mhz: i64,
    #[serde(rename = "TotalClusterMemory")]
    pub total_memory_mb: i64,
    #[serde(rename = "CPUInUse")]
    pub cpu_in_use_mhz: i64,
    #[serde(rename = "MemoryInUse")]
    pub memory_in_use_mb: i64,
    #[serde(rename = "CPUReserved")]
    pub cpu_reserved_mhz: i64,
    #[serde(rename = "MemoryReserved")]
    pub memory_reserved_mb: i64,
}

impl From<ClusterUsage> for ClusterInfo {
    fn from(u: ClusterUsage) -> Self {
        Self {
            total_cpu_mhz: u.total_cpu_capacity_mhz,
            total_memory_mb: u.total_mem_capacity_mb,
            cpu_in_use_mhz: u.cpu_demand_mhz,
            memory_in_use_mb: u.mem_demand_mb,
            cpu_reserved_mhz: u.cpu_reservation_mhz,
            memory_reserved_mb: u.mem_reservation_mb,
        }
    }
}
