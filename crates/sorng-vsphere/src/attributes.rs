//! Custom attributes on VMs (the `CustomFieldsManager` values).

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::inventory::find;
use crate::task::{settle, settle_opt};
use crate::types::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The attribute set the provisioning workflow stamps on every VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAttributes {
    pub bl_name: Option<String>,
    pub cdm: Option<String>,
    pub category: Option<String>,
    pub maintenance_window: Option<String>,
    pub patch_week: Option<String>,
}

impl CustomAttributes {
    /// Field name / value pairs in write order, skipping unset values.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let bl_name = self.bl_name.as_ref().map(|bl| {
            let bl = bl.to_lowercase();
            format!("{bl}.{bl}")
        });
        [
            ("BLName", bl_name),
            ("CDM", self.cdm.clone()),
            ("Category", self.category.clone()),
            ("Maint.Window", self.maintenance_window.clone()),
            ("PatchWeek", self.patch_week.clone()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }
}

/// Map an entity's custom values to field names via the field catalog.
/// A value whose key is missing from the catalog is an error.
pub(crate) async fn resolve_custom_values(
    api: &dyn VimApi,
    values: &[CustomValue],
) -> VsphereResult<HashMap<String, String>> {
    if values.is_empty() {
        return Ok(HashMap::new());
    }
    let catalog: HashMap<i32, String> = api
        .custom_field_definitions()
        .await?
        .into_iter()
        .map(|def| (def.key, def.name))
        .collect();

    values
        .iter()
        .map(|cv| {
            catalog
                .get(&cv.key)
                .map(|name| (name.clone(), cv.value.clone()))
                .ok_or_else(|| VsphereError::not_found(format!("Custom field key {} is not defined", cv.key)))
        })
        .collect()
}

pub struct AttributeManager<'a> {
    api: &'a dyn VimApi,
}

impl<'a> AttributeManager<'a> {
    pub fn new(api: &'a dyn VimApi) -> Self {
        Self { api }
    }

    /// Write the attributes one by one. The first failure fails the call;
    /// values already written stay written.
    pub async fn set_vm_custom_attributes(&self, vm_name: &str, attrs: &CustomAttributes) -> bool {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            for (key, value) in attrs.fields() {
                log::debug!("Setting {key} on {vm_name}");
                self.api.set_custom_value(&vm.moref, key, &value).await?;
            }
            Ok(true)
        }
        .await;
        settle("set_vm_custom_attributes", result)
    }

    /// Custom attributes of a VM keyed by field name.
    pub async fn get_vm_custom_attributes(&self, vm_name: &str) -> Option<HashMap<String, String>> {
        let result: VsphereResult<_> = async {
            let vm = find(self.api, ObjectKind::VirtualMachine, vm_name).await?;
            let props = self.api.vm_properties(&vm.moref).await?;
            resolve_custom_values(self.api, &props.custom_values).await.map(Some)
        }
        .await;
        settle_opt("get_vm_custom_attributes", result)
    }
}
