//! vim25 SOAP client with cookie-based session authentication.
//!
//! Communicates with vCenter / ESXi via `https://{host}:{port}/sdk`.
//! Connecting retrieves the `ServiceContent`, logs in through the session
//! manager and keeps the `Set-Cookie` value the server hands out; every
//! later call rides on that cookie.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::marshal::{self, ObjectContent};
use crate::types::*;
use crate::xml::{self, XmlNode, XmlWriter};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

const VM_PATHS: &[&str] = &[
    "name",
    "runtime.powerState",
    "config.hardware.numCPU",
    "config.hardware.memoryMB",
    "config.hardware.device",
    "config.guestFullName",
    "snapshot",
    "customValue",
];

/// Deepest folder nesting walked when looking for a datastore's datacenter.
const MAX_PARENT_DEPTH: usize = 32;

fn envelope(method: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenc="http://schemas.xmlsoap.org/soap/encoding/" "#,
            r#"xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            r#"<soapenv:Body><{method} xmlns="urn:vim25">{body}</{method}></soapenv:Body>"#,
            r#"</soapenv:Envelope>"#
        ),
        method = method,
        body = body
    )
}

/// Map a `soapenv:Fault` element to a crate error.
fn fault_error(fault: &XmlNode) -> VsphereError {
    let message = fault
        .child_text("faultstring")
        .unwrap_or("SOAP fault")
        .to_string();
    let fault_type = fault
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|f| match f.xsi_type() {
            Some(t) => t.to_string(),
            None => f.name.trim_end_matches("Fault").to_string(),
        })
        .unwrap_or_else(|| "MethodFault".to_string());

    match fault_type.as_str() {
        "InvalidLogin" | "NotAuthenticated" => VsphereError::auth(message),
        "ManagedObjectNotFound" => VsphereError::not_found(message),
        _ => VsphereError::fault(fault_type, message),
    }
}

fn returnval_moref(resp: &XmlNode, method: &str) -> VsphereResult<MoRef> {
    resp.child("returnval")
        .and_then(XmlNode::as_moref)
        .ok_or_else(|| VsphereError::parse(format!("{method} returned no object reference")))
}

/// Managed objects handed out by `RetrieveServiceContent`.
#[derive(Debug, Clone)]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: MoRef,
    pub session_manager: MoRef,
    pub custom_fields_manager: Option<MoRef>,
    pub api_version: Option<String>,
}

/// At most the first 500 characters of a response body.
fn body_excerpt(text: &str) -> String {
    text.chars().take(500).collect()
}

/// HTTP plumbing shared by every call.
struct Transport {
    client: Client,
    endpoint: String,
    soap_action: String,
    cookie: RwLock<Option<String>>,
}

impl Transport {
    fn capture_cookie(&self, resp: &Response) {
        if let Some(raw) = resp.headers().get(SET_COOKIE).and_then(|v| v.to_str().ok()) {
            if let Ok(mut slot) = self.cookie.write() {
                *slot = Some(raw.to_string());
            }
        }
    }

    /// POST one SOAP request and return the `{method}Response` element.
    async fn call(&self, method: &str, body: &str) -> VsphereResult<XmlNode> {
        log::debug!("vim25 {method}");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", self.soap_action.as_str())
            .body(envelope(method, body))
            .send()
            .await?;
        self.capture_cookie(&resp);

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            VsphereError::parse(format!("Failed to read {method} response body: {e}"))
        })?;

        // Faults arrive as 500 with a SOAP body; anything else non-2xx is transport-level.
        if !status.is_success() && status != StatusCode::INTERNAL_SERVER_ERROR {
            let code = status.as_u16();
            return Err(match status {
                StatusCode::UNAUTHORIZED => VsphereError::auth(format!("{method}: session rejected")),
                StatusCode::NOT_FOUND => VsphereError::not_found(format!("{method}: endpoint not found")),
                _ => VsphereError::api(
                    code,
                    format!("{method}: HTTP {code}: {}", body_excerpt(&text)),
                ),
            });
        }

        let root = xml::parse(&text)?;
        let body = root
            .child("Body")
            .ok_or_else(|| VsphereError::parse(format!("{method}: SOAP response without Body")))?;
        if let Some(fault) = body.child("Fault") {
            return Err(fault_error(fault));
        }
        let response_name = format!("{method}Response");
        body.child(&response_name)
            .cloned()
            .ok_or_else(|| VsphereError::parse(format!("{method}: missing {response_name}")))
    }
}

/// vim25 session.
pub struct SoapClient {
    transport: Transport,
    content: ServiceContent,
    config: VsphereConfig,
}

impl SoapClient {
    /// Retrieve the service content and log in.
    pub async fn connect(config: &VsphereConfig) -> VsphereResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VsphereError::connection(format!("Failed to build HTTP client: {e}")))?;

        let transport = Transport {
            client,
            endpoint: format!("https://{}:{}/sdk", config.host, config.port),
            soap_action: format!("urn:vim25/{}", config.api_version),
            cookie: RwLock::new(None),
        };

        let content = Self::retrieve_service_content(&transport).await?;
        let this = Self {
            transport,
            content,
            config: config.clone(),
        };
        this.login().await?;
        log::info!("Connected to {} as {}", this.config.host, this.config.username);
        Ok(this)
    }

    /// Current config.
    pub fn config(&self) -> &VsphereConfig {
        &self.config
    }

    pub fn service_content(&self) -> &ServiceContent {
        &self.content
    }

    // ── Session management ──────────────────────────────────────────

    async fn retrieve_service_content(transport: &Transport) -> VsphereResult<ServiceContent> {
        let mut w = XmlWriter::new();
        w.moref("_this", &MoRef::new("ServiceInstance", "ServiceInstance"));
        let resp = transport.call("RetrieveServiceContent", &w.finish()).await?;
        let rv = resp
            .child("returnval")
            .ok_or_else(|| VsphereError::parse("RetrieveServiceContent returned nothing"))?;

        let required = |name: &str| {
            rv.child(name)
                .and_then(XmlNode::as_moref)
                .ok_or_else(|| VsphereError::parse(format!("ServiceContent without {name}")))
        };

        Ok(ServiceContent {
            root_folder: required("rootFolder")?,
            property_collector: required("propertyCollector")?,
            view_manager: required("viewManager")?,
            session_manager: required("sessionManager")?,
            custom_fields_manager: rv.child("customFieldsManager").and_then(XmlNode::as_moref),
            api_version: rv
                .path(&["about", "apiVersion"])
                .map(|v| v.text.clone()),
        })
    }

    async fn login(&self) -> VsphereResult<()> {
        let mut w = XmlWriter::new();
        w.moref("_this", &self.content.session_manager)
            .text("userName", &self.config.username)
            .text("password", &self.config.password);
        self.transport.call("Login", &w.finish()).await?;
        Ok(())
    }

    // ── Property collector helpers ──────────────────────────────────

    /// `RetrievePropertiesEx` over `objects`, following continuation tokens.
    async fn retrieve(&self, objects: &[MoRef], paths: &[&str]) -> VsphereResult<Vec<ObjectContent>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let mut types: Vec<&str> = Vec::new();
        for obj in objects {
            if !types.contains(&obj.type_name.as_str()) {
                types.push(&obj.type_name);
            }
        }

        let mut w = XmlWriter::new();
        w.moref("_this", &self.content.property_collector);
        w.open("specSet");
        for t in &types {
            w.open("propSet").text("type", t);
            for p in paths {
                w.text("pathSet", p);
            }
            w.close("propSet");
        }
        for obj in objects {
            w.open("objectSet").moref("obj", obj).close("objectSet");
        }
        w.close("specSet");
        w.empty("options");

        let mut resp = self.transport.call("RetrievePropertiesEx", &w.finish()).await?;
        let mut out = Vec::new();
        loop {
            let Some(rv) = resp.child("returnval") else { break };
            for node in rv.children_named("objects") {
                out.push(ObjectContent::from_node(node)?);
            }
            let Some(token) = rv.child_text("token") else { break };

            let mut w = XmlWriter::new();
            w.moref("_this", &self.content.property_collector)
                .text("token", token);
            resp = self
                .transport
                .call("ContinueRetrievePropertiesEx", &w.finish())
                .await?;
        }
        Ok(out)
    }

    async fn retrieve_one(&self, obj: &MoRef, paths: &[&str]) -> VsphereResult<ObjectContent> {
        self.retrieve(std::slice::from_ref(obj), paths)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VsphereError::not_found(format!("Managed object {obj} not found")))
    }

    /// Names of `objects`, returned in the same order.
    async fn named(&self, objects: Vec<MoRef>) -> VsphereResult<Vec<ManagedObject>> {
        let contents = self.retrieve(&objects, &["name"]).await?;
        let mut names: HashMap<MoRef, String> = contents
            .into_iter()
            .map(|c| {
                let name = c.prop_text("name").unwrap_or_default().to_string();
                (c.obj, name)
            })
            .collect();
        Ok(objects
            .into_iter()
            .filter_map(|moref| {
                let name = names.remove(&moref)?;
                Some(ManagedObject { moref, name })
            })
            .collect())
    }

    fn morefs(node: Option<&XmlNode>) -> Vec<MoRef> {
        node.map(|n| n.children.iter().filter_map(XmlNode::as_moref).collect())
            .unwrap_or_default()
    }

    async fn call_task(&self, method: &str, body: String) -> VsphereResult<MoRef> {
        let resp = self.transport.call(method, &body).await?;
        returnval_moref(&resp, method)
    }

    fn this(target: &MoRef) -> XmlWriter {
        let mut w = XmlWriter::new();
        w.moref("_this", target);
        w
    }
}

#[async_trait]
impl VimApi for SoapClient {
    fn session_cookie(&self) -> Option<String> {
        self.transport.cookie.read().ok().and_then(|c| c.clone())
    }

    fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.task_poll_millis)
    }

    async fn logout(&self) -> VsphereResult<()> {
        let w = Self::this(&self.content.session_manager);
        self.transport.call("Logout", &w.finish()).await?;
        log::info!("Logged out of {}", self.config.host);
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind) -> VsphereResult<Vec<ManagedObject>> {
        let mut w = Self::this(&self.content.view_manager);
        w.moref("container", &self.content.root_folder)
            .text("type", kind.vim_type())
            .display("recursive", true);
        let view = returnval_moref(
            &self.transport.call("CreateContainerView", &w.finish()).await?,
            "CreateContainerView",
        )?;

        let members = self.retrieve_one(&view, &["view"]).await;

        let w = Self::this(&view);
        if let Err(e) = self.transport.call("DestroyView", &w.finish()).await {
            log::warn!("Failed to destroy container view {}: {e}", view.value);
        }

        let members = Self::morefs(members?.prop("view"));
        self.named(members).await
    }

    async fn vm_properties(&self, vm: &MoRef) -> VsphereResult<VmProperties> {
        let content = self.retrieve_one(vm, VM_PATHS).await?;
        marshal::decode_vm_properties(&content)
    }

    async fn vm_power_state(&self, vm: &MoRef) -> VsphereResult<PowerState> {
        let content = self.retrieve_one(vm, &["runtime.powerState"]).await?;
        Ok(PowerState::from_vim(
            content.prop_text("runtime.powerState").unwrap_or_default(),
        ))
    }

    async fn datastore_location(&self, datastore: &MoRef) -> VsphereResult<DatastoreLocation> {
        let ds = self.retrieve_one(datastore, &["name", "parent"]).await?;
        let datastore_name = ds.prop_text("name").unwrap_or_default().to_string();

        let mut current = ds.prop("parent").and_then(XmlNode::as_moref);
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(entity) = current else { break };
            if entity.type_name == "Datacenter" {
                let dc = self.retrieve_one(&entity, &["name"]).await?;
                return Ok(DatastoreLocation {
                    datastore_name,
                    datacenter_name: dc.prop_text("name").unwrap_or_default().to_string(),
                });
            }
            current = self
                .retrieve_one(&entity, &["parent"])
                .await?
                .prop("parent")
                .and_then(XmlNode::as_moref);
        }
        Err(VsphereError::not_found(format!(
            "No datacenter above datastore {datastore_name}"
        )))
    }

    async fn datacenter_clusters(&self, datacenter: &MoRef) -> VsphereResult<Vec<ManagedObject>> {
        let dc = self.retrieve_one(datacenter, &["hostFolder"]).await?;
        let folder = dc
            .prop("hostFolder")
            .and_then(XmlNode::as_moref)
            .ok_or_else(|| VsphereError::parse("Datacenter without hostFolder"))?;
        let children = self.retrieve_one(&folder, &["childEntity"]).await?;
        let clusters = Self::morefs(children.prop("childEntity"))
            .into_iter()
            .filter(|m| m.type_name == "ClusterComputeResource")
            .collect();
        self.named(clusters).await
    }

    async fn cluster_usage(&self, cluster: &MoRef) -> VsphereResult<ClusterUsage> {
        let content = self.retrieve_one(cluster, &["summary"]).await?;
        content
            .prop("summary")
            .and_then(|s| s.child("usageSummary"))
            .map(marshal::decode_cluster_usage)
            .ok_or_else(|| VsphereError::not_found(format!("No usage summary for {cluster}")))
    }

    async fn task_info(&self, task: &MoRef) -> VsphereResult<TaskInfo> {
        let content = self.retrieve_one(task, &["info.state", "info.error"]).await?;
        marshal::decode_task_info(&content)
    }

    async fn power_on_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        self.call_task("PowerOnVM_Task", Self::this(vm).finish()).await
    }

    async fn power_off_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        self.call_task("PowerOffVM_Task", Self::this(vm).finish()).await
    }

    async fn reset_vm(&self, vm: &MoRef) -> VsphereResult<MoRef> {
        self.call_task("ResetVM_Task", Self::this(vm).finish()).await
    }

    async fn reboot_guest(&self, vm: &MoRef) -> VsphereResult<()> {
        self.transport
            .call("RebootGuest", &Self::this(vm).finish())
            .await?;
        Ok(())
    }

    async fn destroy(&self, entity: &MoRef) -> VsphereResult<MoRef> {
        self.call_task("Destroy_Task", Self::this(entity).finish()).await
    }

    async fn rename(&self, entity: &MoRef, new_name: &str) -> VsphereResult<MoRef> {
        let mut w = Self::this(entity);
        w.text("newName", new_name);
        self.call_task("Rename_Task", w.finish()).await
    }

    async fn reconfigure_vm(&self, vm: &MoRef, spec: &ConfigSpec) -> VsphereResult<MoRef> {
        let mut w = Self::this(vm);
        marshal::write_config_spec(&mut w, "spec", spec);
        self.call_task("ReconfigVM_Task", w.finish()).await
    }

    async fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        memory: bool,
        quiesce: bool,
    ) -> VsphereResult<MoRef> {
        let mut w = Self::this(vm);
        w.text("name", name)
            .text("description", description)
            .display("memory", memory)
            .display("quiesce", quiesce);
        self.call_task("CreateSnapshot_Task", w.finish()).await
    }

    async fn revert_to_snapshot(&self, snapshot: &MoRef) -> VsphereResult<MoRef> {
        self.call_task("RevertToSnapshot_Task", Self::this(snapshot).finish())
            .await
    }

    async fn remove_snapshot(&self, snapshot: &MoRef, remove_children: bool) -> VsphereResult<MoRef> {
        let mut w = Self::this(snapshot);
        w.display("removeChildren", remove_children);
        self.call_task("RemoveSnapshot_Task", w.finish()).await
    }

    async fn set_custom_value(&self, entity: &MoRef, key: &str, value: &str) -> VsphereResult<()> {
        let mut w = Self::this(entity);
        w.text("key", key).text("value", value);
        self.transport.call("setCustomValue", &w.finish()).await?;
        Ok(())
    }

    async fn custom_field_definitions(&self) -> VsphereResult<Vec<CustomFieldDef>> {
        let Some(manager) = &self.content.custom_fields_manager else {
            return Ok(Vec::new());
        };
        let content = self.retrieve_one(manager, &["field"]).await?;
        Ok(content
            .prop("field")
            .map(marshal::decode_custom_field_defs)
            .unwrap_or_default())
    }

    async fn portgroup_binding(&self, portgroup: &MoRef) -> VsphereResult<PortgroupBinding> {
        let content = self
            .retrieve_one(portgroup, &["key", "config.distributedVirtualSwitch"])
            .await?;
        Ok(PortgroupBinding {
            key: content
                .prop_text("key")
                .ok_or_else(|| VsphereError::parse("Port group without key"))?
                .to_string(),
            switch: content
                .prop("config.distributedVirtualSwitch")
                .and_then(XmlNode::as_moref)
                .ok_or_else(|| VsphereError::parse("Port group without distributed switch"))?,
        })
    }

    async fn add_portgroup(&self, switch: &MoRef, spec: &PortgroupSpec) -> VsphereResult<MoRef> {
        let mut w = Self::this(switch);
        marshal::write_portgroup_spec(&mut w, "spec", spec);
        self.call_task("AddDVPortgroup_Task", w.finish()).await
    }

    async fn fetch_ports(&self, switch: &MoRef, criteria: &PortCriteria) -> VsphereResult<Vec<DistributedPort>> {
        let mut w = Self::this(switch);
        marshal::write_port_criteria(&mut w, "criteria", criteria);
        let resp = self.transport.call("FetchDVPorts", &w.finish()).await?;
        Ok(resp
            .children_named("returnval")
            .filter_map(marshal::decode_port)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VsphereErrorKind;

    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::Router;

    async fn serve_sdk(status: AxumStatus, body: String) -> Transport {
        let app = Router::new().route("/sdk", post(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Transport {
            client: Client::new(),
            endpoint: format!("http://{addr}/sdk"),
            soap_action: "urn:vim25/7.0.3.0".into(),
            cookie: RwLock::new(None),
        }
    }

    #[test]
    fn body_excerpt_cuts_on_char_boundary() {
        let text = format!("{}é…", "a".repeat(499));
        let excerpt = body_excerpt(&text);
        assert_eq!(excerpt.chars().count(), 500);
        assert!(excerpt.ends_with('é'));
        assert_eq!(body_excerpt("short"), "short");
    }

    #[tokio::test]
    async fn non_ascii_error_body_becomes_api_error() {
        let transport = serve_sdk(AxumStatus::FORBIDDEN, format!("{}é…", "a".repeat(499))).await;

        let err = transport.call("PowerOnVM_Task", "").await.unwrap_err();
        assert_eq!(err.kind, VsphereErrorKind::ApiError(403));
        assert!(err.message.ends_with('é'));
    }

    #[test]
    fn envelope_wraps_body_in_vim25_namespace() {
        let env = envelope("Logout", r#"<_this type="SessionManager">SessionManager</_this>"#);
        assert!(env.contains(r#"<Logout xmlns="urn:vim25"><_this type="SessionManager">SessionManager</_this></Logout>"#));
        assert!(env.contains(r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#));
    }

    fn body_fault(detail: &str) -> XmlNode {
        let doc = format!(
            r#"<soapenv:Fault xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                <faultcode>ServerFaultCode</faultcode>
                <faultstring>Cannot complete login due to an incorrect user name or password.</faultstring>
                <detail>{detail}</detail>
            </soapenv:Fault>"#
        );
        xml::parse(&doc).unwrap()
    }

    #[test]
    fn invalid_login_fault_is_auth_error() {
        let err = fault_error(&body_fault(r#"<InvalidLoginFault xsi:type="InvalidLogin"/>"#));
        assert_eq!(err.kind, VsphereErrorKind::AuthenticationError);
    }

    #[test]
    fn other_faults_keep_their_type() {
        let err = fault_error(&body_fault(r#"<CpuHotPlugNotSupportedFault/>"#));
        assert!(err.is_fault("CpuHotPlugNotSupported"));
    }
}
