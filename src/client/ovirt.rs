//! oVirt REST API client.
//!
//! Speaks the engine's JSON dialect (`Accept: application/json`, `Version: 4`)
//! with basic authentication. The engine encodes booleans and numbers as
//! strings in most responses, so wire types accept both forms.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::fmt;

use super::{DiskAttachment, DiskProperties, InitPayload, ResourceClient, VmSpec};
use crate::types::config::AccessConfig;
use crate::types::{ClusterId, DiskId, Error, Result, TemplateId, VmId};

// =============================================================================
// Wire types
// =============================================================================

/// A scalar the engine may send as a JSON string or as a native value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Str(s) => s.parse().ok(),
            Scalar::Int(_) => None,
        }
    }

    fn as_u32(&self) -> Option<u32> {
        match self {
            Scalar::Int(n) => u32::try_from(*n).ok(),
            Scalar::Str(s) => s.parse().ok(),
            Scalar::Bool(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClusterList {
    #[serde(default)]
    cluster: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    #[serde(default)]
    template: Vec<TemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    id: String,
    #[serde(default)]
    version: Option<TemplateVersion>,
}

#[derive(Debug, Deserialize)]
struct TemplateVersion {
    #[serde(default)]
    version_number: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentList {
    #[serde(default)]
    disk_attachment: Vec<AttachmentEntry>,
}

#[derive(Debug, Deserialize)]
struct AttachmentEntry {
    id: String,
    #[serde(default)]
    active: Option<Scalar>,
    #[serde(default)]
    bootable: Option<Scalar>,
    #[serde(default)]
    disk: Option<Link>,
}

impl AttachmentEntry {
    fn is_active(&self) -> bool {
        self.active.as_ref().and_then(Scalar::as_bool).unwrap_or(false)
    }

    fn into_attachment(self) -> Result<DiskAttachment> {
        let active = self.is_active();
        let bootable = self
            .bootable
            .as_ref()
            .and_then(Scalar::as_bool)
            .unwrap_or(false);
        let raw_id = self.disk.map(|link| link.id).unwrap_or(self.id);
        let disk_id = DiskId::from_string(raw_id).map_err(Error::remote)?;
        Ok(DiskAttachment {
            disk_id,
            active,
            bootable,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Fault {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// HTTP implementation of [`ResourceClient`]. One instance (and one
/// connection pool) is shared by every step of a build.
#[derive(Clone)]
pub struct OvirtClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

impl fmt::Debug for OvirtClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OvirtClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl OvirtClient {
    /// Build a client from validated access settings.
    pub fn new(access: &AccessConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(access.request_timeout)
            .danger_accept_invalid_certs(access.insecure_skip_tls_verify)
            .build()?;

        let client = Self {
            http,
            base: access.url()?,
            username: access.username.clone(),
            password: access.password.clone(),
        };
        tracing::info!("ovirt_client_ready: url={}", client.base);
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| Error::internal(format!("bad endpoint {}: {}", raw, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        tracing::debug!("ovirt_request: method={}, path={}", method, path);
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .header("Version", "4"))
    }

    /// Send and turn non-success statuses into `Error::Remote`.
    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(Self::fault(what, status, response).await)
    }

    async fn fault(what: &str, status: StatusCode, response: Response) -> Error {
        let body = response.text().await.unwrap_or_default();
        let fault: Fault = serde_json::from_str(&body).unwrap_or_default();
        let detail = match (fault.reason, fault.detail) {
            (Some(reason), Some(detail)) => format!("{} {}", reason, detail),
            (Some(reason), None) => reason,
            (None, Some(detail)) => detail,
            (None, None) => body,
        };
        Error::remote(format!("{} failed with {}: {}", what, status, detail.trim()))
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(what, request).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<Option<T>> {
        let response = self.request(Method::GET, path)?.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!("ovirt_not_visible: path={}", path);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::fault(what, status, response).await);
        }
        Ok(Some(response.json::<T>().await?))
    }
}

fn init_body(init: &InitPayload) -> serde_json::Value {
    let mut initialization = serde_json::Map::new();
    if let Some(user) = &init.user_name {
        initialization.insert("user_name".into(), json!(user));
    }
    if let Some(keys) = &init.authorized_ssh_keys {
        initialization.insert("authorized_ssh_keys".into(), json!(keys));
    }
    if let Some(host) = &init.host_name {
        initialization.insert("host_name".into(), json!(host));
    }
    if let Some(nic) = &init.nic {
        let mut ip = json!({ "address": nic.address, "netmask": nic.netmask });
        if let Some(gateway) = &nic.gateway {
            ip["gateway"] = json!(gateway);
        }
        initialization.insert(
            "nic_configurations".into(),
            json!({
                "nic_configuration": [{
                    "name": "eth0",
                    "boot_protocol": "static",
                    "on_boot": true,
                    "ip": ip,
                }]
            }),
        );
    }
    json!({
        "use_cloud_init": true,
        "vm": { "initialization": initialization },
    })
}

#[async_trait]
impl ResourceClient for OvirtClient {
    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<ClusterId>> {
        let request = self
            .request(Method::GET, "clusters")?
            .query(&[("search", format!("name={}", name))]);
        let list: ClusterList = self.get_json("Listing clusters", request).await?;

        for cluster in list.cluster {
            tracing::debug!("cluster_found: name={:?}, id={}", cluster.name, cluster.id);
            if cluster.name.as_deref() == Some(name) {
                return ClusterId::from_string(cluster.id)
                    .map(Some)
                    .map_err(Error::remote);
            }
        }
        Ok(None)
    }

    async fn find_template(&self, name: &str, version: u32) -> Result<Option<TemplateId>> {
        let request = self
            .request(Method::GET, "templates")?
            .query(&[("search", format!("name={}", name))]);
        let list: TemplateList = self.get_json("Searching templates", request).await?;

        let found = list.template.into_iter().find(|tp| {
            tp.version
                .as_ref()
                .and_then(|v| v.version_number.as_ref())
                .and_then(Scalar::as_u32)
                == Some(version)
        });
        match found {
            Some(tp) => TemplateId::from_string(tp.id).map(Some).map_err(Error::remote),
            None => Ok(None),
        }
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmId> {
        let body = json!({
            "name": spec.name,
            "cluster": { "id": spec.cluster_id.as_str() },
            "template": { "id": spec.template_id.as_str() },
        });
        let request = self.request(Method::POST, "vms")?.json(&body);
        let vm: StatusEntry = self.get_json("Creating virtual machine", request).await?;
        VmId::from_string(vm.id).map_err(Error::remote)
    }

    async fn delete_vm(&self, vm_id: &VmId) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("vms/{}", vm_id))?;
        self.send("Removing virtual machine", request).await?;
        Ok(())
    }

    async fn get_vm_status(&self, vm_id: &VmId) -> Result<Option<String>> {
        let vm: Option<StatusEntry> = self
            .get_optional("Reading virtual machine", &format!("vms/{}", vm_id))
            .await?;
        Ok(vm.and_then(|vm| vm.status))
    }

    async fn list_disk_attachments(&self, vm_id: &VmId) -> Result<Vec<DiskAttachment>> {
        let request = self.request(Method::GET, &format!("vms/{}/diskattachments", vm_id))?;
        let list: AttachmentList = self.get_json("Listing disks of VM", request).await?;
        list.disk_attachment
            .into_iter()
            .map(AttachmentEntry::into_attachment)
            .collect()
    }

    async fn update_disk_attachment(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
        properties: &DiskProperties,
    ) -> Result<()> {
        let mut disk = serde_json::Map::new();
        if let Some(name) = &properties.name {
            disk.insert("name".into(), json!(name));
        }
        if let Some(description) = &properties.description {
            disk.insert("description".into(), json!(description));
        }
        let request = self
            .request(
                Method::PUT,
                &format!("vms/{}/diskattachments/{}", vm_id, disk_id),
            )?
            .json(&json!({ "disk": disk }));
        self.send("Updating disk properties", request).await?;
        Ok(())
    }

    async fn set_disk_attachment_active(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
        active: bool,
    ) -> Result<()> {
        let request = self
            .request(
                Method::PUT,
                &format!("vms/{}/diskattachments/{}", vm_id, disk_id),
            )?
            .json(&json!({ "active": active }));
        self.send("Changing disk attachment activity", request).await?;
        Ok(())
    }

    async fn get_disk_attachment_status(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
    ) -> Result<Option<String>> {
        let attachment: Option<AttachmentEntry> = self
            .get_optional(
                "Reading disk attachment",
                &format!("vms/{}/diskattachments/{}", vm_id, disk_id),
            )
            .await?;
        Ok(attachment.map(|a| {
            if a.is_active() {
                super::status::ACTIVE.to_string()
            } else {
                super::status::INACTIVE.to_string()
            }
        }))
    }

    async fn get_disk_status(&self, disk_id: &DiskId) -> Result<Option<String>> {
        let disk: Option<StatusEntry> = self
            .get_optional("Reading disk", &format!("disks/{}", disk_id))
            .await?;
        Ok(disk.and_then(|d| d.status))
    }

    async fn detach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<()> {
        let request = self
            .request(
                Method::DELETE,
                &format!("vms/{}/diskattachments/{}", vm_id, disk_id),
            )?
            .query(&[("detach_only", "true")]);
        self.send("Detaching disk", request).await?;
        Ok(())
    }

    async fn start_vm(&self, vm_id: &VmId, init: &InitPayload) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("vms/{}/start", vm_id))?
            .json(&init_body(init));
        self.send("Starting VM", request).await?;
        Ok(())
    }

    async fn stop_vm(&self, vm_id: &VmId) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("vms/{}/stop", vm_id))?
            .json(&json!({}));
        self.send("Stopping VM", request).await?;
        Ok(())
    }

    async fn delete_disk(&self, disk_id: &DiskId) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("disks/{}", disk_id))?;
        self.send("Removing disk", request).await?;
        Ok(())
    }
}
