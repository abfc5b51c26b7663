//! Remote resource client - the seam between the pipeline and the hypervisor.
//!
//! Steps and the convergence poller only ever talk to [`ResourceClient`].
//! [`ovirt::OvirtClient`] implements it over the oVirt REST API; tests use
//! mocks or the scripted client from `crate::testing`.

pub mod ovirt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ClusterId, DiskId, Result, TemplateId, VmId};

/// Status vocabulary reported by the engine.
pub mod status {
    // VM
    pub const IMAGE_LOCKED: &str = "image_locked";
    pub const DOWN: &str = "down";
    pub const WAIT_FOR_LAUNCH: &str = "wait_for_launch";
    pub const POWERING_UP: &str = "powering_up";
    pub const UP: &str = "up";
    pub const POWERING_DOWN: &str = "powering_down";

    // Disk
    pub const LOCKED: &str = "locked";
    pub const OK: &str = "ok";

    // Disk attachment activity
    pub const ACTIVE: &str = "active";
    pub const INACTIVE: &str = "inactive";
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub cluster_id: ClusterId,
    pub template_id: TemplateId,
}

/// A disk attached to a VM. oVirt identifies the attachment by the disk id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub disk_id: DiskId,
    pub active: bool,
    pub bootable: bool,
}

/// Disk properties to change through its attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskProperties {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Static IPv4 configuration of the first NIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConfiguration {
    pub address: String,
    pub netmask: String,
    pub gateway: Option<String>,
}

/// First-boot initialization handed to cloud-init.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload {
    pub user_name: Option<String>,
    pub authorized_ssh_keys: Option<String>,
    pub host_name: Option<String>,
    pub nic: Option<NicConfiguration>,
}

impl InitPayload {
    pub fn is_empty(&self) -> bool {
        self == &InitPayload::default()
    }
}

/// Operations the build needs from the hypervisor.
///
/// Status queries return `Ok(None)` when the object is not visible (yet);
/// the engine has a read-after-write window right after creation. Every other
/// failure is an `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<ClusterId>>;

    async fn find_template(&self, name: &str, version: u32) -> Result<Option<TemplateId>>;

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmId>;

    async fn delete_vm(&self, vm_id: &VmId) -> Result<()>;

    async fn get_vm_status(&self, vm_id: &VmId) -> Result<Option<String>>;

    async fn list_disk_attachments(&self, vm_id: &VmId) -> Result<Vec<DiskAttachment>>;

    async fn update_disk_attachment(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
        properties: &DiskProperties,
    ) -> Result<()>;

    async fn set_disk_attachment_active(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
        active: bool,
    ) -> Result<()>;

    /// `active` or `inactive`.
    async fn get_disk_attachment_status(
        &self,
        vm_id: &VmId,
        disk_id: &DiskId,
    ) -> Result<Option<String>>;

    async fn get_disk_status(&self, disk_id: &DiskId) -> Result<Option<String>>;

    async fn detach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<()>;

    async fn start_vm(&self, vm_id: &VmId, init: &InitPayload) -> Result<()>;

    async fn stop_vm(&self, vm_id: &VmId) -> Result<()>;

    async fn delete_disk(&self, disk_id: &DiskId) -> Result<()>;
}
