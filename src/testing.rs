//! In-memory doubles for pipeline tests.
//!
//! [`ScriptedClient`] plays back canned lookups and status sequences and logs
//! every call by operation name. [`RecordingSleeper`] records poll pauses
//! without waiting. [`RecordingUi`] captures progress output.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::client::{DiskAttachment, DiskProperties, InitPayload, ResourceClient, VmSpec};
use crate::poller::Sleeper;
use crate::types::{ClusterId, DiskId, Error, Result, TemplateId, VmId};
use crate::ui::Ui;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Sleeper
// =============================================================================

/// Records requested sleeps and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn count(&self) -> usize {
        lock(&self.sleeps).len()
    }

    pub fn total(&self) -> Duration {
        lock(&self.sleeps).iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

// =============================================================================
// UI
// =============================================================================

/// Kind of a captured UI line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLevel {
    Say,
    Message,
    Error,
}

/// Captures UI output in memory.
#[derive(Debug, Default)]
pub struct RecordingUi {
    lines: Mutex<Vec<(UiLevel, String)>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(UiLevel, String)> {
        lock(&self.lines).clone()
    }

    /// Messages reported through [`Ui::error`].
    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(level, _)| *level == UiLevel::Error)
            .map(|(_, msg)| msg)
            .collect()
    }
}

impl Ui for RecordingUi {
    fn say(&self, msg: &str) {
        lock(&self.lines).push((UiLevel::Say, msg.to_string()));
    }

    fn message(&self, msg: &str) {
        lock(&self.lines).push((UiLevel::Message, msg.to_string()));
    }

    fn error(&self, msg: &str) {
        lock(&self.lines).push((UiLevel::Error, msg.to_string()));
    }
}

// =============================================================================
// Client
// =============================================================================

/// Status sequence: each read consumes one entry, the last one sticks.
#[derive(Debug, Default)]
struct StatusScript(VecDeque<String>);

impl StatusScript {
    fn set(&mut self, statuses: &[&str]) {
        self.0 = statuses.iter().map(|s| s.to_string()).collect();
    }

    fn next(&mut self) -> Option<String> {
        if self.0.len() > 1 {
            self.0.pop_front()
        } else {
            self.0.front().cloned()
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    clusters: HashMap<String, ClusterId>,
    templates: HashMap<(String, u32), TemplateId>,
    vm: Option<VmId>,
    vm_statuses: StatusScript,
    attachments: Vec<DiskAttachment>,
    attachment_statuses: StatusScript,
    disk_statuses: StatusScript,
    failures: HashMap<String, String>,
    calls: Vec<String>,
    started_with: Option<InitPayload>,
    created: Option<VmSpec>,
    disk_updates: Vec<DiskProperties>,
}

/// Scripted [`ResourceClient`].
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<Script>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(self, name: &str, id: &str) -> Self {
        lock(&self.script)
            .clusters
            .insert(name.to_string(), ClusterId::must(id));
        self
    }

    pub fn with_template(self, name: &str, version: u32, id: &str) -> Self {
        lock(&self.script)
            .templates
            .insert((name.to_string(), version), TemplateId::must(id));
        self
    }

    /// Id returned by `create_vm`.
    pub fn with_vm(self, id: &str) -> Self {
        lock(&self.script).vm = Some(VmId::must(id));
        self
    }

    pub fn with_vm_statuses(self, statuses: &[&str]) -> Self {
        lock(&self.script).vm_statuses.set(statuses);
        self
    }

    /// Bootable attachment of disk `id`.
    pub fn with_disk(self, id: &str, active: bool) -> Self {
        self.with_attachment(id, active, true)
    }

    /// Attachments are listed in the order they were added.
    pub fn with_attachment(self, id: &str, active: bool, bootable: bool) -> Self {
        lock(&self.script).attachments.push(DiskAttachment {
            disk_id: DiskId::must(id),
            active,
            bootable,
        });
        self
    }

    pub fn with_disk_statuses(self, statuses: &[&str]) -> Self {
        lock(&self.script).disk_statuses.set(statuses);
        self
    }

    pub fn with_attachment_statuses(self, statuses: &[&str]) -> Self {
        lock(&self.script).attachment_statuses.set(statuses);
        self
    }

    /// Make `operation` fail with a remote error.
    pub fn fail_on(self, operation: &str, msg: &str) -> Self {
        lock(&self.script)
            .failures
            .insert(operation.to_string(), msg.to_string());
        self
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        lock(&self.script).calls.iter().any(|c| c == operation)
    }

    /// Operations that change remote state, in call order.
    pub fn mutations(&self) -> Vec<String> {
        const READS: &[&str] = &[
            "find_cluster_by_name",
            "find_template",
            "get_vm_status",
            "list_disk_attachments",
            "get_disk_attachment_status",
            "get_disk_status",
        ];
        self.calls()
            .into_iter()
            .filter(|c| !READS.contains(&c.as_str()))
            .collect()
    }

    pub fn started_with(&self) -> Option<InitPayload> {
        lock(&self.script).started_with.clone()
    }

    pub fn created(&self) -> Option<VmSpec> {
        lock(&self.script).created.clone()
    }

    pub fn disk_updates(&self) -> Vec<DiskProperties> {
        lock(&self.script).disk_updates.clone()
    }

    /// Log the call and apply any scripted failure.
    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, Script>> {
        let mut script = lock(&self.script);
        script.calls.push(operation.to_string());
        match script.failures.get(operation) {
            Some(msg) => Err(Error::remote(msg.clone())),
            None => Ok(script),
        }
    }
}

#[async_trait]
impl ResourceClient for ScriptedClient {
    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<ClusterId>> {
        let script = self.enter("find_cluster_by_name")?;
        Ok(script.clusters.get(name).cloned())
    }

    async fn find_template(&self, name: &str, version: u32) -> Result<Option<TemplateId>> {
        let script = self.enter("find_template")?;
        Ok(script.templates.get(&(name.to_string(), version)).cloned())
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmId> {
        let mut script = self.enter("create_vm")?;
        script.created = Some(spec.clone());
        script
            .vm
            .clone()
            .ok_or_else(|| Error::remote("no VM scripted"))
    }

    async fn delete_vm(&self, _vm_id: &VmId) -> Result<()> {
        self.enter("delete_vm")?;
        Ok(())
    }

    async fn get_vm_status(&self, _vm_id: &VmId) -> Result<Option<String>> {
        let mut script = self.enter("get_vm_status")?;
        Ok(script.vm_statuses.next())
    }

    async fn list_disk_attachments(&self, _vm_id: &VmId) -> Result<Vec<DiskAttachment>> {
        let script = self.enter("list_disk_attachments")?;
        Ok(script.attachments.clone())
    }

    async fn update_disk_attachment(
        &self,
        _vm_id: &VmId,
        _disk_id: &DiskId,
        properties: &DiskProperties,
    ) -> Result<()> {
        let mut script = self.enter("update_disk_attachment")?;
        script.disk_updates.push(properties.clone());
        Ok(())
    }

    async fn set_disk_attachment_active(
        &self,
        _vm_id: &VmId,
        disk_id: &DiskId,
        active: bool,
    ) -> Result<()> {
        let mut script = self.enter("set_disk_attachment_active")?;
        for attachment in script.attachments.iter_mut() {
            if &attachment.disk_id == disk_id {
                attachment.active = active;
            }
        }
        Ok(())
    }

    async fn get_disk_attachment_status(
        &self,
        _vm_id: &VmId,
        _disk_id: &DiskId,
    ) -> Result<Option<String>> {
        let mut script = self.enter("get_disk_attachment_status")?;
        Ok(script.attachment_statuses.next())
    }

    async fn get_disk_status(&self, _disk_id: &DiskId) -> Result<Option<String>> {
        let mut script = self.enter("get_disk_status")?;
        Ok(script.disk_statuses.next())
    }

    async fn detach_disk(&self, _vm_id: &VmId, _disk_id: &DiskId) -> Result<()> {
        self.enter("detach_disk")?;
        Ok(())
    }

    async fn start_vm(&self, _vm_id: &VmId, init: &InitPayload) -> Result<()> {
        let mut script = self.enter("start_vm")?;
        script.started_with = Some(init.clone());
        Ok(())
    }

    async fn stop_vm(&self, _vm_id: &VmId) -> Result<()> {
        self.enter("stop_vm")?;
        Ok(())
    }

    async fn delete_disk(&self, _disk_id: &DiskId) -> Result<()> {
        self.enter("delete_disk")?;
        Ok(())
    }
}
