//! Shared state threaded through the build pipeline.
//!
//! Keys form a closed enumeration and every value is a tagged union whose
//! variant determines its key, so a value can never be stored under the wrong
//! key. Presence of a created-resource key (`VmId`) is what cleanup uses to
//! decide whether a compensating action is needed, so there is no removal
//! primitive.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::types::{ClusterId, DiskId, Error, Result, TemplateId, VmId};

/// Keys understood by the shared state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    ClusterId,
    TemplateId,
    VmId,
    DiskId,
    Error,
}

impl StateKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::ClusterId => "cluster_id",
            StateKey::TemplateId => "template_id",
            StateKey::VmId => "vm_id",
            StateKey::DiskId => "disk_id",
            StateKey::Error => "error",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held in the shared state.
#[derive(Debug)]
pub enum StateValue {
    Cluster(ClusterId),
    Template(TemplateId),
    Vm(VmId),
    Disk(DiskId),
    Error(Error),
}

impl StateValue {
    /// The key this value is stored under.
    pub fn key(&self) -> StateKey {
        match self {
            StateValue::Cluster(_) => StateKey::ClusterId,
            StateValue::Template(_) => StateKey::TemplateId,
            StateValue::Vm(_) => StateKey::VmId,
            StateValue::Disk(_) => StateKey::DiskId,
            StateValue::Error(_) => StateKey::Error,
        }
    }
}

impl From<ClusterId> for StateValue {
    fn from(id: ClusterId) -> Self {
        StateValue::Cluster(id)
    }
}

impl From<TemplateId> for StateValue {
    fn from(id: TemplateId) -> Self {
        StateValue::Template(id)
    }
}

impl From<VmId> for StateValue {
    fn from(id: VmId) -> Self {
        StateValue::Vm(id)
    }
}

impl From<DiskId> for StateValue {
    fn from(id: DiskId) -> Self {
        StateValue::Disk(id)
    }
}

/// Per-build key/value store. Lives for exactly one build and is never persisted.
#[derive(Debug, Default)]
pub struct SharedState {
    entries: HashMap<StateKey, StateValue>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value under its own key.
    ///
    /// Errors must go through [`SharedState::record_error`] so the first
    /// failure is never overwritten.
    pub fn put(&mut self, value: impl Into<StateValue>) {
        let value = value.into();
        if let StateValue::Error(err) = value {
            self.record_error(err);
            return;
        }
        self.entries.insert(value.key(), value);
    }

    /// Required lookup.
    pub fn get(&self, key: StateKey) -> Result<&StateValue> {
        self.entries.get(&key).ok_or(Error::MissingKey(key))
    }

    /// Optional lookup.
    pub fn get_ok(&self, key: StateKey) -> Option<&StateValue> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.entries.contains_key(&key)
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn cluster_id(&self) -> Option<&ClusterId> {
        match self.entries.get(&StateKey::ClusterId) {
            Some(StateValue::Cluster(id)) => Some(id),
            _ => None,
        }
    }

    pub fn template_id(&self) -> Option<&TemplateId> {
        match self.entries.get(&StateKey::TemplateId) {
            Some(StateValue::Template(id)) => Some(id),
            _ => None,
        }
    }

    pub fn vm_id(&self) -> Option<&VmId> {
        match self.entries.get(&StateKey::VmId) {
            Some(StateValue::Vm(id)) => Some(id),
            _ => None,
        }
    }

    pub fn disk_id(&self) -> Option<&DiskId> {
        match self.entries.get(&StateKey::DiskId) {
            Some(StateValue::Disk(id)) => Some(id),
            _ => None,
        }
    }

    pub fn require_cluster_id(&self) -> Result<&ClusterId> {
        self.cluster_id()
            .ok_or_else(|| self.absent_or_mistyped(StateKey::ClusterId))
    }

    pub fn require_template_id(&self) -> Result<&TemplateId> {
        self.template_id()
            .ok_or_else(|| self.absent_or_mistyped(StateKey::TemplateId))
    }

    pub fn require_vm_id(&self) -> Result<&VmId> {
        self.vm_id()
            .ok_or_else(|| self.absent_or_mistyped(StateKey::VmId))
    }

    pub fn require_disk_id(&self) -> Result<&DiskId> {
        self.disk_id()
            .ok_or_else(|| self.absent_or_mistyped(StateKey::DiskId))
    }

    fn absent_or_mistyped(&self, key: StateKey) -> Error {
        match self.entries.get(&key) {
            Some(other) => Error::internal(format!(
                "state key {} holds a {} value",
                key,
                other.key()
            )),
            None => Error::MissingKey(key),
        }
    }

    // =========================================================================
    // Terminal error
    // =========================================================================

    /// Record the build's failure. Only the first error is kept; later ones
    /// are logged and dropped. Returns whether this error was stored.
    pub fn record_error(&mut self, err: Error) -> bool {
        if let Some(StateValue::Error(existing)) = self.entries.get(&StateKey::Error) {
            tracing::debug!(
                "state_error_ignored: existing={}, dropped={}",
                existing,
                err
            );
            return false;
        }
        self.entries.insert(StateKey::Error, StateValue::Error(err));
        true
    }

    pub fn error(&self) -> Option<&Error> {
        match self.entries.get(&StateKey::Error) {
            Some(StateValue::Error(err)) => Some(err),
            _ => None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.entries.contains_key(&StateKey::Error)
    }

    /// Move the recorded error out, leaving the key absent.
    pub fn take_error(&mut self) -> Option<Error> {
        match self.entries.remove(&StateKey::Error) {
            Some(StateValue::Error(err)) => Some(err),
            Some(other) => {
                self.entries.insert(StateKey::Error, other);
                None
            }
            None => None,
        }
    }
}
