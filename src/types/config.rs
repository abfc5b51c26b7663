//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and completed from environment
//! variables by [`BuildConfig::prepare`], which also fills defaults and
//! validates every section.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::types::Error;

/// Source types understood by the builder.
const VALID_SOURCE_TYPES: &[&str] = &["template"];

/// Complete configuration of one image build.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
pub struct BuildConfig {
    /// API endpoint and credentials.
    #[serde(default)]
    pub access: AccessConfig,

    /// Where the VM comes from.
    #[serde(default)]
    pub source: SourceConfig,

    /// VM naming and network settings.
    #[serde(default)]
    pub vm: VmConfig,

    /// Properties of the produced disk.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Credentials injected into the VM at first boot.
    #[serde(default)]
    pub communicator: CommunicatorConfig,

    /// Convergence polling behaviour.
    #[serde(default)]
    pub polling: PollingConfig,
}

/// oVirt API access configuration.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AccessConfig {
    /// Engine API URL, e.g. `https://engine.example.com/ovirt-engine/api`.
    pub ovirt_url: String,

    pub username: String,

    pub password: String,

    /// Skip TLS certificate verification.
    pub insecure_skip_tls_verify: bool,

    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub request_timeout: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            ovirt_url: String::new(),
            username: String::new(),
            password: String::new(),
            insecure_skip_tls_verify: false,
            request_timeout: Duration::from_secs(10),
        }
    }
}

// The password never reaches logs.
impl fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessConfig")
            .field("ovirt_url", &self.ovirt_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AccessConfig {
    /// Fill unset fields from the environment and validate.
    pub fn prepare(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Vec<String> {
        let mut errs = Vec::new();

        if self.ovirt_url.is_empty() {
            self.ovirt_url = env("OVIRT_URL").unwrap_or_default();
        }
        if self.username.is_empty() {
            self.username = env("OVIRT_USERNAME").unwrap_or_default();
        }
        if self.password.is_empty() {
            self.password = env("OVIRT_PASSWORD").unwrap_or_default();
        }

        if self.username.is_empty() {
            errs.push("username must be specified".to_string());
        }
        if self.password.is_empty() {
            errs.push("password must be specified".to_string());
        }
        if self.ovirt_url.is_empty() {
            errs.push("ovirt_url must be specified".to_string());
        } else if let Err(e) = reqwest::Url::parse(&self.ovirt_url) {
            errs.push(format!("Could not parse ovirt_url: {}", e));
        }

        errs
    }

    /// Parsed API base URL.
    pub fn url(&self) -> crate::types::Result<reqwest::Url> {
        reqwest::Url::parse(&self.ovirt_url)
            .map_err(|e| Error::validation(format!("Could not parse ovirt_url: {}", e)))
    }
}

/// VM source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(default)]
pub struct SourceConfig {
    /// Cluster the VM is created in.
    pub cluster: String,

    /// Kind of source; only `template` is supported.
    pub source_type: String,

    pub source_template_name: String,

    /// Template version; defaults to 1 when a name is given.
    pub source_template_version: u32,

    /// Template UUID, mutually exclusive with the name.
    pub source_template_id: String,
}

impl SourceConfig {
    pub fn prepare(&mut self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.cluster.is_empty() {
            self.cluster = "Default".to_string();
        }

        if self.source_type.is_empty() {
            self.source_type = "template".to_string();
            tracing::debug!("config_default: source_type={}", self.source_type);
        }
        if !VALID_SOURCE_TYPES.contains(&self.source_type.as_str()) {
            errs.push(format!("Invalid source_type: {}", self.source_type));
        }

        if self.source_type == "template" {
            if !self.source_template_name.is_empty() && self.source_template_version < 1 {
                self.source_template_version = 1;
                tracing::debug!(
                    "config_default: source_template_version={}",
                    self.source_template_version
                );
            }
            if !self.source_template_id.is_empty()
                && uuid::Uuid::parse_str(&self.source_template_id).is_err()
            {
                errs.push(format!(
                    "Invalid source_template_id: {}",
                    self.source_template_id
                ));
            }
            if !self.source_template_name.is_empty() && !self.source_template_id.is_empty() {
                errs.push(
                    "Conflict: Set either source_template_name or source_template_id".to_string(),
                );
            }
            if self.source_template_name.is_empty() && self.source_template_id.is_empty() {
                errs.push(
                    "source_template_name or source_template_id must be specified".to_string(),
                );
            }
        }

        errs
    }
}

/// VM identity and static network settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(default)]
pub struct VmConfig {
    /// VM name; defaults to `imager-<uuid>`.
    pub vm_name: String,

    /// Static IPv4 address; also the host provisioning connects to.
    pub address: String,

    pub netmask: String,

    pub gateway: String,

    /// Guest host name set through cloud-init.
    pub hostname: String,
}

impl VmConfig {
    pub fn prepare(&mut self) {
        if self.vm_name.is_empty() {
            self.vm_name = format!("imager-{}", uuid::Uuid::new_v4());
        }
        if self.netmask.is_empty() {
            self.netmask = "255.255.255.0".to_string();
            tracing::debug!("config_default: netmask={}", self.netmask);
        }
    }
}

/// Produced disk properties.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DiskConfig {
    /// Disk name; defaults to the VM name.
    pub disk_name: String,

    pub disk_description: String,

    /// Rename and detach the disk so it survives VM removal. Without it the
    /// build produces no artifact.
    pub export_disk: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            disk_name: String::new(),
            disk_description: String::new(),
            export_disk: true,
        }
    }
}

/// First-boot credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(default)]
pub struct CommunicatorConfig {
    pub ssh_username: String,

    /// Public key placed in the user's authorized keys.
    pub ssh_public_key: String,
}

/// Convergence polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PollingConfig {
    /// Pause between status refreshes.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub interval: Duration,

    /// Upper bound on a single wait. Unset means wait indefinitely.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: None,
        }
    }
}

impl BuildConfig {
    /// Read a JSON config file. Call [`BuildConfig::prepare`] afterwards.
    pub fn load(path: impl AsRef<Path>) -> crate::types::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Fill defaults from the process environment and validate.
    pub fn prepare(&mut self) -> crate::types::Result<()> {
        self.prepare_with_env(&|key: &str| std::env::var(key).ok())
    }

    /// Like [`BuildConfig::prepare`] with an explicit environment lookup.
    pub fn prepare_with_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> crate::types::Result<()> {
        let mut errs = self.access.prepare(env);
        errs.extend(self.source.prepare());
        self.vm.prepare();

        if self.disk.disk_name.is_empty() {
            self.disk.disk_name = self.vm.vm_name.clone();
        }
        if self.polling.interval.is_zero() {
            errs.push("polling interval must be positive".to_string());
        }

        if !errs.is_empty() {
            return Err(Error::Validation(errs));
        }
        Ok(())
    }

    /// JSON Schema of the config file format.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(BuildConfig)).unwrap_or_default()
    }
}
