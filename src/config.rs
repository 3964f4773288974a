//! Verification configuration.
//!
//! Loaded from a YAML file with every section optional:
//!
//! ```yaml
//! deployment:
//!   domain: tripleodomain.example.com
//!   realm: TRIPLEODOMAIN.EXAMPLE.COM
//!   hosts: [undercloud, overcloud-controller-0]
//!   controllers: [overcloud-controller-0]
//! compute:
//!   auth_url: https://192.168.24.2:13000
//!   username: admin
//! ipa:
//!   server: ipa.tripleodomain.example.com
//! ssh:
//!   identity_file: /home/stack/.ssh/id_rsa
//! ```
//!
//! Credentials resolve with the usual precedence (highest first):
//! 1. Environment (`OS_*` for the compute API, `IPA_*` for IPA)
//! 2. The config file
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::verify::is_valid_cert_tag;
use crate::{Error, Result};

/// Environment variable pointing at the config file.
pub const CONFIG_ENV: &str = "NOVAJOIN_VERIFY_CONFIG";

const DEFAULT_DOMAIN: &str = "tripleodomain.example.com";
const DEFAULT_REALM: &str = "TRIPLEODOMAIN.EXAMPLE.COM";
const DEFAULT_ADMIN_ACCOUNT: &str = "heat-admin";
const DEFAULT_NETWORK: &str = "ctlplane";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const DEFAULT_HOSTS: &[&str] = &["undercloud", "overcloud-controller-0"];
const DEFAULT_CONTROLLERS: &[&str] = &["overcloud-controller-0"];
const DEFAULT_CONTROLLER_CERT_TAGS: &[&str] = &[
    "mysql",
    "rabbitmq",
    "httpd-ctlplane",
    "httpd-internal_api",
    "httpd-storage",
    "httpd-storage_mgmt",
    "haproxy-ctlplane-cert",
    "haproxy-external-cert",
    "haproxy-internal_api-cert",
    "haproxy-storage-cert",
    "haproxy-storage_mgmt-cert",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub deployment: DeploymentConfig,
    pub compute: ComputeConfig,
    pub ipa: IpaConfig,
    pub ssh: SshConfig,
}

/// Topology of the deployment under test.
///
/// Defaults describe the standard TripleO HA layout with one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Lowercase DNS domain the nodes were enrolled under.
    pub domain: String,
    /// Kerberos realm, uppercase.
    pub realm: String,
    /// Hosts that must be enrolled, checked in order.
    pub hosts: Vec<String>,
    /// Controller nodes carrying service metadata.
    pub controllers: Vec<String>,
    /// certmonger request ids expected on every controller.
    pub controller_cert_tags: Vec<String>,
    /// Account used for SSH to overcloud nodes.
    pub admin_account: String,
    /// Fixed overcloud address. Resolved from the compute API when unset.
    pub overcloud_address: Option<String>,
    /// Network preferred when picking a server address.
    pub network: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            realm: DEFAULT_REALM.to_string(),
            hosts: owned(DEFAULT_HOSTS),
            controllers: owned(DEFAULT_CONTROLLERS),
            controller_cert_tags: owned(DEFAULT_CONTROLLER_CERT_TAGS),
            admin_account: DEFAULT_ADMIN_ACCOUNT.to_string(),
            overcloud_address: None,
            network: DEFAULT_NETWORK.to_string(),
        }
    }
}

impl DeploymentConfig {
    /// Fully-qualified name of a host in this deployment.
    pub fn fqdn(&self, host: &str) -> String {
        format!("{}.{}", host, self.domain)
    }

    /// Reject topologies that cannot produce valid principals.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::config("deployment.domain must not be empty"));
        }
        if self.realm.is_empty() {
            return Err(Error::config("deployment.realm must not be empty"));
        }
        if self.realm != self.realm.to_uppercase() {
            return Err(Error::config(format!(
                "deployment.realm '{}' must be uppercase",
                self.realm
            )));
        }
        if self.realm == self.domain {
            return Err(Error::config(
                "deployment.realm must be the uppercase form, not the domain",
            ));
        }
        if self.admin_account.is_empty() {
            return Err(Error::config("deployment.admin_account must not be empty"));
        }
        if let Some(tag) = self.controller_cert_tags.iter().find(|t| !is_valid_cert_tag(t)) {
            return Err(Error::config(format!(
                "deployment.controller_cert_tags: '{}' may only contain letters, digits, '_', '.' and '-'",
                tag
            )));
        }
        Ok(())
    }
}

/// Keystone credentials and compute endpoint selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub auth_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project_name: Option<String>,
    pub user_domain_name: String,
    pub project_domain_name: String,
    pub region: Option<String>,
    /// Catalog interface (`public`, `internal`, `admin`).
    pub interface: String,
    pub timeout_secs: u64,
    /// Skip TLS verification of the compute and identity endpoints.
    pub insecure: bool,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            auth_url: None,
            username: None,
            password: None,
            project_name: None,
            user_domain_name: "Default".to_string(),
            project_domain_name: "Default".to_string(),
            region: None,
            interface: "public".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            insecure: false,
        }
    }
}

impl ComputeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        override_from(&mut self.auth_url, env("OS_AUTH_URL"));
        override_from(&mut self.username, env("OS_USERNAME"));
        override_from(&mut self.password, env("OS_PASSWORD"));
        override_from(&mut self.project_name, env("OS_PROJECT_NAME"));
        override_from(&mut self.region, env("OS_REGION_NAME"));
        if let Some(v) = env("OS_USER_DOMAIN_NAME") {
            self.user_domain_name = v;
        }
        if let Some(v) = env("OS_PROJECT_DOMAIN_NAME") {
            self.project_domain_name = v;
        }
        if let Some(v) = env("OS_INTERFACE") {
            self.interface = v;
        }
    }
}

/// IPA server and login credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpaConfig {
    pub server: Option<String>,
    pub username: String,
    pub password: Option<String>,
    /// PEM bundle used to verify the IPA server certificate.
    pub ca_cert: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for IpaConfig {
    fn default() -> Self {
        Self {
            server: None,
            username: "admin".to_string(),
            password: None,
            ca_cert: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl IpaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        override_from(&mut self.server, env("IPA_SERVER"));
        override_from(&mut self.password, env("IPA_PASSWORD"));
        if let Some(v) = env("IPA_USER") {
            self.username = v;
        }
    }
}

/// OpenSSH options for the remote execution channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub identity_file: Option<PathBuf>,
    pub strict_host_key_checking: bool,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Where ControlMaster sockets are created.
    pub control_dir: PathBuf,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            identity_file: None,
            strict_host_key_checking: false,
            connect_timeout_secs: 10,
            command_timeout_secs: DEFAULT_TIMEOUT_SECS,
            control_dir: std::env::temp_dir(),
        }
    }
}

impl SshConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn override_from(slot: &mut Option<String>, value: Option<String>) {
    if let Some(v) = value {
        *slot = Some(v);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl VerifyConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: VerifyConfig = serde_yaml::from_str(yaml)?;
        config.deployment.validate()?;
        Ok(config)
    }

    /// Load a config file, or defaults when no path is given.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml(&data)?
            }
            None => Self::default(),
        };
        config.apply_env(&non_empty_env);
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        self.compute.apply_env(env);
        self.ipa.apply_env(env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_describe_tripleo_topology() {
        let config = DeploymentConfig::default();
        assert_eq!(config.hosts, vec!["undercloud", "overcloud-controller-0"]);
        assert_eq!(config.controllers, vec!["overcloud-controller-0"]);
        assert_eq!(config.controller_cert_tags.len(), 11);
        assert_eq!(config.controller_cert_tags[0], "mysql");
        assert_eq!(
            config.controller_cert_tags.last().map(String::as_str),
            Some("haproxy-storage_mgmt-cert")
        );
        assert_eq!(config.admin_account, "heat-admin");
        assert!(config.overcloud_address.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn fqdn_joins_host_and_domain() {
        let config = DeploymentConfig::default();
        assert_eq!(
            config.fqdn("undercloud"),
            "undercloud.tripleodomain.example.com"
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = VerifyConfig::from_yaml(
            r#"
deployment:
  controllers: [overcloud-controller-0, overcloud-controller-1]
  overcloud_address: 192.168.24.17
ipa:
  server: ipa.tripleodomain.example.com
"#,
        )
        .unwrap();

        assert_eq!(config.deployment.controllers.len(), 2);
        assert_eq!(
            config.deployment.overcloud_address.as_deref(),
            Some("192.168.24.17")
        );
        assert_eq!(config.deployment.realm, "TRIPLEODOMAIN.EXAMPLE.COM");
        assert_eq!(
            config.ipa.server.as_deref(),
            Some("ipa.tripleodomain.example.com")
        );
        assert_eq!(config.ipa.username, "admin");
        assert_eq!(config.compute.interface, "public");
    }

    #[test]
    fn lowercase_realm_is_rejected() {
        let err = VerifyConfig::from_yaml("deployment:\n  realm: tripleodomain.example.com\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn cert_tag_with_shell_syntax_is_rejected() {
        let err = VerifyConfig::from_yaml(
            "deployment:\n  controller_cert_tags: [mysql, \"mysql; reboot\"]\n",
        )
        .unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("mysql; reboot")),
            other => panic!("Expected Config error, got {other}"),
        }
    }

    #[test]
    fn realm_equal_to_domain_is_rejected() {
        let config = DeploymentConfig {
            domain: "EXAMPLE.COM".to_string(),
            realm: "EXAMPLE.COM".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = VerifyConfig::from_yaml(
            "compute:\n  auth_url: https://file:5000\n  username: file-user\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("OS_AUTH_URL", "https://env:5000"),
            ("OS_PASSWORD", "secret"),
            ("IPA_SERVER", "ipa.env.example.com"),
            ("IPA_USER", "verifier"),
        ]);
        config.apply_env(&|name: &str| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.compute.auth_url.as_deref(), Some("https://env:5000"));
        assert_eq!(config.compute.username.as_deref(), Some("file-user"));
        assert_eq!(config.compute.password.as_deref(), Some("secret"));
        assert_eq!(config.ipa.server.as_deref(), Some("ipa.env.example.com"));
        assert_eq!(config.ipa.username, "verifier");
    }

    #[test]
    fn load_reports_missing_file_path() {
        let err = VerifyConfig::load(Some(Path::new("/nonexistent/verify.yaml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/verify.yaml"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verify.yaml");
        std::fs::write(&path, "deployment:\n  admin_account: stack\n").unwrap();

        let config = VerifyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.deployment.admin_account, "stack");
    }
}
