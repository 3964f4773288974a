//! Host enrollment checks

use tracing::{info, warn};

use super::Verifier;
use crate::identity::HostEntry;
use crate::remote;
use crate::{Error, Result};

/// IPA client configuration written by `ipa-client-install`
pub const IPA_DEFAULT_CONF: &str = "/etc/ipa/default.conf";

/// `[global]` settings of an IPA client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpaClientConf {
    pub realm: String,
    pub domain: Option<String>,
    pub server: Option<String>,
    pub host: Option<String>,
    pub xmlrpc_uri: Option<String>,
}

/// Parse the `[global]` section of `default.conf`.
///
/// Returns `None` unless the section names a realm and a server to talk to.
pub fn parse_ipa_default_conf(content: &str) -> Option<IpaClientConf> {
    let mut in_global = false;
    let mut conf = IpaClientConf::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_global = line[1..line.len() - 1].trim() == "global";
            continue;
        }
        if !in_global {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "realm" => conf.realm = value,
            "domain" => conf.domain = Some(value),
            "server" => conf.server = Some(value),
            "host" => conf.host = Some(value),
            "xmlrpc_uri" => conf.xmlrpc_uri = Some(value),
            _ => {}
        }
    }

    if conf.realm.is_empty() || (conf.server.is_none() && conf.xmlrpc_uri.is_none()) {
        return None;
    }
    Some(conf)
}

impl Verifier {
    /// The host has an entry in IPA.
    pub async fn verify_host_registered(&self, fqdn: &str) -> Result<HostEntry> {
        let host = self
            .identity
            .find_host(fqdn)
            .await?
            .ok_or_else(|| Error::Enrollment {
                fqdn: fqdn.to_string(),
            })?;
        info!(host = %fqdn, "Host is registered with IPA");
        Ok(host)
    }

    /// A keytab was retrieved for the host principal.
    pub async fn verify_host_has_keytab(&self, fqdn: &str) -> Result<()> {
        let host = self
            .identity
            .find_host(fqdn)
            .await?
            .ok_or_else(|| Error::Enrollment {
                fqdn: fqdn.to_string(),
            })?;
        if !host.has_keytab {
            if host.has_password {
                warn!(host = %fqdn, "Host still has its one-time enrollment password");
            }
            return Err(Error::KeytabMissing {
                principal: format!("host/{}", fqdn),
            });
        }
        info!(host = %fqdn, "Host has a keytab");
        Ok(())
    }

    /// The node at `address` is configured as an IPA client.
    pub async fn verify_host_is_client(
        &self,
        address: &str,
        admin_account: &str,
    ) -> Result<IpaClientConf> {
        let output = remote::execute(
            self.remote.as_ref(),
            address,
            admin_account,
            &format!("cat {}", IPA_DEFAULT_CONF),
        )
        .await?;

        if !output.success() {
            return Err(Error::assertion(format!(
                "{} is not an IPA client: cannot read {}: {}",
                address,
                IPA_DEFAULT_CONF,
                output.stderr.trim()
            )));
        }

        let conf = parse_ipa_default_conf(&output.stdout).ok_or_else(|| {
            Error::assertion(format!(
                "{} is not an IPA client: {} has no realm or server",
                address, IPA_DEFAULT_CONF
            ))
        })?;
        info!(
            address = %address,
            realm = %conf.realm,
            host = conf.host.as_deref().unwrap_or("-"),
            "Host is an IPA client"
        );
        Ok(conf)
    }
}
