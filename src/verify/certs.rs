//! certmonger tracking checks on overcloud nodes

use tracing::{info, warn};

use super::{IpaClientConf, Verifier};
use crate::remote;
use crate::{Error, Result};

/// Status of a certificate request that is being renewed normally
const MONITORING: &str = "MONITORING";

/// Request nicknames are passed to a remote shell, so only these characters
/// are accepted.
pub fn is_valid_cert_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// One request from `getcert list`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertRequest {
    /// Request nickname (`-I` / `-i`)
    pub id: String,
    pub status: Option<String>,
    pub stuck: Option<bool>,
    pub ca: Option<String>,
    pub principal: Option<String>,
    pub track: Option<bool>,
}

impl CertRequest {
    /// Listed requests are tracked unless certmonger says otherwise.
    pub fn is_tracked(&self) -> bool {
        self.track.unwrap_or(true)
    }
}

/// Parse the output of `getcert list`.
///
/// ```text
/// Number of certificates and requests being tracked: 1.
/// Request ID 'mysql':
///         status: MONITORING
///         stuck: no
///         ...
///         track: yes
/// ```
pub fn parse_getcert_list(output: &str) -> Vec<CertRequest> {
    let mut requests = Vec::new();
    let mut current: Option<CertRequest> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("Request ID ") {
            if let Some(done) = current.take() {
                requests.push(done);
            }
            let id = rest
                .trim_end()
                .trim_end_matches(':')
                .trim_matches('\'')
                .to_string();
            current = Some(CertRequest {
                id,
                ..Default::default()
            });
            continue;
        }

        let Some(request) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "status" => request.status = Some(value.to_string()),
            "stuck" => request.stuck = Some(value == "yes"),
            "CA" => request.ca = Some(value.to_string()),
            "principal name" => request.principal = Some(value.to_string()),
            "track" => request.track = Some(value == "yes"),
            _ => {}
        }
    }

    if let Some(done) = current {
        requests.push(done);
    }
    requests
}

impl Verifier {
    /// certmonger on the node at `address` tracks the request named `tag`.
    pub async fn verify_overcloud_cert_tracked(
        &self,
        address: &str,
        admin_account: &str,
        tag: &str,
    ) -> Result<CertRequest> {
        if !is_valid_cert_tag(tag) {
            return Err(Error::config(format!("invalid certificate tag '{}'", tag)));
        }
        let output = remote::execute(
            self.remote.as_ref(),
            address,
            admin_account,
            &format!("sudo getcert list -i {}", tag),
        )
        .await?;

        let not_tracked = || Error::CertNotTracked {
            tag: tag.to_string(),
            target: address.to_string(),
        };
        if !output.success() {
            warn!(tag = %tag, address = %address, stderr = %output.stderr.trim(), "getcert list failed");
            return Err(not_tracked());
        }

        let request = parse_getcert_list(&output.stdout)
            .into_iter()
            .find(|r| r.id == tag && r.is_tracked())
            .ok_or_else(not_tracked)?;

        let status = request.status.as_deref().unwrap_or("unknown");
        if status != MONITORING || request.stuck == Some(true) {
            warn!(tag = %tag, address = %address, status = %status, stuck = ?request.stuck, "Certificate is tracked but not monitoring");
        } else {
            info!(tag = %tag, address = %address, status = %status, "Certificate is tracked");
        }
        Ok(request)
    }

    /// The overcloud node at `address` is an IPA client.
    pub async fn verify_overcloud_host_is_ipaclient(
        &self,
        address: &str,
        admin_account: &str,
    ) -> Result<IpaClientConf> {
        self.verify_host_is_client(address, admin_account).await
    }
}
