//! Verification of IPA enrollment, services and certificate tracking
//!
//! [`Verifier`] bundles the three external collaborators (compute API, IPA,
//! remote execution) and exposes one method per check. Checks are read-only
//! and stateless: every call fetches live state and either returns what it
//! found or fails with an error naming the host, principal or tag involved.

use std::net::IpAddr;
use std::sync::Arc;

use crate::compute::{self, ComputeApi, ServerId, ServerMetadata};
use crate::identity::IdentityBackend;
use crate::remote::RemoteExecutor;
use crate::Result;

mod certs;
mod enrollment;
mod services;

pub use certs::{is_valid_cert_tag, parse_getcert_list, CertRequest};
pub use enrollment::{parse_ipa_default_conf, IpaClientConf, IPA_DEFAULT_CONF};

/// Entry point for all deployment checks
#[derive(Clone)]
pub struct Verifier {
    compute: Arc<dyn ComputeApi>,
    identity: Arc<dyn IdentityBackend>,
    remote: Arc<dyn RemoteExecutor>,
}

impl Verifier {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        identity: Arc<dyn IdentityBackend>,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            compute,
            identity,
            remote,
        }
    }

    /// Resolve a server name to its id
    pub async fn resolve_server_id(&self, name: &str) -> Result<ServerId> {
        compute::resolve_server_id(self.compute.as_ref(), name).await
    }

    /// Metadata of the server called `name`
    pub async fn server_metadata(&self, name: &str) -> Result<ServerMetadata> {
        let server_id = self.resolve_server_id(name).await?;
        compute::get_server_metadata(self.compute.as_ref(), &server_id).await
    }

    /// Reachable address of the server called `name`
    pub async fn server_ip(&self, name: &str, network: &str) -> Result<IpAddr> {
        let server_id = self.resolve_server_id(name).await?;
        compute::get_server_ip(self.compute.as_ref(), &server_id, network).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock wiring shared by the verifier and suite tests

    use super::*;
    use crate::compute::MockComputeApi;
    use crate::identity::{HostEntry, MockIdentityBackend, ServiceEntry};
    use crate::remote::{CommandOutput, MockRemoteExecutor, MockRemoteSession, RemoteSession};

    pub fn verifier(
        compute: MockComputeApi,
        identity: MockIdentityBackend,
        remote: MockRemoteExecutor,
    ) -> Verifier {
        Verifier::new(Arc::new(compute), Arc::new(identity), Arc::new(remote))
    }

    pub fn enrolled_host(fqdn: &str) -> HostEntry {
        HostEntry {
            fqdn: fqdn.to_string(),
            has_keytab: true,
            has_password: false,
        }
    }

    pub fn certified_service(principal: &str, managed_by: &[&str]) -> ServiceEntry {
        ServiceEntry {
            principal: principal.to_string(),
            has_keytab: true,
            managed_by: managed_by.iter().map(|h| h.to_string()).collect(),
            certificate_count: 1,
        }
    }

    /// Executor whose every session answers `command` output and expects close
    pub fn remote_answering(stdout: &'static str, status: i32) -> MockRemoteExecutor {
        let mut remote = MockRemoteExecutor::new();
        remote.expect_open().returning(move |_, _| {
            let mut session = MockRemoteSession::new();
            session.expect_run().returning(move |_| {
                Ok(CommandOutput {
                    status: Some(status),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                })
            });
            session.expect_close().times(1).returning(|| Ok(()));
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        });
        remote
    }
}
