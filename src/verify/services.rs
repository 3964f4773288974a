//! Service registration checks

use tracing::{debug, info};

use super::Verifier;
use crate::identity::ServiceEntry;
use crate::services::ServiceDescriptor;
use crate::{Error, Result};

impl Verifier {
    /// Check services decoded from `compact_services`.
    ///
    /// Each service must be managed by the node it was declared on
    /// (`host.domain`). Stops at the first failing service.
    pub async fn verify_compact_services(
        &self,
        services: &[ServiceDescriptor],
        host: &str,
        realm: &str,
        domain: &str,
        verify_certs: bool,
    ) -> Result<()> {
        let managing_host = format!("{}.{}", host, domain);
        for descriptor in services {
            self.verify_service(descriptor, realm, domain, Some(&managing_host), verify_certs)
                .await?;
        }
        info!(host = %managing_host, count = services.len(), "Compact services verified");
        Ok(())
    }

    /// Check services decoded from `managed_service_*` keys.
    ///
    /// Stops at the first failing service.
    pub async fn verify_managed_services(
        &self,
        services: &[ServiceDescriptor],
        realm: &str,
        domain: &str,
        verify_certs: bool,
    ) -> Result<()> {
        for descriptor in services {
            self.verify_service(descriptor, realm, domain, None, verify_certs)
                .await?;
        }
        info!(count = services.len(), "Managed services verified");
        Ok(())
    }

    async fn verify_service(
        &self,
        descriptor: &ServiceDescriptor,
        realm: &str,
        domain: &str,
        managed_by: Option<&str>,
        verify_certs: bool,
    ) -> Result<ServiceEntry> {
        let subhost = descriptor.fqdn(domain);
        self.verify_host_registered(&subhost).await?;
        self.verify_host_has_keytab(&subhost).await?;

        let principal = descriptor.principal(domain, realm);
        debug!(principal = %principal, "Looking up service");
        let entry = self
            .identity
            .find_service(&principal)
            .await?
            .ok_or_else(|| Error::not_found("service", principal.as_str()))?;

        if let Some(host) = managed_by {
            if !entry.is_managed_by(host) {
                return Err(Error::assertion(format!(
                    "service {} is not managed by {} (managed by: {})",
                    principal,
                    host,
                    entry.managed_by.join(", ")
                )));
            }
        }

        if verify_certs && !entry.has_certificate() {
            return Err(Error::CertNotTracked {
                tag: principal,
                target: "IPA".to_string(),
            });
        }

        info!(
            principal = %principal,
            certificates = entry.certificate_count,
            keytab = entry.has_keytab,
            "Service verified"
        );
        Ok(entry)
    }
}
