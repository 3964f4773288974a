//! IPA identity backend abstraction
//!
//! The verifier only needs presence lookups of hosts and services plus a few
//! of their attributes. [`IdentityBackend`] is the seam; [`IpaClient`] talks
//! to a FreeIPA server over JSON-RPC.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Result;

mod ipa;

pub use ipa::IpaClient;

/// Host entry as stored in IPA
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEntry {
    pub fqdn: String,
    /// A keytab has been retrieved for the host principal
    pub has_keytab: bool,
    /// A one-time enrollment password is still set (host not yet joined)
    pub has_password: bool,
}

/// Service entry as stored in IPA
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceEntry {
    pub principal: String,
    pub has_keytab: bool,
    /// Hosts allowed to manage the service (and request its certificates)
    pub managed_by: Vec<String>,
    /// Number of certificates issued to the service
    pub certificate_count: usize,
}

impl ServiceEntry {
    pub fn is_managed_by(&self, fqdn: &str) -> bool {
        self.managed_by.iter().any(|h| h.eq_ignore_ascii_case(fqdn))
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate_count > 0
    }
}

/// Trait abstracting IPA lookups
///
/// A missing entry is `Ok(None)`; errors are reserved for transport and
/// server failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Look up a host by fully-qualified name
    async fn find_host(&self, fqdn: &str) -> Result<Option<HostEntry>>;

    /// Look up a service by principal (`service/fqdn@REALM`)
    async fn find_service(&self, principal: &str) -> Result<Option<ServiceEntry>>;
}
