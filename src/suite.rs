//! TripleO deployment scenarios
//!
//! Each scenario checks one aspect of a novajoin-enabled TripleO deployment
//! and is independent of the others: a failing scenario never prevents the
//! next one from running.

use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::report::ScenarioReport;
use crate::services::{decode_compact, decode_managed};
use crate::verify::Verifier;
use crate::{Error, Result};

pub const HOSTS_ARE_REGISTERED: &str = "test_hosts_are_registered";
pub const COMPACT_SERVICES_CREATED: &str = "test_verify_compact_services_created";
pub const CONTROLLER_MANAGED_SERVICES: &str = "test_verify_controller_managed_services";
pub const SERVICE_CERTS_ARE_TRACKED: &str = "test_verify_service_certs_are_tracked";
pub const OVERCLOUD_IS_IPACLIENT: &str = "test_overcloud_is_ipaclient";

/// Every scenario, in execution order
pub const SCENARIOS: &[&str] = &[
    HOSTS_ARE_REGISTERED,
    COMPACT_SERVICES_CREATED,
    CONTROLLER_MANAGED_SERVICES,
    SERVICE_CERTS_ARE_TRACKED,
    OVERCLOUD_IS_IPACLIENT,
];

const SUITE_NAME: &str = "tripleo deployment";

/// Scenario runner for one deployment
pub struct TripleoSuite {
    config: DeploymentConfig,
    verifier: Verifier,
}

impl TripleoSuite {
    pub fn new(config: DeploymentConfig, verifier: Verifier) -> Self {
        Self { config, verifier }
    }

    /// Every host is enrolled and has a keytab. Stops at the first failure.
    pub async fn test_hosts_are_registered(&self) -> Result<()> {
        for host in &self.config.hosts {
            let fqdn = self.config.fqdn(host);
            self.verifier.verify_host_registered(&fqdn).await?;
            self.verifier.verify_host_has_keytab(&fqdn).await?;
        }
        Ok(())
    }

    /// Services listed in each controller's `compact_services` exist in IPA.
    pub async fn test_verify_compact_services_created(&self) -> Result<()> {
        for host in &self.config.controllers {
            let metadata = self.verifier.server_metadata(host).await?;
            let services = decode_compact(&metadata, host)?;
            info!(host = %host, count = services.len(), "Decoded compact services");
            self.verifier
                .verify_compact_services(
                    &services,
                    host,
                    &self.config.realm,
                    &self.config.domain,
                    true,
                )
                .await?;
        }
        Ok(())
    }

    /// Services listed in each controller's `managed_service_*` keys exist in IPA.
    pub async fn test_verify_controller_managed_services(&self) -> Result<()> {
        for host in &self.config.controllers {
            let metadata = self.verifier.server_metadata(host).await?;
            let services = decode_managed(&metadata, host);
            if services.is_empty() {
                warn!(host = %host, "No managed services in server metadata");
            }
            self.verifier
                .verify_managed_services(&services, &self.config.realm, &self.config.domain, true)
                .await?;
        }
        Ok(())
    }

    /// certmonger on the overcloud tracks every expected certificate.
    ///
    /// Every tag is checked and untracked ones are reported together. A
    /// transport failure ends the scenario at once.
    pub async fn test_verify_service_certs_are_tracked(&self) -> Result<()> {
        let address = self.overcloud_address().await?;
        let mut failures = Vec::new();
        for tag in &self.config.controller_cert_tags {
            match self
                .verifier
                .verify_overcloud_cert_tracked(&address, &self.config.admin_account, tag)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_assertion() => {
                    warn!(tag = %tag, error = %e, "Certificate check failed");
                    failures.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::assertion(format!(
            "{} of {} certificates failed on {}: {}",
            failures.len(),
            self.config.controller_cert_tags.len(),
            address,
            failures.join("; ")
        )))
    }

    /// The overcloud node is an IPA client of the deployment realm and domain.
    pub async fn test_overcloud_is_ipaclient(&self) -> Result<()> {
        let address = self.overcloud_address().await?;
        let conf = self
            .verifier
            .verify_overcloud_host_is_ipaclient(&address, &self.config.admin_account)
            .await?;
        if conf.realm != self.config.realm {
            return Err(Error::assertion(format!(
                "{} is enrolled in realm {}, expected {}",
                address, conf.realm, self.config.realm
            )));
        }
        if let Some(ref domain) = conf.domain {
            if !domain.eq_ignore_ascii_case(&self.config.domain) {
                return Err(Error::assertion(format!(
                    "{} is enrolled in domain {}, expected {}",
                    address, domain, self.config.domain
                )));
            }
        }
        Ok(())
    }

    /// Address used for remote checks on the overcloud.
    ///
    /// The configured address wins; otherwise the first controller's address
    /// on the configured network.
    pub async fn overcloud_address(&self) -> Result<String> {
        if let Some(ref address) = self.config.overcloud_address {
            return Ok(address.clone());
        }
        let controller = self
            .config
            .controllers
            .first()
            .ok_or_else(|| Error::config("no controllers configured to resolve the overcloud address"))?;
        let ip = self
            .verifier
            .server_ip(controller, &self.config.network)
            .await?;
        info!(controller = %controller, address = %ip, "Resolved overcloud address");
        Ok(ip.to_string())
    }

    /// Run one scenario by name.
    pub async fn run_scenario(&self, name: &str) -> Result<()> {
        match name {
            HOSTS_ARE_REGISTERED => self.test_hosts_are_registered().await,
            COMPACT_SERVICES_CREATED => self.test_verify_compact_services_created().await,
            CONTROLLER_MANAGED_SERVICES => self.test_verify_controller_managed_services().await,
            SERVICE_CERTS_ARE_TRACKED => self.test_verify_service_certs_are_tracked().await,
            OVERCLOUD_IS_IPACLIENT => self.test_overcloud_is_ipaclient().await,
            other => Err(Error::not_found("scenario", other)),
        }
    }

    /// Run the named scenarios in order. Unknown names are rejected up front.
    pub async fn run<S: AsRef<str>>(&self, names: &[S]) -> Result<ScenarioReport> {
        if let Some(unknown) = names
            .iter()
            .map(|name| name.as_ref())
            .find(|name| !SCENARIOS.contains(name))
        {
            return Err(Error::not_found("scenario", unknown));
        }

        let mut report = ScenarioReport::new(SUITE_NAME);
        for name in names {
            let name = name.as_ref();
            info!(scenario = %name, "Running scenario");
            report.run(name, || self.run_scenario(name)).await;
        }
        Ok(report)
    }

    /// Run every scenario.
    pub async fn run_all(&self) -> ScenarioReport {
        let mut report = ScenarioReport::new(SUITE_NAME);
        for name in SCENARIOS {
            info!(scenario = %name, "Running scenario");
            report.run(name, || self.run_scenario(name)).await;
        }
        report
    }
}
