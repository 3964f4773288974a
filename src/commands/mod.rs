//! CLI commands

use std::sync::Arc;

use tracing::info;

use crate::compute::NovaClient;
use crate::config::VerifyConfig;
use crate::identity::IpaClient;
use crate::remote::SshExecutor;
use crate::verify::Verifier;
use crate::Result;

pub mod run;
pub mod scenarios;
pub mod services;

/// Connect to the compute API and IPA and set up SSH.
///
/// Fails fast on missing credentials or an unreachable endpoint, before any
/// scenario starts.
pub async fn connect(config: &VerifyConfig) -> Result<Verifier> {
    let compute = NovaClient::connect(&config.compute).await?;
    let identity = IpaClient::connect(&config.ipa).await?;
    let remote = SshExecutor::new(config.ssh.clone());
    info!(
        domain = %config.deployment.domain,
        realm = %config.deployment.realm,
        "Connected to deployment"
    );
    Ok(Verifier::new(
        Arc::new(compute),
        Arc::new(identity),
        Arc::new(remote),
    ))
}
