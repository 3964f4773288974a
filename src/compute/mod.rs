//! Compute (Nova) lookups for deployed nodes
//!
//! Provides a trait-based abstraction over the compute API so the verifier can
//! be exercised against mocks while production code talks to Nova.

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

mod client;

pub use client::NovaClient;

/// Nova server UUID
pub type ServerId = String;

/// Key/value metadata attached to a server record
pub type ServerMetadata = BTreeMap<String, String>;

/// Addresses of a server grouped by network name
pub type Addresses = BTreeMap<String, Vec<ServerAddress>>;

/// Filters for a server listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerQuery {
    pub name: String,
    pub all_tenants: bool,
    pub detail: bool,
}

impl ServerQuery {
    /// Detailed, all-tenant lookup by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            all_tenants: true,
            detail: true,
        }
    }
}

/// Link attached to a server record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// Server record as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Server {
    /// Id taken from the trailing segment of the `self` link
    pub fn self_link_id(&self) -> Option<ServerId> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .and_then(|link| link.href.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// One address entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
}

/// Trait abstracting the compute API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// List servers matching the query
    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>>;

    /// Full metadata mapping of a server
    async fn server_metadata(&self, server_id: &str) -> Result<ServerMetadata>;

    /// Addresses of a server, by network
    async fn server_addresses(&self, server_id: &str) -> Result<Addresses>;
}

/// Resolve a server name to its id.
///
/// Nova filters names by regular expression, so `overcloud-controller-1`
/// also lists `overcloud-controller-10`. A server with exactly that name
/// wins; otherwise the first one listed. An empty listing or a record without
/// a `self` link is a lookup failure.
pub async fn resolve_server_id(api: &dyn ComputeApi, name: &str) -> Result<ServerId> {
    let servers = api.list_servers(&ServerQuery::by_name(name)).await?;
    let server = servers
        .iter()
        .find(|s| s.name.as_deref() == Some(name))
        .or_else(|| servers.first())
        .ok_or_else(|| Error::not_found("server", name))?;
    let id = server
        .self_link_id()
        .ok_or_else(|| Error::not_found("server self link", name))?;
    debug!(server = %name, id = %id, "Resolved server id");
    Ok(id)
}

/// Fetch the metadata of a server.
pub async fn get_server_metadata(api: &dyn ComputeApi, server_id: &str) -> Result<ServerMetadata> {
    api.server_metadata(server_id).await
}

/// Pick a reachable address for a server.
///
/// Addresses on `network` are preferred, IPv4 before IPv6; otherwise the
/// first parseable address on any network is used.
pub async fn get_server_ip(api: &dyn ComputeApi, server_id: &str, network: &str) -> Result<IpAddr> {
    let addresses = api.server_addresses(server_id).await?;
    select_address(&addresses, network).ok_or_else(|| Error::not_found("server address", server_id))
}

fn select_address(addresses: &Addresses, network: &str) -> Option<IpAddr> {
    let parse = |entries: &[ServerAddress]| -> Vec<IpAddr> {
        entries
            .iter()
            .filter_map(|a| a.addr.parse::<IpAddr>().ok())
            .collect()
    };

    if let Some(entries) = addresses.get(network) {
        let ips = parse(entries);
        if let Some(ip) = ips.iter().find(|ip| ip.is_ipv4()).or_else(|| ips.first()) {
            return Some(*ip);
        }
    }

    addresses
        .values()
        .flat_map(|entries| parse(entries))
        .next()
}
