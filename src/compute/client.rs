//! Nova client authenticated through Keystone v3

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{Addresses, ComputeApi, Server, ServerMetadata, ServerQuery};
use crate::config::ComputeConfig;
use crate::{Error, Result};

const TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    interface: String,
    url: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct MetadataBody {
    metadata: ServerMetadata,
}

#[derive(Debug, Deserialize)]
struct AddressesBody {
    addresses: Addresses,
}

/// Compute API client
///
/// Authenticates once at construction and reuses the token for every call.
pub struct NovaClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl NovaClient {
    /// Authenticate against Keystone and locate the compute endpoint.
    pub async fn connect(config: &ComputeConfig) -> Result<Self> {
        let auth_url = config
            .auth_url
            .as_deref()
            .ok_or_else(|| Error::config("compute.auth_url (OS_AUTH_URL) is not set"))?;
        let username = config
            .username
            .as_deref()
            .ok_or_else(|| Error::config("compute.username (OS_USERNAME) is not set"))?;
        let password = config
            .password
            .as_deref()
            .ok_or_else(|| Error::config("compute.password (OS_PASSWORD) is not set"))?;
        let project = config
            .project_name
            .as_deref()
            .ok_or_else(|| Error::config("compute.project_name (OS_PROJECT_NAME) is not set"))?;

        let http = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": username,
                            "domain": {"name": config.user_domain_name},
                            "password": password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": project,
                        "domain": {"name": config.project_domain_name},
                    }
                }
            }
        });

        let url = format!("{}/v3/auth/tokens", auth_url.trim_end_matches('/').trim_end_matches("/v3"));
        debug!(url = %url, user = %username, "Requesting Keystone token");
        let response = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::connectivity(format!("keystone {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::connectivity(format!(
                "keystone authentication failed: HTTP {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::connectivity("keystone response carried no token"))?;
        let body: TokenResponse = response.json().await?;
        let endpoint = compute_endpoint(&body, &config.interface, config.region.as_deref())?;

        info!(endpoint = %endpoint, "Connected to compute API");
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn get<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| Error::connectivity(format!("compute API {}: {}", what, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::not_found("compute resource", what)),
            status if !status.is_success() => Err(Error::connectivity(format!(
                "compute API {} returned HTTP {}",
                what, status
            ))),
            _ => Ok(response.json().await?),
        }
    }
}

/// Find the compute endpoint in the token catalog.
fn compute_endpoint(body: &TokenResponse, interface: &str, region: Option<&str>) -> Result<String> {
    body.token
        .catalog
        .iter()
        .filter(|entry| entry.service_type == "compute")
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|ep| ep.interface == interface)
        .find(|ep| match region {
            Some(region) => {
                ep.region_id.as_deref() == Some(region) || ep.region.as_deref() == Some(region)
            }
            None => true,
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
        .ok_or_else(|| Error::not_found("compute endpoint", interface))
}

#[async_trait]
impl ComputeApi for NovaClient {
    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>> {
        let path = if query.detail { "/servers/detail" } else { "/servers" };
        let mut params = vec![("name", query.name.as_str())];
        if query.all_tenants {
            params.push(("all_tenants", "1"));
        }
        let request = self.http.get(self.url(path)).query(&params);
        let list: ServerList = self.get(request, &format!("servers?name={}", query.name)).await?;
        debug!(name = %query.name, count = list.servers.len(), "Listed servers");
        Ok(list.servers)
    }

    async fn server_metadata(&self, server_id: &str) -> Result<ServerMetadata> {
        let request = self
            .http
            .get(self.url(&format!("/servers/{}/metadata", server_id)));
        let body: MetadataBody = self
            .get(request, &format!("servers/{}/metadata", server_id))
            .await?;
        Ok(body.metadata)
    }

    async fn server_addresses(&self, server_id: &str) -> Result<Addresses> {
        let request = self.http.get(self.url(&format!("/servers/{}/ips", server_id)));
        let body: AddressesBody = self
            .get(request, &format!("servers/{}/ips", server_id))
            .await?;
        Ok(body.addresses)
    }
}
