//! FreeIPA JSON-RPC client

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, REFERER};
use reqwest::{Certificate, Client};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{HostEntry, IdentityBackend, ServiceEntry};
use crate::config::IpaConfig;
use crate::{Error, Result};

/// API version sent with every command
const IPA_API_VERSION: &str = "2.230";

/// `NotFound` error code
const IPA_NOT_FOUND: i64 = 4001;

/// Cookie-authenticated IPA session
pub struct IpaClient {
    http: Client,
    base_url: String,
    next_id: AtomicU64,
}

impl IpaClient {
    /// Log in with the configured password and keep the session cookie.
    pub async fn connect(config: &IpaConfig) -> Result<Self> {
        let server = config
            .server
            .as_deref()
            .ok_or_else(|| Error::config("ipa.server (IPA_SERVER) is not set"))?;
        let password = config
            .password
            .as_deref()
            .ok_or_else(|| Error::config("ipa.password (IPA_PASSWORD) is not set"))?;

        let mut builder = Client::builder()
            .timeout(config.timeout())
            .cookie_store(true);
        if let Some(ref path) = config.ca_cert {
            let pem = tokio::fs::read(path).await.map_err(|source| Error::ConfigFile {
                path: path.clone(),
                source,
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| Error::config(format!("invalid CA bundle {}: {}", path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = Self {
            http: builder.build()?,
            base_url: base_url(server),
            next_id: AtomicU64::new(0),
        };
        client.login(&config.username, password).await?;
        info!(server = %server, user = %config.username, "Logged in to IPA");
        Ok(client)
    }

    async fn login(&self, user: &str, password: &str) -> Result<()> {
        let url = format!("{}/session/login_password", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(REFERER, &self.base_url)
            .header(ACCEPT, "text/plain")
            .form(&[("user", user), ("password", password)])
            .send()
            .await
            .map_err(|e| Error::connectivity(format!("IPA login {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::connectivity(format!(
                "IPA login as {} failed: HTTP {}",
                user,
                response.status()
            )));
        }
        Ok(())
    }

    /// Run one command; `Ok(None)` when IPA reports NotFound.
    async fn call(&self, method: &str, arg: &str) -> Result<Option<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "method": method,
            "params": [[arg], {"all": true, "version": IPA_API_VERSION}],
            "id": id,
        });

        debug!(method = %method, arg = %arg, "IPA call");
        let response = self
            .http
            .post(format!("{}/session/json", self.base_url))
            .header(REFERER, &self.base_url)
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::connectivity(format!("IPA {} {}: {}", method, arg, e)))?;

        if !response.status().is_success() {
            return Err(Error::connectivity(format!(
                "IPA {} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        rpc_result(body)
    }
}

fn base_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    let server = if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    };
    if server.ends_with("/ipa") {
        server
    } else {
        format!("{}/ipa", server)
    }
}

/// Unwrap a JSON-RPC response to the entry it carries.
fn rpc_result(mut body: Value) -> Result<Option<Value>> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        if code == IPA_NOT_FOUND {
            return Ok(None);
        }
        return Err(Error::Ipa {
            code,
            name: str_field(error, "name").unwrap_or_default(),
            message: str_field(error, "message").unwrap_or_default(),
        });
    }

    match body.pointer_mut("/result/result") {
        Some(entry) if !entry.is_null() => Ok(Some(entry.take())),
        _ => Err(Error::connectivity("IPA response carried no result")),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// First string of a multi-valued attribute (IPA wraps most values in lists).
fn first_string(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn strings(entry: &Value, key: &str) -> Vec<String> {
    match entry.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn flag(entry: &Value, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Array(items)) => items.first().and_then(Value::as_bool).unwrap_or(false),
        _ => false,
    }
}

fn host_entry(entry: &Value, fqdn: &str) -> HostEntry {
    HostEntry {
        fqdn: first_string(entry, "fqdn").unwrap_or_else(|| fqdn.to_string()),
        has_keytab: flag(entry, "has_keytab"),
        has_password: flag(entry, "has_password"),
    }
}

fn service_entry(entry: &Value, principal: &str) -> ServiceEntry {
    let certificate_count = match entry.get("usercertificate") {
        Some(Value::Array(certs)) => certs.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    };
    ServiceEntry {
        principal: first_string(entry, "krbcanonicalname")
            .or_else(|| first_string(entry, "krbprincipalname"))
            .unwrap_or_else(|| principal.to_string()),
        has_keytab: flag(entry, "has_keytab"),
        managed_by: strings(entry, "managedby_host"),
        certificate_count,
    }
}

#[async_trait]
impl IdentityBackend for IpaClient {
    async fn find_host(&self, fqdn: &str) -> Result<Option<HostEntry>> {
        Ok(self
            .call("host_show", fqdn)
            .await?
            .map(|entry| host_entry(&entry, fqdn)))
    }

    async fn find_service(&self, principal: &str) -> Result<Option<ServiceEntry>> {
        Ok(self
            .call("service_show", principal)
            .await?
            .map(|entry| service_entry(&entry, principal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(
            base_url("ipa.tripleodomain.example.com"),
            "https://ipa.tripleodomain.example.com/ipa"
        );
        assert_eq!(base_url("http://ipa.local/ipa/"), "http://ipa.local/ipa");
    }

    #[test]
    fn not_found_is_none() {
        let body = json!({
            "result": null,
            "error": {
                "code": 4001,
                "name": "NotFound",
                "message": "undercloud.tripleodomain.example.com: host not found"
            },
            "id": 0
        });
        assert_eq!(rpc_result(body).unwrap(), None);
    }

    #[test]
    fn other_errors_are_reported() {
        let body = json!({
            "result": null,
            "error": {"code": 2100, "name": "ACIError", "message": "Insufficient access"},
            "id": 0
        });
        match rpc_result(body).unwrap_err() {
            Error::Ipa { code, name, .. } => {
                assert_eq!(code, 2100);
                assert_eq!(name, "ACIError");
            }
            other => panic!("Expected Ipa error, got {other}"),
        }
    }

    #[test]
    fn parses_host_show() {
        let body = json!({
            "result": {
                "result": {
                    "fqdn": ["overcloud-controller-0.tripleodomain.example.com"],
                    "has_keytab": true,
                    "has_password": false,
                    "managedby_host": ["overcloud-controller-0.tripleodomain.example.com"]
                },
                "value": "overcloud-controller-0.tripleodomain.example.com"
            },
            "error": null,
            "id": 0
        });
        let entry = rpc_result(body).unwrap().unwrap();
        let host = host_entry(&entry, "ignored");
        assert_eq!(host.fqdn, "overcloud-controller-0.tripleodomain.example.com");
        assert!(host.has_keytab);
        assert!(!host.has_password);
    }

    #[test]
    fn parses_service_show() {
        let entry = json!({
            "krbcanonicalname": ["HTTP/overcloud-controller-0.internal_api.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM"],
            "has_keytab": false,
            "managedby_host": [
                "overcloud-controller-0.internal_api.tripleodomain.example.com",
                "overcloud-controller-0.tripleodomain.example.com"
            ],
            "usercertificate": [{"__base64__": "MIIE..."}]
        });
        let service = service_entry(&entry, "fallback");
        assert!(service.principal.starts_with("HTTP/overcloud-controller-0.internal_api"));
        assert!(service.has_certificate());
        assert!(service.is_managed_by("overcloud-controller-0.tripleodomain.example.com"));
    }

    #[test]
    fn service_without_certificates() {
        let service = service_entry(&json!({"has_keytab": true}), "mysql/host@REALM");
        assert_eq!(service.principal, "mysql/host@REALM");
        assert_eq!(service.certificate_count, 0);
        assert!(service.has_keytab);
    }
}
