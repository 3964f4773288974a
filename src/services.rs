//! Service descriptors decoded from Nova server metadata.
//!
//! TripleO records the services a node runs in one of two ways:
//!
//! - **compact**: a single `compact_services` key whose value is a Python
//!   literal, typically `{'HTTP': ['ctlplane', 'internal_api'], ...}`
//!   (service to networks) or a list such as `[{'name': 'mysql'}]`
//! - **managed**: one `managed_service_<n>` key per service, each value a
//!   principal prefix such as `haproxy/overcloud.internalapi.example.com`
//!
//! Both decode to the same [`ServiceDescriptor`] list so the verification
//! engine never sees which encoding a node used.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::compute::ServerMetadata;
use crate::literal;
use crate::{Error, Result};

/// Metadata key holding the compact encoding.
pub const COMPACT_SERVICES_KEY: &str = "compact_services";

/// Prefix shared by every managed-service key.
pub const MANAGED_SERVICE_PREFIX: &str = "managed_service_";

/// Derive a service principal: `service/host.domain@REALM`.
///
/// This is a plain template. Inputs are not validated or normalized, so a
/// malformed name yields a principal IPA will not find.
pub fn service_principal(service: &str, host: &str, domain: &str, realm: &str) -> String {
    format!("{}/{}.{}@{}", service, host, domain, realm)
}

/// Host half of a service principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum ServiceHost {
    /// Host relative to the deployment domain (`overcloud-controller-0` or
    /// `overcloud-controller-0.internal_api`).
    Short(String),
    /// Already fully qualified; used as-is.
    Qualified(String),
}

impl ServiceHost {
    /// Fully-qualified host name under `domain`.
    pub fn fqdn(&self, domain: &str) -> String {
        match self {
            ServiceHost::Short(host) => format!("{}.{}", host, domain),
            ServiceHost::Qualified(fqdn) => fqdn.clone(),
        }
    }
}

/// One service expected to be registered in IPA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceDescriptor {
    pub service: String,
    pub host: ServiceHost,
}

impl ServiceDescriptor {
    pub fn new(service: impl Into<String>, host: ServiceHost) -> Self {
        Self {
            service: service.into(),
            host,
        }
    }

    /// Host the service principal is bound to.
    pub fn fqdn(&self, domain: &str) -> String {
        self.host.fqdn(domain)
    }

    pub fn principal(&self, domain: &str, realm: &str) -> String {
        match &self.host {
            ServiceHost::Short(host) => service_principal(&self.service, host, domain, realm),
            ServiceHost::Qualified(fqdn) => format!("{}/{}@{}", self.service, fqdn, realm),
        }
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            ServiceHost::Short(host) => write!(f, "{}/{}", self.service, host),
            ServiceHost::Qualified(fqdn) => write!(f, "{}/{}", self.service, fqdn),
        }
    }
}

/// Raw service data found in a server's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEncoding {
    /// Literal-encoded value of `compact_services`.
    Compact(String),
    /// Values of every `managed_service_*` key.
    Managed(Vec<String>),
}

impl ServiceEncoding {
    /// Pick the encoding by key presence; compact wins when both exist.
    pub fn detect(metadata: &ServerMetadata) -> Self {
        match metadata.get(COMPACT_SERVICES_KEY) {
            Some(raw) => ServiceEncoding::Compact(raw.clone()),
            None => Self::managed(metadata),
        }
    }

    /// The compact encoding, which must be present.
    pub fn compact(metadata: &ServerMetadata) -> Result<Self> {
        metadata
            .get(COMPACT_SERVICES_KEY)
            .map(|raw| ServiceEncoding::Compact(raw.clone()))
            .ok_or_else(|| Error::not_found("metadata key", COMPACT_SERVICES_KEY))
    }

    /// The managed encoding. Keys without the prefix are ignored.
    pub fn managed(metadata: &ServerMetadata) -> Self {
        ServiceEncoding::Managed(managed_values(metadata).cloned().collect())
    }

    /// Normalize into descriptors for services running on `host`.
    pub fn decode(&self, host: &str) -> Result<Vec<ServiceDescriptor>> {
        match self {
            ServiceEncoding::Compact(raw) => decode_compact_value(&literal::parse(raw)?, host),
            ServiceEncoding::Managed(values) => Ok(values
                .iter()
                .map(|value| decode_managed_value(value, host))
                .collect()),
        }
    }
}

/// Decode `compact_services`. A missing key is a lookup failure.
pub fn decode_compact(metadata: &ServerMetadata, host: &str) -> Result<Vec<ServiceDescriptor>> {
    ServiceEncoding::compact(metadata)?.decode(host)
}

/// Decode every `managed_service_*` entry. Order is not significant.
pub fn decode_managed(metadata: &ServerMetadata, host: &str) -> Vec<ServiceDescriptor> {
    managed_values(metadata)
        .map(|value| decode_managed_value(value, host))
        .collect()
}

/// Decode whichever encoding the metadata carries.
pub fn decode(metadata: &ServerMetadata, host: &str) -> Result<Vec<ServiceDescriptor>> {
    ServiceEncoding::detect(metadata).decode(host)
}

fn managed_values(metadata: &ServerMetadata) -> impl Iterator<Item = &String> {
    metadata
        .iter()
        .filter(|(key, _)| key.starts_with(MANAGED_SERVICE_PREFIX))
        .map(|(_, value)| value)
}

fn decode_managed_value(value: &str, host: &str) -> ServiceDescriptor {
    match value.split_once('/') {
        Some((service, fqdn)) => {
            ServiceDescriptor::new(service, ServiceHost::Qualified(fqdn.to_string()))
        }
        None => ServiceDescriptor::new(value, ServiceHost::Short(host.to_string())),
    }
}

fn decode_compact_value(value: &Value, host: &str) -> Result<Vec<ServiceDescriptor>> {
    let mut services = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(name) => {
                        services.push(ServiceDescriptor::new(
                            name.as_str(),
                            ServiceHost::Short(host.to_string()),
                        ));
                    }
                    Value::Object(entry) => {
                        let name = entry.get("name").and_then(Value::as_str).ok_or_else(|| {
                            Error::decode(format!("compact service entry has no name: {}", item))
                        })?;
                        let networks = entry.get("networks").or_else(|| entry.get("network"));
                        push_per_network(&mut services, name, host, networks)?;
                    }
                    other => {
                        return Err(Error::decode(format!(
                            "unsupported compact service entry: {}",
                            other
                        )))
                    }
                }
            }
        }
        Value::Object(map) => {
            for (name, networks) in map {
                push_per_network(&mut services, name, host, Some(networks))?;
            }
        }
        other => {
            return Err(Error::decode(format!(
                "compact services must be a list or dict, got {}",
                other
            )))
        }
    }
    Ok(services)
}

/// One descriptor per network (`host.network`), or one on `host` itself.
fn push_per_network(
    services: &mut Vec<ServiceDescriptor>,
    name: &str,
    host: &str,
    networks: Option<&Value>,
) -> Result<()> {
    let networks: Vec<&str> = match networks {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(network)) => vec![network.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|n| {
                n.as_str().ok_or_else(|| {
                    Error::decode(format!("network of service {} is not a string: {}", name, n))
                })
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(Error::decode(format!(
                "networks of service {} must be a list: {}",
                name, other
            )))
        }
    };

    if networks.is_empty() {
        services.push(ServiceDescriptor::new(
            name,
            ServiceHost::Short(host.to_string()),
        ));
    }
    for network in networks {
        services.push(ServiceDescriptor::new(
            name,
            ServiceHost::Short(format!("{}.{}", host, network)),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "overcloud-controller-0";
    const DOMAIN: &str = "tripleodomain.example.com";
    const REALM: &str = "TRIPLEODOMAIN.EXAMPLE.COM";

    fn metadata(entries: &[(&str, &str)]) -> ServerMetadata {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sorted(mut services: Vec<ServiceDescriptor>) -> Vec<ServiceDescriptor> {
        services.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        services
    }

    #[test]
    fn principal_template_is_exact() {
        assert_eq!(
            service_principal("mysql", HOST, DOMAIN, REALM),
            "mysql/overcloud-controller-0.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM"
        );
    }

    #[test]
    fn principal_is_deterministic() {
        let first = service_principal("HTTP", "h", "d", "R");
        let second = service_principal("HTTP", "h", "d", "R");
        assert_eq!(first, second);
        assert_eq!(first, "HTTP/h.d@R");
    }

    #[test]
    fn qualified_names_are_not_requalified() {
        // the template does not parse, so an fqdn service name is kept verbatim
        assert_eq!(
            service_principal("HTTP/already.example.com", HOST, DOMAIN, REALM),
            "HTTP/already.example.com/overcloud-controller-0.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM"
        );

        let managed = ServiceDescriptor::new(
            "haproxy",
            ServiceHost::Qualified("overcloud.internalapi.tripleodomain.example.com".into()),
        );
        assert_eq!(
            managed.principal(DOMAIN, REALM),
            "haproxy/overcloud.internalapi.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM"
        );
    }

    #[test]
    fn compact_and_managed_converge() {
        let compact = decode_compact(
            &metadata(&[(COMPACT_SERVICES_KEY, "[{'name': 'mysql'}]")]),
            HOST,
        )
        .unwrap();
        let managed = decode_managed(&metadata(&[("managed_service_0", "mysql")]), HOST);

        assert_eq!(compact.len(), 1);
        assert_eq!(compact, managed);
        assert_eq!(
            compact[0].principal(DOMAIN, REALM),
            managed[0].principal(DOMAIN, REALM)
        );
    }

    #[test]
    fn compact_service_map_expands_networks() {
        let services = decode_compact(
            &metadata(&[(
                COMPACT_SERVICES_KEY,
                "{'HTTP': ['ctlplane', 'internal_api'], 'mysql': ['internal_api']}",
            )]),
            HOST,
        )
        .unwrap();

        let principals: Vec<String> = services
            .iter()
            .map(|s| s.principal(DOMAIN, REALM))
            .collect();
        assert_eq!(
            principals,
            vec![
                "HTTP/overcloud-controller-0.ctlplane.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM",
                "HTTP/overcloud-controller-0.internal_api.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM",
                "mysql/overcloud-controller-0.internal_api.tripleodomain.example.com@TRIPLEODOMAIN.EXAMPLE.COM",
            ]
        );
    }

    #[test]
    fn compact_list_entries_accept_networks() {
        let services = decode_compact(
            &metadata(&[(
                COMPACT_SERVICES_KEY,
                "[{'name': 'rabbitmq', 'networks': ['internal_api']}, 'novnc-proxy']",
            )]),
            HOST,
        )
        .unwrap();
        assert_eq!(
            services,
            vec![
                ServiceDescriptor::new(
                    "rabbitmq",
                    ServiceHost::Short("overcloud-controller-0.internal_api".into())
                ),
                ServiceDescriptor::new("novnc-proxy", ServiceHost::Short(HOST.into())),
            ]
        );
    }

    #[test]
    fn missing_compact_key_is_an_error() {
        let err = decode_compact(&metadata(&[("managed_service_0", "mysql")]), HOST).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.to_string().contains(COMPACT_SERVICES_KEY));
    }

    #[test]
    fn malformed_compact_value_is_a_decode_error() {
        for raw in ["[{'name': 'mysql'}", "__import__('os')", "42", "[{'port': 3306}]", "[[1]]"] {
            let err = decode_compact(&metadata(&[(COMPACT_SERVICES_KEY, raw)]), HOST).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "{raw} gave {err}");
        }
    }

    #[test]
    fn managed_ignores_other_keys() {
        let services = decode_managed(
            &metadata(&[
                (COMPACT_SERVICES_KEY, "[{'name': 'mysql'}]"),
                ("ipa_enroll", "True"),
                ("managed_service_haproxyctlplane", "haproxy/overcloud.ctlplane.tripleodomain.example.com"),
                ("managed_service_mysqlinternal_api", "mysql/overcloud.internalapi.tripleodomain.example.com"),
            ]),
            HOST,
        );

        assert_eq!(
            sorted(services),
            vec![
                ServiceDescriptor::new(
                    "haproxy",
                    ServiceHost::Qualified("overcloud.ctlplane.tripleodomain.example.com".into())
                ),
                ServiceDescriptor::new(
                    "mysql",
                    ServiceHost::Qualified("overcloud.internalapi.tripleodomain.example.com".into())
                ),
            ]
        );
    }

    #[test]
    fn managed_without_entries_is_empty() {
        let services = decode_managed(&metadata(&[("ipa_enroll", "True")]), HOST);
        assert!(services.is_empty());
    }

    #[test]
    fn managed_encoding_agrees_with_decode_managed() {
        let metadata = metadata(&[
            ("compact_services", "['mysql']"),
            ("managed_service_0", "mysql"),
            ("managed_service_1", "haproxy/overcloud.tripleodomain.example.com"),
            ("other_managed_service_2", "rabbitmq"),
        ]);
        let ServiceEncoding::Managed(values) = ServiceEncoding::managed(&metadata) else {
            panic!("Expected managed encoding");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(
            ServiceEncoding::Managed(values).decode(HOST).unwrap(),
            decode_managed(&metadata, HOST)
        );
    }

    #[test]
    fn detect_prefers_compact() {
        let both = metadata(&[
            (COMPACT_SERVICES_KEY, "['mysql']"),
            ("managed_service_0", "haproxy/vip.example.com"),
        ]);
        assert_eq!(
            ServiceEncoding::detect(&both),
            ServiceEncoding::Compact("['mysql']".into())
        );

        let managed_only = metadata(&[("managed_service_0", "haproxy/vip.example.com")]);
        assert_eq!(
            ServiceEncoding::detect(&managed_only),
            ServiceEncoding::Managed(vec!["haproxy/vip.example.com".into()])
        );
        assert_eq!(decode(&managed_only, HOST).unwrap().len(), 1);
    }
}
