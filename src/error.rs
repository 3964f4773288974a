//! Error types for deployment verification

use std::path::PathBuf;

/// Verification Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Verification errors
///
/// Every variant is local to one scenario: the suite turns it into that
/// scenario's failure and moves on to the next one.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The compute API or IPA returned no matching entry
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Compact service metadata is not literal structured data
    #[error("decode error: {0}")]
    Decode(String),

    /// Compute API, IPA or the remote channel could not be reached
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Host is not enrolled in the realm
    #[error("host {fqdn} is not registered with IPA")]
    Enrollment { fqdn: String },

    /// Host or service entry exists but no keytab was issued for it
    #[error("no keytab issued for {principal}")]
    KeytabMissing { principal: String },

    /// certmonger is not tracking the certificate
    #[error("certificate {tag} is not tracked on {target}")]
    CertNotTracked { tag: String, target: String },

    /// Any other unmet expectation about the deployment
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// IPA JSON-RPC returned an error other than NotFound
    #[error("IPA error {code} ({name}): {message}")]
    Ipa {
        code: i64,
        name: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode(message.into())
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Error::Connectivity(message.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Error::Assertion(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// True when the deployment was reachable but not in the expected state.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Error::Enrollment { .. }
                | Error::KeytabMissing { .. }
                | Error::CertNotTracked { .. }
                | Error::Assertion(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Connectivity(e.to_string())
    }
}
