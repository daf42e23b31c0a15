//! Transport configuration for the publish client
//!
//! All validation happens at construction time: an invalid port, empty
//! credentials, or an unreadable pinned certificate bundle fail here with a
//! [`ConfigError`], never later at connect time. Certificate material is read
//! exactly once, when the configuration is built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default TLS port for MQTT brokers
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Configuration errors - always surfaced synchronously, never retried
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("broker host must not be empty")]
    EmptyHost,

    #[error("port 0 is not a valid TLS port")]
    InvalidPort,

    #[error("client identity must not be empty")]
    EmptyClientId,

    #[error("credentials require a non-empty {field}")]
    EmptyCredentialField { field: &'static str },

    #[error("certificate bundle {} is not readable", path.display())]
    CertificateUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate bundle {} contains no PEM certificate", path.display())]
    CertificateInvalid { path: PathBuf },

    #[error("system trust store unavailable: {reason}")]
    SystemTrustUnavailable { reason: String },

    #[error("system trust store failed ({system}) and no fallback bundle was supplied")]
    NoTrustMaterial { system: String },

    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

/// How the client decides which certificate authorities to trust
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustMode {
    /// Use the platform trust store
    SystemDefault,
    /// Trust exactly the PEM bundle at the given path
    PinnedCertificateFile(PathBuf),
}

/// Broker credentials
///
/// The secret is redacted from `Debug` output so it cannot leak through
/// logging or error text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// Immutable description of how to reach and trust the broker
///
/// Constructed only through [`TransportConfig::new`] (or the URL / fallback
/// variants), which validate every field. Construction either succeeds fully
/// or fails with [`ConfigError`] - there is no partially valid configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    host: String,
    port: u16,
    trust: TrustMode,
    credentials: Option<Credentials>,
    client_id: String,
    /// PEM bytes loaded at construction when trust is pinned
    ca_bundle: Option<Vec<u8>>,
}

impl TransportConfig {
    /// Build and validate a configuration
    ///
    /// A pinned certificate path is read here; `SystemDefault` probes the
    /// platform trust store so a missing store also fails fast.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        trust: TrustMode,
        credentials: Option<Credentials>,
        client_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        let client_id = client_id.into();

        if host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if let Some(creds) = &credentials {
            if creds.username.is_empty() {
                return Err(ConfigError::EmptyCredentialField { field: "username" });
            }
            if creds.secret.is_empty() {
                return Err(ConfigError::EmptyCredentialField { field: "secret" });
            }
        }

        let ca_bundle = match &trust {
            TrustMode::SystemDefault => {
                probe_system_roots().map_err(|reason| ConfigError::SystemTrustUnavailable {
                    reason,
                })?;
                None
            }
            TrustMode::PinnedCertificateFile(path) => Some(load_ca_bundle(path)?),
        };

        Ok(Self {
            host,
            port,
            trust,
            credentials,
            client_id,
            ca_bundle,
        })
    }

    /// Build a configuration from a `mqtts://` broker URL
    ///
    /// The port defaults to 8883 when the URL does not carry one. Plaintext
    /// schemes are rejected: this client only speaks TLS.
    pub fn from_url(
        broker_url: &str,
        trust: TrustMode,
        credentials: Option<Credentials>,
        client_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        if url.scheme() != "mqtts" && url.scheme() != "ssl" {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{broker_url} (scheme must be mqtts)"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_TLS_PORT);

        Self::new(host, port, trust, credentials, client_id)
    }

    /// Build a configuration with two-tier trust resolution
    ///
    /// Attempts the system trust store first; when loading it fails and a
    /// fallback bundle path was supplied, pins that bundle instead. Both
    /// failing is a [`ConfigError`].
    pub fn with_trust_fallback(
        host: impl Into<String>,
        port: u16,
        fallback_ca: Option<PathBuf>,
        credentials: Option<Credentials>,
        client_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let trust = select_trust_mode(probe_system_roots(), fallback_ca)?;
        Self::new(host, port, trust, credentials, client_id)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn trust(&self) -> &TrustMode {
        &self.trust
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// PEM bytes of the pinned bundle, when trust is pinned
    pub fn ca_bundle(&self) -> Option<&[u8]> {
        self.ca_bundle.as_deref()
    }
}

/// Pure trust selection: system store first, pinned bundle as fallback
///
/// `system_store` carries the probe result (number of roots found, or the
/// failure reason). Extracted from [`TransportConfig::with_trust_fallback`]
/// so the ordering is testable without touching the platform store.
fn select_trust_mode(
    system_store: Result<usize, String>,
    fallback_ca: Option<PathBuf>,
) -> Result<TrustMode, ConfigError> {
    match system_store {
        Ok(count) => {
            debug!(roots = count, "using system trust store");
            Ok(TrustMode::SystemDefault)
        }
        Err(system) => match fallback_ca {
            Some(path) => {
                debug!(path = %path.display(), "system trust store unavailable, pinning fallback bundle");
                Ok(TrustMode::PinnedCertificateFile(path))
            }
            None => Err(ConfigError::NoTrustMaterial { system }),
        },
    }
}

/// Probe the platform trust store, returning how many roots it holds
fn probe_system_roots() -> Result<usize, String> {
    match rustls_native_certs::load_native_certs() {
        Ok(certs) if certs.is_empty() => Err("trust store contains no certificates".to_string()),
        Ok(certs) => Ok(certs.len()),
        Err(e) => Err(e.to_string()),
    }
}

/// Read a PEM certificate bundle, verifying it holds certificate material
fn load_ca_bundle(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::CertificateUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    // Light sanity check: a usable bundle carries at least one PEM block
    let looks_like_pem = bytes
        .windows(b"BEGIN CERTIFICATE".len())
        .any(|w| w == b"BEGIN CERTIFICATE");
    if !looks_like_pem {
        return Err(ConfigError::CertificateInvalid {
            path: path.to_path_buf(),
        });
    }

    Ok(bytes)
}
