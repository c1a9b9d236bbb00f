use std::path::PathBuf;

use crate::ensure;
use crate::protocol::ValidationError;

/// TLS material handed to the transport as is.
///
/// Each entry holds PEM text; the bridge only checks that entries are not
/// empty. TLS is enabled as soon as any key, certificate or CA is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub key: Vec<String>,
    pub cert: Vec<String>,
    pub ca: Vec<String>,
    pub passphrase: Option<String>,
    pub server_name: Option<String>,
    pub reject_unauthorized: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self { key: Vec::new(), cert: Vec::new(), ca: Vec::new(), passphrase: None, server_name: None, reject_unauthorized: true }
    }
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key.push(key.into());
        self
    }

    #[must_use]
    pub fn cert(mut self, cert: impl Into<String>) -> Self {
        self.cert.push(cert.into());
        self
    }

    #[must_use]
    pub fn ca(mut self, ca: impl Into<String>) -> Self {
        self.ca.push(ca.into());
        self
    }

    #[must_use]
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    #[must_use]
    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    #[must_use]
    pub fn reject_unauthorized(mut self, reject_unauthorized: bool) -> Self {
        self.reject_unauthorized = reject_unauthorized;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !(self.key.is_empty() && self.cert.is_empty() && self.ca.is_empty())
    }

    /// Checks that every provided entry carries material.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (option, entries) in [("key", &self.key), ("cert", &self.cert), ("ca", &self.ca)] {
            for entry in entries {
                ensure!(!entry.trim().is_empty(), ValidationError::invalid_tls_option(option, "must be a non-empty string"));
            }
        }
        if let Some(passphrase) = &self.passphrase {
            ensure!(!passphrase.is_empty(), ValidationError::invalid_tls_option("passphrase", "must be a non-empty string"));
        }
        if let Some(server_name) = &self.server_name {
            ensure!(!server_name.is_empty(), ValidationError::invalid_tls_option("server_name", "must be a non-empty string"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub tls: Option<TlsOptions>,
    /// per request timer armed on every incoming request, `0` keeps it off
    pub request_timeout_ms: u64,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }
}

/// Where and how to listen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// unix domain socket path, used instead of host and port
    pub path: Option<PathBuf>,
    pub tls: Option<TlsOptions>,
    pub reuse_port: bool,
}

impl ListenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    /// Without a port or a path, listens on an ephemeral port.
    pub(crate) fn normalized(mut self) -> Self {
        if self.port.is_none() && self.path.is_none() {
            self.port = Some(0);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_is_enabled_by_any_material() {
        assert!(!TlsOptions::new().is_enabled());
        assert!(TlsOptions::new().ca("-----BEGIN CERTIFICATE-----").is_enabled());
    }

    #[test]
    fn empty_tls_entries_are_rejected() {
        let err = TlsOptions::new().key("pem").cert(" ").validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTlsOption { option: "cert", .. }));
        assert!(TlsOptions::new().key("pem").cert("pem").validate().is_ok());
    }

    #[test]
    fn listen_defaults_to_ephemeral_port() {
        assert_eq!(ListenConfig::new().normalized().port, Some(0));
        assert_eq!(ListenConfig::new().port(8080).normalized().port, Some(8080));

        let unix = ListenConfig::new().path("/tmp/bridge.sock").normalized();
        assert_eq!(unix.port, None);
    }
}
