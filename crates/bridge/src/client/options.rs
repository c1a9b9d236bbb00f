use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::Agent;
use crate::protocol::header::HeaderInit;
use crate::server::TlsOptions;

/// Everything describing one client request.
///
/// Unset fields are filled from the request's [`Agent`]: protocol and default
/// port. `host` defaults to `localhost`, `path` to `/` and `method` to `GET`.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub default_port: Option<u16>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub headers: HeaderInit,
    /// `user:password`, sent as basic authorization
    pub auth: Option<String>,
    pub agent: Option<Arc<Agent>>,
    /// milliseconds, `0` or `None` leaves the timer off
    pub timeout: Option<u64>,
    pub signal: Option<CancellationToken>,
    pub socket_path: Option<PathBuf>,
    pub tls: Option<TlsOptions>,
    pub local_address: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
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
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: impl Into<HeaderInit>) -> Self {
        self.headers = headers.into();
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    #[must_use]
    pub fn agent(mut self, agent: Arc<Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    #[must_use]
    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }
}
