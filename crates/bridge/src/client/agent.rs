use tracing::debug;

use crate::client::RequestOptions;

pub const DEFAULT_PROTOCOL: &str = "http:";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_KEEP_ALIVE_MSECS: u64 = 1000;
pub const DEFAULT_MAX_FREE_SOCKETS: usize = 256;

/// Options of an [`Agent`]. Zero values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub protocol: String,
    pub default_port: u16,
    pub keep_alive: bool,
    pub keep_alive_msecs: u64,
    /// `None` means unbounded
    pub max_sockets: Option<usize>,
    pub max_free_sockets: usize,
    pub proxy: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_owned(),
            default_port: DEFAULT_PORT,
            keep_alive: false,
            keep_alive_msecs: DEFAULT_KEEP_ALIVE_MSECS,
            max_sockets: None,
            max_free_sockets: DEFAULT_MAX_FREE_SOCKETS,
            proxy: None,
        }
    }
}

impl AgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn keep_alive_msecs(mut self, msecs: u64) -> Self {
        self.keep_alive_msecs = msecs;
        self
    }

    #[must_use]
    pub fn max_sockets(mut self, max: usize) -> Self {
        self.max_sockets = Some(max);
        self
    }

    #[must_use]
    pub fn max_free_sockets(mut self, max: usize) -> Self {
        self.max_free_sockets = max;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Connection policy shared by client requests.
///
/// Connections are owned by the transport, so the agent only carries the
/// policy the request needs: protocol, default port, keep-alive and proxy.
/// The pool management methods exist for callers written against an agent
/// and do nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    protocol: String,
    default_port: u16,
    keep_alive: bool,
    keep_alive_msecs: u64,
    max_sockets: Option<usize>,
    max_free_sockets: usize,
    proxy: Option<String>,
}

impl Default for Agent {
    fn default() -> Self {
        Self::new(AgentOptions::default())
    }
}

impl Agent {
    pub fn new(options: AgentOptions) -> Self {
        let protocol = if options.protocol.is_empty() { DEFAULT_PROTOCOL.to_owned() } else { options.protocol };
        Self {
            protocol,
            default_port: if options.default_port == 0 { DEFAULT_PORT } else { options.default_port },
            keep_alive: options.keep_alive,
            keep_alive_msecs: if options.keep_alive_msecs == 0 { DEFAULT_KEEP_ALIVE_MSECS } else { options.keep_alive_msecs },
            max_sockets: options.max_sockets.filter(|max| *max > 0),
            max_free_sockets: if options.max_free_sockets == 0 { DEFAULT_MAX_FREE_SOCKETS } else { options.max_free_sockets },
            proxy: options.proxy,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn keep_alive_msecs(&self) -> u64 {
        self.keep_alive_msecs
    }

    pub fn max_sockets(&self) -> Option<usize> {
        self.max_sockets
    }

    pub fn max_free_sockets(&self) -> usize {
        self.max_free_sockets
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// The pool key of a request: `http:host:port:local_address`, followed by
    /// `:socket_path` for unix sockets.
    pub fn get_name(&self, options: &RequestOptions) -> String {
        let host = options.host.as_deref().unwrap_or("localhost");
        let port = options.port.map(|port| port.to_string()).unwrap_or_default();
        let local_address = options.local_address.as_deref().unwrap_or_default();

        let mut name = format!("http:{host}:{port}:{local_address}");
        if let Some(path) = &options.socket_path {
            name.push(':');
            name.push_str(&path.to_string_lossy());
        }
        name
    }

    pub fn add_request(&self) {
        debug!("agent add_request is a no-op");
    }

    pub fn remove_socket(&self) {
        debug!("agent remove_socket is a no-op");
    }

    pub fn keep_socket_alive(&self) -> bool {
        debug!("agent keep_socket_alive is a no-op");
        true
    }

    pub fn reuse_socket(&self) {
        debug!("agent reuse_socket is a no-op");
    }

    pub fn destroy(&self) {
        debug!("agent destroy is a no-op");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_options_fall_back_to_defaults() {
        let agent = Agent::new(AgentOptions::new().default_port(0).keep_alive_msecs(0).max_free_sockets(0).max_sockets(0));
        assert_eq!(agent.protocol(), DEFAULT_PROTOCOL);
        assert_eq!(agent.default_port(), DEFAULT_PORT);
        assert_eq!(agent.keep_alive_msecs(), 1000);
        assert_eq!(agent.max_free_sockets(), 256);
        assert_eq!(agent.max_sockets(), None);
        assert!(!agent.keep_alive());
    }

    #[test]
    fn name_is_built_from_request_target() {
        let agent = Agent::default();
        assert_eq!(agent.get_name(&RequestOptions::new()), "http:localhost::");

        let options = RequestOptions::new().host("example.com").port(8080).local_address("10.0.0.1");
        assert_eq!(agent.get_name(&options), "http:example.com:8080:10.0.0.1");

        let options = RequestOptions::new().socket_path("/run/app.sock");
        assert_eq!(agent.get_name(&options), "http:localhost:::/run/app.sock");
    }
}
