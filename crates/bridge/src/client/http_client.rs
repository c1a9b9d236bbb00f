use std::fmt;
use std::sync::Arc;

use http::Uri;
use http::uri::Scheme;

use crate::client::{Agent, ClientRequest, RequestOptions};
use crate::connection::RequestIssuer;
use crate::protocol::{BridgeError, ValidationError};

/// Entry point for client requests.
///
/// Holds the default [`Agent`] and the [`RequestIssuer`] and injects both
/// into every [`ClientRequest`] it creates. [`RequestOptions::agent`]
/// overrides the agent per request.
#[derive(Clone)]
pub struct Client {
    issuer: Arc<dyn RequestIssuer>,
    agent: Arc<Agent>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("agent", &self.agent).finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(issuer: Arc<dyn RequestIssuer>) -> Self {
        Self::with_agent(issuer, Arc::new(Agent::default()))
    }

    pub fn with_agent(issuer: Arc<dyn RequestIssuer>, agent: Arc<Agent>) -> Self {
        Self { issuer, agent }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Creates a request. Nothing is issued before the body is promoted or
    /// finished.
    pub fn request(&self, options: RequestOptions) -> Result<ClientRequest, BridgeError> {
        ClientRequest::new(options, Arc::clone(&self.agent), Arc::clone(&self.issuer))
    }

    /// Creates a request to `url`. Protocol, host, port and path come from the
    /// url and override those in `options`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidUrl`] for a url that does not parse or has no
    /// host, and anything [`Client::request`] rejects.
    pub fn request_url(&self, url: &str, options: RequestOptions) -> Result<ClientRequest, BridgeError> {
        let uri: Uri = url.parse().map_err(|e| ValidationError::invalid_url(url, e))?;
        let Some(host) = uri.host() else {
            return Err(ValidationError::invalid_url(url, "missing host").into());
        };

        let mut options = options.host(host);
        if let Some(scheme) = uri.scheme() {
            options = options.protocol(format!("{}:", scheme.as_str()));
            if *scheme == Scheme::HTTPS && options.default_port.is_none() {
                options = options.default_port(443);
            }
        }
        if let Some(port) = uri.port_u16() {
            options = options.port(port);
        }
        if let Some(path) = uri.path_and_query() {
            options = options.path(path.as_str());
        }
        self.request(options)
    }

    /// Issues a `GET` to `url` right away.
    pub fn get(&self, url: &str) -> Result<ClientRequest, BridgeError> {
        let mut request = self.request_url(url, RequestOptions::new().method("GET"))?;
        request.finish()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundRequest;
    use crate::protocol::TransportError;
    use crate::protocol::body::PullSource;
    use async_trait::async_trait;
    use http::Response;

    struct Refusing;

    #[async_trait]
    impl RequestIssuer for Refusing {
        async fn issue(&self, _request: OutboundRequest) -> Result<Response<Box<dyn PullSource>>, TransportError> {
            Err(TransportError::issue("refused"))
        }
    }

    #[test]
    fn url_fills_request_target() {
        let client = Client::new(Arc::new(Refusing));

        let request = client.request_url("http://example.com:8080/a/b?c=d", RequestOptions::new()).unwrap();
        assert_eq!(request.host(), "example.com");
        assert_eq!(request.port(), 8080);
        assert_eq!(request.path(), "/a/b?c=d");
        assert_eq!(request.url(), "http://example.com:8080/a/b?c=d");
    }

    #[test]
    fn bad_urls_are_rejected() {
        let client = Client::new(Arc::new(Refusing));

        let err = client.request_url("/relative", RequestOptions::new()).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { source: ValidationError::InvalidUrl { .. } }));

        let err = client.request_url("https://example.com/", RequestOptions::new()).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { source: ValidationError::InvalidProtocol { .. } }));
    }
}
