use std::io;
use thiserror::Error;

/// Boxed error used where a transport hands back an opaque cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top level error of the bridge.
///
/// Validation, protocol and state errors are returned synchronously from the
/// offending call. Transport errors only ever reach the user through a message
/// `Error` event. Abort and timeout are re-expressed as lifecycle events and are
/// never surfaced as generic errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("validation error: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("state error: {source}")]
    State {
        #[from]
        source: StateError,
    },

    #[error("the operation was aborted")]
    Aborted,

    #[error("the operation timed out")]
    TimedOut,
}

impl BridgeError {
    /// Returns true if this error is an artifact of an abort rather than a real failure.
    pub fn is_abort(&self) -> bool {
        match self {
            BridgeError::Aborted => true,
            BridgeError::Transport { source } => source.is_abort(),
            _ => false,
        }
    }

    /// Returns true if this error comes from an expired timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::TimedOut)
    }
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid header name: {name:?}")]
    InvalidHeaderName { name: String },

    #[error("invalid value for header {name:?}: {reason}")]
    InvalidHeaderValue { name: String, reason: String },

    #[error("invalid http method token: {method:?}")]
    InvalidMethod { method: String },

    #[error("request path contains unescaped characters: {path:?}")]
    InvalidPath { path: String },

    #[error("protocol {protocol:?} not supported, expected {expected:?}")]
    InvalidProtocol { protocol: String, expected: String },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid tls option `{option}`: {reason}")]
    InvalidTlsOption { option: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid_header_name<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderName { name: name.to_string() }
    }

    pub fn invalid_header_value<N: ToString, S: ToString>(name: N, reason: S) -> Self {
        Self::InvalidHeaderValue { name: name.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_method<S: ToString>(method: S) -> Self {
        Self::InvalidMethod { method: method.to_string() }
    }

    pub fn invalid_path<S: ToString>(path: S) -> Self {
        Self::InvalidPath { path: path.to_string() }
    }

    pub fn invalid_url<U: ToString, S: ToString>(url: U, reason: S) -> Self {
        Self::InvalidUrl { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_tls_option<S: ToString>(option: &'static str, reason: S) -> Self {
        Self::InvalidTlsOption { option, reason: reason.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("status code must be between 100 and 999, current: {status}")]
    InvalidStatus { status: u16 },

    #[error("raw headers must have an even number of elements, current: {len}")]
    OddRawHeaders { len: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to issue request: {reason}")]
    Issue { reason: String },

    #[error("failed to serve: {reason}")]
    Serve { reason: String },

    #[error("body stream failed: {reason}")]
    Body { reason: String },

    #[error("request aborted by the transport")]
    Aborted,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Other(BoxError),
}

impl TransportError {
    pub fn issue<S: ToString>(reason: S) -> Self {
        Self::Issue { reason: reason.to_string() }
    }

    pub fn serve<S: ToString>(reason: S) -> Self {
        Self::Serve { reason: reason.to_string() }
    }

    pub fn body<S: ToString>(reason: S) -> Self {
        Self::Body { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Abort artifacts are reported by transports either explicitly or as an
    /// interrupted io operation.
    pub fn is_abort(&self) -> bool {
        match self {
            TransportError::Aborted => true,
            TransportError::Io { source } => source.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

/// Programming errors: the message was driven in an order it does not accept.
///
/// Every one of these is rejected without changing the message's state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("write after finish")]
    WriteAfterFinish,

    #[error("message already finished")]
    AlreadyFinished,

    #[error("cannot modify headers after they are sent")]
    HeadersSent,

    #[error("body has already been taken")]
    BodyTaken,

    #[error("server is not running")]
    NotRunning,

    #[error("server is already listening")]
    AlreadyListening,
}
