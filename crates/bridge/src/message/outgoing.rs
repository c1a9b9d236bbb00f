use http::HeaderMap;

use crate::lifecycle::{AbortCoordinator, Lifecycle};
use crate::protocol::header::{FieldValue, HeaderInit, HeaderStore, IntoFieldValue, Materialized};
use crate::protocol::{BridgeError, ValidationError};

/// State shared by every outgoing message: its headers, created on first
/// mutation, its lifecycle and its abort coordinator.
#[derive(Debug)]
pub struct MessageCore {
    headers: Option<HeaderStore>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) abort: AbortCoordinator,
}

impl MessageCore {
    pub(crate) fn new(abort: AbortCoordinator) -> Self {
        Self { headers: None, lifecycle: Lifecycle::new(), abort }
    }

    pub(crate) fn with_headers(headers: HeaderStore, abort: AbortCoordinator) -> Self {
        Self { headers: Some(headers), lifecycle: Lifecycle::new(), abort }
    }

    pub fn headers(&self) -> Option<&HeaderStore> {
        self.headers.as_ref()
    }

    pub(crate) fn headers_mut(&mut self) -> Result<&mut HeaderStore, BridgeError> {
        self.lifecycle.ensure_headers_mutable()?;
        Ok(self.headers.get_or_insert_with(HeaderStore::new))
    }

    /// Applies `init` on a copy and commits only if every entry is valid.
    pub(crate) fn apply_headers(&mut self, init: HeaderInit) -> Result<(), BridgeError> {
        self.lifecycle.ensure_headers_mutable()?;
        if init.is_none() {
            return Ok(());
        }
        let mut store = self.headers.clone().unwrap_or_default();
        init.apply(&mut store)?;
        self.headers = Some(store);
        Ok(())
    }

    pub(crate) fn header_map(&self) -> Result<HeaderMap, ValidationError> {
        match &self.headers {
            Some(store) => store.to_header_map(),
            None => Ok(HeaderMap::new()),
        }
    }
}

/// Header and lifecycle accessors shared by [`ServerResponse`] and
/// [`ClientRequest`].
///
/// Header mutations are rejected with [`StateError::HeadersSent`] once the
/// head was handed to the transport.
///
/// [`ServerResponse`]: crate::server::ServerResponse
/// [`ClientRequest`]: crate::client::ClientRequest
/// [`StateError::HeadersSent`]: crate::protocol::StateError::HeadersSent
pub trait OutgoingMessage {
    fn core(&self) -> &MessageCore;

    fn core_mut(&mut self) -> &mut MessageCore;

    fn set_header<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<(), BridgeError> {
        self.core_mut().headers_mut()?.set(name, value)?;
        Ok(())
    }

    fn append_header<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<(), BridgeError> {
        self.core_mut().headers_mut()?.append(name, value)?;
        Ok(())
    }

    fn get_header(&self, name: &str) -> Option<String> {
        self.core().headers().and_then(|store| store.get(name))
    }

    fn has_header(&self, name: &str) -> bool {
        self.core().headers().is_some_and(|store| store.has(name))
    }

    fn remove_header(&mut self, name: &str) -> Result<bool, BridgeError> {
        Ok(self.core_mut().headers_mut()?.delete(name))
    }

    fn header_names(&self) -> Vec<String> {
        self.core().headers().map(HeaderStore::names).unwrap_or_default()
    }

    /// The materialized headers: lowercase map plus raw pairs.
    fn headers(&self) -> Materialized {
        self.core().headers().map(HeaderStore::materialize).unwrap_or_default()
    }

    fn header_value(&self, name: &str) -> Option<FieldValue> {
        self.headers().get(name).cloned()
    }

    fn headers_sent(&self) -> bool {
        self.core().lifecycle.headers_sent()
    }

    fn is_finished(&self) -> bool {
        self.core().lifecycle.is_finished()
    }

    /// Arms the message timer; `0` disarms it.
    fn set_timeout(&self, ms: u64) {
        self.core().abort.set_timeout(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::events;
    use crate::protocol::StateError;

    struct Plain {
        core: MessageCore,
    }

    impl OutgoingMessage for Plain {
        fn core(&self) -> &MessageCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut MessageCore {
            &mut self.core
        }
    }

    fn plain() -> Plain {
        let (sink, _events) = events();
        Plain { core: MessageCore::new(AbortCoordinator::new(sink)) }
    }

    #[test]
    fn headers_are_created_lazily() {
        let mut message = plain();
        assert!(message.core().headers().is_none());
        assert!(message.header_names().is_empty());
        assert_eq!(message.get_header("x-test"), None);

        message.set_header("X-Test", "a").unwrap();
        assert_eq!(message.get_header("x-test").as_deref(), Some("a"));
        assert!(message.has_header("X-TEST"));
    }

    #[test]
    fn mutation_after_headers_sent_is_rejected() {
        let mut message = plain();
        message.set_header("X-A", "1").unwrap();
        message.core_mut().lifecycle.send_headers();

        let err = message.set_header("X-A", "2").unwrap_err();
        assert!(matches!(err, BridgeError::State { source: StateError::HeadersSent }));
        assert!(message.remove_header("X-A").is_err());
        assert_eq!(message.get_header("x-a").as_deref(), Some("1"));
    }

    #[test]
    fn invalid_init_commits_nothing() {
        let mut message = plain();
        message.set_header("X-A", "1").unwrap();

        let init = HeaderInit::from(vec![("X-A", "2"), ("bad name", "3")]);
        assert!(message.core_mut().apply_headers(init).is_err());
        assert_eq!(message.get_header("x-a").as_deref(), Some("1"));
    }
}
