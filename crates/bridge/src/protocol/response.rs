//! Response heads as handed to a transport.
//!
//! A head is an `http::Response<()>`: the body is attached by the transport
//! once the [`Reply`](crate::connection::Reply) arrives.

use http::{HeaderMap, Response, StatusCode};

use crate::connection::ReasonPhrase;

/// Type alias for HTTP response headers.
///
/// `http::Response<()>` with an empty body placeholder.
pub type ResponseHead = Response<()>;

/// Assembles a head. A reason phrase differing from the canonical one travels
/// in the extensions.
pub(crate) fn build_head(status: StatusCode, reason: &str, headers: HeaderMap) -> ResponseHead {
    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    *head.headers_mut() = headers;
    if status.canonical_reason() != Some(reason) {
        head.extensions_mut().insert(ReasonPhrase(reason.to_owned()));
    }
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_reason_is_kept() {
        let head = build_head(StatusCode::OK, "Fine", HeaderMap::new());
        assert_eq!(head.extensions().get::<ReasonPhrase>(), Some(&ReasonPhrase("Fine".into())));

        let head = build_head(StatusCode::NOT_FOUND, "Not Found", HeaderMap::new());
        assert_eq!(head.status(), StatusCode::NOT_FOUND);
        assert!(head.extensions().get::<ReasonPhrase>().is_none());
    }
}
