use std::fmt;
use std::mem;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::ensure;
use crate::protocol::body::direct_stream::DirectStream;
use crate::protocol::body::feed::StreamFeed;
use crate::protocol::body::outbound::OutboundBody;
use crate::protocol::{BridgeError, StateError};

enum UploadState {
    Buffering(Vec<Bytes>),
    Streaming(StreamFeed),
    Finished,
}

impl fmt::Debug for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Buffering(chunks) => write!(f, "Buffering({} chunks)", chunks.len()),
            UploadState::Streaming(_) => f.write_str("Streaming"),
            UploadState::Finished => f.write_str("Finished"),
        }
    }
}

/// Result of finishing an upload.
#[derive(Debug)]
pub enum UploadReady {
    /// Nothing was issued yet: issue the request now with this body.
    Issue(Option<OutboundBody>),
    /// The request is already in flight with a streaming body, which is now
    /// closed.
    Closed,
}

/// Request body of a client message, materialized before issuance.
///
/// A single chunk stays in memory and the request is issued on `finish` with
/// a complete body. A second chunk promotes the upload: the caller receives a
/// [`DirectStream`] to issue right away, which replays the buffered chunks
/// first and then everything written later.
#[derive(Debug)]
pub struct PendingUpload {
    state: UploadState,
    has_body: bool,
}

impl Default for PendingUpload {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PendingUpload {
    pub fn new(has_body: bool) -> Self {
        Self { state: UploadState::Buffering(Vec::new()), has_body }
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, UploadState::Streaming(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, UploadState::Finished)
    }

    /// Buffers or forwards one chunk. Returns the stream to issue the request
    /// with if this write promoted the upload.
    pub fn write(&mut self, chunk: Bytes) -> Result<Option<DirectStream>, BridgeError> {
        self.writev(vec![chunk])
    }

    pub fn writev(&mut self, chunks: Vec<Bytes>) -> Result<Option<DirectStream>, BridgeError> {
        ensure!(!self.is_finished(), StateError::WriteAfterFinish);

        if !self.has_body {
            trace!(chunks = chunks.len(), "discard body written to a request without body");
            return Ok(None);
        }

        match &mut self.state {
            UploadState::Streaming(feed) => {
                for chunk in chunks {
                    feed.push(chunk);
                }
                Ok(None)
            }
            UploadState::Buffering(buffered) => {
                buffered.extend(chunks);
                if buffered.len() < 2 {
                    return Ok(None);
                }

                let replay = mem::take(buffered);
                debug!(chunks = replay.len(), "promote request body to streaming");
                let (feed, stream) = StreamFeed::promote(replay);
                self.state = UploadState::Streaming(feed);
                Ok(Some(stream))
            }
            UploadState::Finished => Ok(None),
        }
    }

    /// Ends the body.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinished`] if called twice; the second call has
    /// no effect, in particular it never asks for a second issuance.
    pub fn finish(&mut self) -> Result<UploadReady, BridgeError> {
        ensure!(!self.is_finished(), StateError::AlreadyFinished);

        match mem::replace(&mut self.state, UploadState::Finished) {
            UploadState::Streaming(feed) => {
                feed.close();
                Ok(UploadReady::Closed)
            }
            UploadState::Buffering(_) if !self.has_body => Ok(UploadReady::Issue(None)),
            UploadState::Buffering(chunks) => Ok(UploadReady::Issue(concat(chunks))),
            UploadState::Finished => Ok(UploadReady::Issue(None)),
        }
    }

    /// Aborts a streaming upload and drops anything buffered.
    pub fn destroy(&mut self) {
        if let UploadState::Streaming(feed) = mem::replace(&mut self.state, UploadState::Finished) {
            feed.abort();
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if let UploadState::Streaming(feed) = &self.state {
            debug!("abort streaming upload of a dropped request");
            feed.abort();
        }
    }
}

fn concat(mut chunks: Vec<Bytes>) -> Option<OutboundBody> {
    match chunks.len() {
        0 => None,
        1 => chunks.pop().map(OutboundBody::full),
        _ => {
            let mut body = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                body.extend_from_slice(&chunk);
            }
            Some(OutboundBody::full(body.freeze()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn single_chunk_passes_through() {
        let chunk = Bytes::from_static(b"payload");
        let mut upload = PendingUpload::default();
        assert!(upload.write(chunk.clone()).unwrap().is_none());

        let UploadReady::Issue(Some(OutboundBody::Full(Some(body)))) = upload.finish().unwrap() else {
            panic!("expected a full body");
        };
        assert_eq!(body.as_ptr(), chunk.as_ptr());
    }

    #[test]
    fn empty_upload_issues_without_body() {
        let mut upload = PendingUpload::default();
        assert!(matches!(upload.finish().unwrap(), UploadReady::Issue(None)));
    }

    #[test]
    fn bodyless_methods_never_attach_a_body() {
        let mut upload = PendingUpload::new(false);
        assert!(upload.writev(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap().is_none());
        assert!(matches!(upload.finish().unwrap(), UploadReady::Issue(None)));
    }

    #[test]
    fn second_finish_is_rejected() {
        let mut upload = PendingUpload::default();
        upload.finish().unwrap();
        let err = upload.finish().unwrap_err();
        assert!(matches!(err, BridgeError::State { source: StateError::AlreadyFinished }));
        let err = upload.write(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(err, BridgeError::State { source: StateError::WriteAfterFinish }));
    }

    #[tokio::test]
    async fn promotion_replays_buffered_chunks() {
        let mut upload = PendingUpload::default();
        assert!(upload.write(Bytes::from_static(b"a")).unwrap().is_none());
        let stream = upload.write(Bytes::from_static(b"b")).unwrap().expect("promoted");
        assert!(upload.write(Bytes::from_static(b"c")).unwrap().is_none());
        assert!(matches!(upload.finish().unwrap(), UploadReady::Closed));

        assert_eq!(stream.collect().await.unwrap().to_bytes(), "abc");
    }

    #[tokio::test]
    async fn dropped_streaming_upload_ends_the_body() {
        let mut upload = PendingUpload::default();
        let stream = upload.writev(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap().expect("promoted");
        drop(upload);

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), stream.collect()).await.expect("body ended");
        assert!(matches!(result, Err(BridgeError::Aborted)));
    }
}
