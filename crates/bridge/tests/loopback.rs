//! Client and server wired together through an in-memory transport.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, Request, Response, StatusCode};
use indoc::indoc;
use micro_bridge::client::{Client, ClientRequest, RequestOptions};
use micro_bridge::connection::{
    Exchange, ExchangeHandler, ListenAddress, OutboundRequest, ReasonPhrase, RequestIssuer, ServeHandle, ServeTransport, reply_channel,
};
use micro_bridge::lifecycle::{Events, MessageEvent, ServerEvent};
use micro_bridge::message::{IncomingMessage, OutgoingMessage};
use micro_bridge::protocol::body::{BodySource, PullSource};
use micro_bridge::protocol::{BridgeError, PayloadSize, StateError, TransportError};
use micro_bridge::server::{ListenConfig, Server, ServerOptions, ServerResponse};
use tokio_util::sync::CancellationToken;

/// Hands every issued request to the server's handler and turns the reply
/// back into a response.
#[derive(Default)]
struct Loopback {
    handler: Mutex<Option<Arc<dyn ExchangeHandler>>>,
}

struct LoopbackHandle;

impl ServeHandle for LoopbackHandle {
    fn address(&self) -> ListenAddress {
        ListenAddress::Inet(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn set_idle_timeout(&self, _secs: u64) {}

    fn stop(&self, _force: bool) {}
}

impl ServeTransport for Loopback {
    fn serve(&self, _config: ListenConfig, handler: Arc<dyn ExchangeHandler>) -> Result<Box<dyn ServeHandle>, TransportError> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(Box::new(LoopbackHandle))
    }
}

#[async_trait]
impl RequestIssuer for Loopback {
    async fn issue(&self, outbound: OutboundRequest) -> Result<Response<Box<dyn PullSource>>, TransportError> {
        let handler = self.handler.lock().unwrap().clone().ok_or_else(|| TransportError::issue("connection refused"))?;

        let body = outbound.body.unwrap_or_default();
        let mut headers = outbound.headers;
        match body.payload_size() {
            PayloadSize::Length(length) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            PayloadSize::Chunked => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {}
        }

        let body: Box<dyn PullSource> = Box::new(BodySource::from_body(body));
        let mut request = Request::builder().method(outbound.method).uri(outbound.url.as_str()).body(body).map_err(TransportError::issue)?;
        *request.headers_mut() = headers;

        let (responder, reply) = reply_channel();
        handler.handle(Exchange { request, responder: Box::new(responder), disconnect: CancellationToken::new() });

        let reply = reply.await.map_err(|_canceled| TransportError::Aborted)?;
        let reason = reply.reason().map(str::to_owned);
        let (mut parts, ()) = reply.head.into_parts();
        if let Some(reason) = reason {
            parts.extensions.insert(ReasonPhrase(reason));
        }
        let body: Box<dyn PullSource> = Box::new(BodySource::from_body(reply.body));
        Ok(Response::from_parts(parts, body))
    }
}

struct Harness {
    client: Client,
    requests: Events<ServerEvent>,
    _server: Server,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let transport = Arc::new(Loopback::default());
    let mut server = Server::new(Arc::clone(&transport) as Arc<dyn ServeTransport>, ServerOptions::new()).unwrap();
    let mut requests = server.take_events().unwrap();
    server.listen(ListenConfig::new()).unwrap();
    assert!(matches!(requests.try_recv(), Some(ServerEvent::Listening(_))));

    Harness { client: Client::new(transport), requests, _server: server }
}

impl Harness {
    async fn next_request(&mut self) -> (IncomingMessage, ServerResponse) {
        match self.requests.recv().await {
            Some(ServerEvent::Request(request, response)) => (request, response),
            _ => panic!("expected a request event"),
        }
    }
}

/// Collects request events up to and including `Close`.
async fn until_close(events: &mut Events<MessageEvent>) -> Vec<MessageEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let close = matches!(event, MessageEvent::Close);
        seen.push(event);
        if close {
            break;
        }
    }
    seen
}

fn names(events: &[MessageEvent]) -> Vec<&'static str> {
    events.iter().map(MessageEvent::name).collect()
}

fn response_of(events: Vec<MessageEvent>) -> IncomingMessage {
    events
        .into_iter()
        .find_map(|event| match event {
            MessageEvent::Response(message) => Some(message),
            _ => None,
        })
        .expect("a response event")
}

async fn issue(request: &mut ClientRequest) -> Vec<MessageEvent> {
    let mut events = request.take_events().unwrap();
    until_close(&mut events).await
}

#[tokio::test]
async fn lowercase_method_is_issued_uppercased() {
    let mut harness = harness();

    let mut request = harness.client.request_url("http://localhost/items?id=7", RequestOptions::new().method("get")).unwrap();
    request.finish().unwrap();
    let (incoming, mut response) = harness.next_request().await;
    assert_eq!(incoming.method(), http::Method::GET);
    assert_eq!(incoming.url(), "/items?id=7");
    assert!(!incoming.has_body());
    response.finish_with("ok").unwrap();

    let events = issue(&mut request).await;
    assert_eq!(names(&events), vec!["socket", "response", "close"]);
}

#[tokio::test]
async fn single_write_arrives_as_one_complete_body() {
    let mut harness = harness();

    let mut request = harness.client.get("http://localhost/").unwrap();
    let (_incoming, mut response) = harness.next_request().await;
    response.set_header("X-Test", "a").unwrap();
    assert_eq!(response.get_header("x-test").as_deref(), Some("a"));
    response.write("hello").unwrap();
    response.finish().unwrap();

    let mut message = response_of(issue(&mut request).await);
    assert_eq!(message.status(), Some(StatusCode::OK));
    assert_eq!(message.header("content-length").and_then(|v| v.as_str()), Some("5"));
    assert_eq!(message.header("x-test").and_then(|v| v.as_str()), Some("a"));
    assert_eq!(message.body().unwrap().bytes().await.unwrap(), "hello");
    assert!(message.is_complete());
}

#[tokio::test]
async fn no_content_has_no_body() {
    let mut harness = harness();

    let mut request = harness.client.get("http://localhost/").unwrap();
    let (_incoming, mut response) = harness.next_request().await;
    response.write_head(204, None, [("X-Empty", "yes")]).unwrap();
    response.finish().unwrap();
    assert!(response.headers_sent());

    let mut message = response_of(issue(&mut request).await);
    assert_eq!(message.status(), Some(StatusCode::NO_CONTENT));
    assert_eq!(message.status_message(), Some("No Content"));
    assert!(!message.has_body());
    assert_eq!(message.body().unwrap().bytes().await.unwrap(), Bytes::new());
}

#[tokio::test]
async fn streamed_upload_and_streamed_response_keep_order() {
    let mut harness = harness();
    let lines = indoc! {"
        first line
        second line
        third line
    "};

    let mut request = harness.client.request_url("http://localhost/echo", RequestOptions::new().method("POST")).unwrap();
    let mut request_events = request.take_events().unwrap();
    for line in lines.split_inclusive('\n') {
        request.write(Bytes::copy_from_slice(line.as_bytes())).unwrap();
    }
    assert!(request.is_issued());

    let (mut incoming, mut response) = harness.next_request().await;
    let body = incoming.body().unwrap();
    request.finish().unwrap();
    let received = body.bytes().await.unwrap();
    assert_eq!(received, lines);

    response.write("echo: ").unwrap();
    response.write(received).unwrap();
    assert!(response.headers_sent());
    let err = response.set_header("X-Late", "1").unwrap_err();
    assert!(matches!(err, BridgeError::State { source: StateError::HeadersSent }));
    response.finish().unwrap();

    let mut message = response_of(until_close(&mut request_events).await);
    assert!(message.header("content-length").is_none());
    let echoed = message.body().unwrap().bytes().await.unwrap();
    assert_eq!(echoed, format!("echo: {lines}"));
}

#[tokio::test]
async fn custom_status_and_reason_travel_to_the_client() {
    let mut harness = harness();

    let mut request = harness.client.get("http://localhost/").unwrap();
    let (_incoming, mut response) = harness.next_request().await;
    response.write_head(599, None, Vec::<(String, String)>::new()).unwrap();
    response.finish().unwrap();

    let message = response_of(issue(&mut request).await);
    assert_eq!(message.status().map(|s| s.as_u16()), Some(599));
    assert_eq!(message.status_message(), Some("unknown"));
}

#[tokio::test]
async fn finishing_twice_never_issues_twice() {
    let mut harness = harness();

    let mut request = harness.client.request_url("http://localhost/", RequestOptions::new().method("PUT")).unwrap();
    request.write("only").unwrap();
    request.finish().unwrap();
    let err = request.finish().unwrap_err();
    assert!(matches!(err, BridgeError::State { source: StateError::AlreadyFinished }));
    let err = request.write("late").unwrap_err();
    assert!(matches!(err, BridgeError::State { source: StateError::WriteAfterFinish }));

    let (mut incoming, mut response) = harness.next_request().await;
    assert_eq!(incoming.body().unwrap().bytes().await.unwrap(), "only");
    response.finish().unwrap();
    let _events = issue(&mut request).await;

    assert!(harness.requests.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn disarmed_timeout_never_fires() {
    let mut harness = harness();

    let mut request = harness.client.request_url("http://localhost/", RequestOptions::new().timeout(100)).unwrap();
    request.set_timeout(0);
    let mut events = request.take_events().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    request.finish().unwrap();
    let (_incoming, mut response) = harness.next_request().await;
    response.finish().unwrap();

    let seen = until_close(&mut events).await;
    assert_eq!(names(&seen), vec!["socket", "response", "close"]);
}

#[tokio::test]
async fn server_response_aborted_by_client_ends_upload() {
    let mut harness = harness();

    let mut request = harness.client.request_url("http://localhost/", RequestOptions::new().method("POST")).unwrap();
    let mut events = request.take_events().unwrap();
    request.write("a").unwrap();
    request.write("b").unwrap();

    let (mut incoming, _response) = harness.next_request().await;
    let body = incoming.body().unwrap();
    request.abort();

    assert!(body.bytes().await.is_err());
    let seen = until_close(&mut events).await;
    assert_eq!(names(&seen), vec!["socket", "abort", "close"]);
    assert!(events.try_recv().is_none());
}
