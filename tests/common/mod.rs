//! Shared utilities for integration tests: a supervisor on the far end of an
//! in-memory relay.

#![allow(dead_code)]

use std::collections::BTreeMap;

use hyper::body::Bytes;
use hyper::header::{HeaderValue, COOKIE, SET_COOKIE};
use hyper::Method;
use serde_json::Value;
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

use resident_worker::config::{UserRecord, WorkerConfig};
use resident_worker::http::{decode_response, encode_request, KernelRequest, KernelResponse};
use resident_worker::kernel::{HttpKernel, Router};
use resident_worker::services::RedisServer;
use resident_worker::transport::frame::Frame;
use resident_worker::transport::{StreamRelay, Transport};
use resident_worker::{build_worker, Worker};

pub type Relay = StreamRelay<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
pub type TestWorker = Worker<Relay, HttpKernel>;

pub const MAX_FRAME: u64 = 64 * 1024;

/// Configuration with two known users and quiet failure logging.
pub fn config() -> WorkerConfig {
    let mut config = WorkerConfig::default();
    let users = &mut config
        .auth
        .providers
        .get_mut("users")
        .expect("default user provider")
        .users;
    users.push(UserRecord {
        id: 1,
        username: "ada".into(),
        password: "secret".into(),
    });
    users.push(UserRecord {
        id: 2,
        username: "bob".into(),
        password: "hunter2".into(),
    });
    config.observability.log_failures = false;
    config
}

/// A booted worker wired to a supervisor over an in-memory stream.
pub fn worker(config: &WorkerConfig, router: Router) -> (TestWorker, Supervisor) {
    worker_with_redis(config, router, RedisServer::new())
}

pub fn worker_with_redis(
    config: &WorkerConfig,
    router: Router,
    redis: std::sync::Arc<RedisServer>,
) -> (TestWorker, Supervisor) {
    let (a, b) = duplex(256 * 1024);
    let (ar, aw) = split(a);
    let (br, bw) = split(b);

    let transport = StreamRelay::new(ar, aw, MAX_FRAME);
    let worker = build_worker(config, transport, redis, router).expect("bootstrap");
    let supervisor = Supervisor {
        relay: StreamRelay::new(br, bw, MAX_FRAME),
    };
    (worker, supervisor)
}

/// The supervising side of the relay.
pub struct Supervisor {
    relay: Relay,
}

impl Supervisor {
    pub async fn send(&mut self, request: &KernelRequest) {
        let message = encode_request(request).expect("encode request");
        self.relay.send(message).await.expect("send request");
    }

    pub async fn receive(&mut self) -> KernelResponse {
        let message = self
            .relay
            .accept()
            .await
            .expect("read response")
            .expect("worker closed the relay");
        decode_response(message).expect("decode response")
    }

    pub async fn roundtrip(&mut self, request: &KernelRequest) -> KernelResponse {
        self.send(request).await;
        self.receive().await
    }

    /// Write a single frame as-is.
    pub async fn send_frame(&mut self, frame: Frame) {
        self.relay.write_frame(&frame).await.expect("write frame");
        self.relay.flush().await.expect("flush");
    }

    pub async fn close(mut self) {
        self.relay.close().await.expect("close relay");
    }
}

pub fn request(method: Method, uri: &str, body: impl Into<Bytes>) -> KernelRequest {
    let mut request = KernelRequest::new(body.into());
    *request.method_mut() = method;
    *request.uri_mut() = uri.parse().expect("uri");
    request
}

pub fn get(uri: &str) -> KernelRequest {
    request(Method::GET, uri, Bytes::new())
}

pub fn post_json(uri: &str, body: Value) -> KernelRequest {
    let body = serde_json::to_vec(&body).expect("json body");
    let mut request = request(Method::POST, uri, body);
    request
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    request
}

/// Attach cookies as a `Cookie` header.
pub fn with_cookies(mut request: KernelRequest, cookies: &BTreeMap<String, String>) -> KernelRequest {
    if !cookies.is_empty() {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(&header).expect("cookie header"));
    }
    request
}

/// `name -> value` of every cookie the response sets.
pub fn set_cookies(response: &KernelResponse) -> BTreeMap<String, String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

pub fn json_body(response: &KernelResponse) -> Value {
    serde_json::from_slice(response.body()).expect("json response")
}
