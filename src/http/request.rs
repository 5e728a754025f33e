//! Request translation.
//!
//! # Responsibilities
//! - Parse the request context document
//! - Build the kernel request (method, URI, version, headers, body)
//! - Carry peer metadata (remote address, parsed cookies, attributes) as
//!   typed extensions

use std::collections::BTreeMap;

use hyper::{Method, Uri, Version};
use serde::{Deserialize, Serialize};

use crate::http::{headers_from_list, headers_to_list, HeaderList, KernelRequest, TranslateError};
use crate::transport::Message;

/// Request context document sent by the supervisor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

fn default_protocol() -> String {
    "HTTP/1.1".to_string()
}

/// Address of the client as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// Cookies already parsed by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCookies(pub BTreeMap<String, String>);

/// Free-form request attributes set by the supervisor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestAttributes(pub BTreeMap<String, serde_json::Value>);

fn parse_version(protocol: &str) -> Result<Version, TranslateError> {
    match protocol {
        "HTTP/0.9" => Ok(Version::HTTP_09),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Ok(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Ok(Version::HTTP_3),
        other => Err(TranslateError::Protocol(other.to_string())),
    }
}

fn format_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Decode a transport message into a kernel request.
pub fn decode_request(message: Message) -> Result<KernelRequest, TranslateError> {
    let context: RequestContext = serde_json::from_slice(&message.context)?;

    let method = Method::from_bytes(context.method.as_bytes())
        .map_err(|_| TranslateError::Method(context.method.clone()))?;
    let uri = context
        .uri
        .parse::<Uri>()
        .map_err(|_| TranslateError::Uri(context.uri.clone()))?;
    let version = parse_version(&context.protocol)?;

    let mut request = KernelRequest::new(message.body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.version_mut() = version;
    headers_from_list(&context.headers, request.headers_mut())?;

    if let Some(addr) = context.remote_addr {
        request.extensions_mut().insert(RemoteAddr(addr));
    }
    if !context.cookies.is_empty() {
        request.extensions_mut().insert(RequestCookies(context.cookies));
    }
    if !context.attributes.is_empty() {
        request
            .extensions_mut()
            .insert(RequestAttributes(context.attributes));
    }

    Ok(request)
}

/// Encode a kernel request as a supervisor would send it.
pub fn encode_request(request: &KernelRequest) -> Result<Message, TranslateError> {
    let context = RequestContext {
        method: request.method().to_string(),
        uri: request.uri().to_string(),
        protocol: format_version(request.version()).to_string(),
        headers: headers_to_list(request.headers())?,
        remote_addr: request.extensions().get::<RemoteAddr>().map(|a| a.0.clone()),
        cookies: request
            .extensions()
            .get::<RequestCookies>()
            .map(|c| c.0.clone())
            .unwrap_or_default(),
        attributes: request
            .extensions()
            .get::<RequestAttributes>()
            .map(|a| a.0.clone())
            .unwrap_or_default(),
    };

    Ok(Message::new(serde_json::to_vec(&context)?, request.body().clone()))
}
