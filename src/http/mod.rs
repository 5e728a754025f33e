//! Request/response translation.
//!
//! # Data Flow
//! ```text
//! Message { context, body }
//!     → request.rs (context JSON → method, URI, version, headers, extensions)
//!     → KernelRequest
//!     → [kernel]
//!     → KernelResponse
//!     → response.rs (status, headers → context JSON)
//!     → Message { context, body }
//! ```
//!
//! # Design Decisions
//! - Pure conversions, no I/O
//! - Bodies are passed through as `Bytes` without copying
//! - Header names are normalized to lowercase; values are kept byte for byte
//! - The inverse conversions (`encode_request`, `decode_response`) are what a
//!   supervisor speaks

use std::collections::BTreeMap;

use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};

pub mod request;
pub mod response;

pub use request::{decode_request, encode_request, RemoteAddr, RequestAttributes, RequestContext, RequestCookies};
pub use response::{decode_response, encode_response, ResponseContext};

/// Request as seen by the kernel.
pub type KernelRequest = hyper::Request<Bytes>;

/// Response produced by the kernel.
pub type KernelResponse = hyper::Response<Bytes>;

/// Translation error.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid context document: {0}")]
    Context(#[from] serde_json::Error),

    #[error("invalid method `{0}`")]
    Method(String),

    #[error("invalid URI `{0}`")]
    Uri(String),

    #[error("unsupported protocol `{0}`")]
    Protocol(String),

    #[error("invalid status code {0}")]
    Status(u16),

    #[error("invalid header `{0}`")]
    Header(String),

    #[error("header `{0}` is not valid UTF-8")]
    NonUtf8Header(String),
}

/// Header list as carried in context documents.
pub type HeaderList = BTreeMap<String, Vec<String>>;

pub(crate) fn headers_from_list(list: &HeaderList, target: &mut HeaderMap) -> Result<(), TranslateError> {
    for (name, values) in list {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TranslateError::Header(name.clone()))?;
        for value in values {
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|_| TranslateError::Header(name.clone()))?;
            target.append(header.clone(), value);
        }
    }
    Ok(())
}

pub(crate) fn headers_to_list(headers: &HeaderMap) -> Result<HeaderList, TranslateError> {
    let mut list = HeaderList::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|value| {
                value
                    .to_str()
                    .map(str::to_string)
                    .map_err(|_| TranslateError::NonUtf8Header(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        list.insert(name.to_string(), values);
    }
    Ok(list)
}
