//! Response translation.
//!
//! # Responsibilities
//! - Serialize status and headers into the response context document
//! - Pass the body through unchanged
//! - Decode a response message on the supervisor side

use hyper::StatusCode;
use serde::{Deserialize, Serialize};

use crate::http::{headers_from_list, headers_to_list, HeaderList, KernelResponse, TranslateError};
use crate::transport::Message;

/// Response context document sent back to the supervisor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseContext {
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderList,
}

/// Encode a kernel response into a transport message.
pub fn encode_response(response: &KernelResponse) -> Result<Message, TranslateError> {
    let context = ResponseContext {
        status: response.status().as_u16(),
        headers: headers_to_list(response.headers())?,
    };
    Ok(Message::new(serde_json::to_vec(&context)?, response.body().clone()))
}

/// Decode a response message as the supervisor sees it.
pub fn decode_response(message: Message) -> Result<KernelResponse, TranslateError> {
    let context: ResponseContext = serde_json::from_slice(&message.context)?;
    let status = StatusCode::from_u16(context.status).map_err(|_| TranslateError::Status(context.status))?;

    let mut response = KernelResponse::new(message.body);
    *response.status_mut() = status;
    headers_from_list(&context.headers, response.headers_mut())?;
    Ok(response)
}
