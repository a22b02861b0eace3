//! Pending request: descriptor, headers and optional body.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;

use crate::error::RestError;
use crate::headers::AUDIT_LOG_REASON;
use crate::route::RouteDescriptor;

/// One call as handed to the scheduler.
#[derive(Debug, Clone)]
pub struct RestRequest {
    descriptor: RouteDescriptor,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RestRequest {
    pub fn new(descriptor: RouteDescriptor) -> Self {
        Self { descriptor, headers: HeaderMap::new(), body: None }
    }

    /// Serialize `payload` as the JSON body and set `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self, RestError> {
        let body = serde_json::to_vec(payload).map_err(|e| RestError::InvalidRequest(e.to_string()))?;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Use an already encoded body.
    pub fn raw_body(mut self, body: impl Into<Bytes>, content_type: HeaderValue) -> Self {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, RestError> {
        let name = HeaderName::try_from(name)
            .map_err(|e| RestError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| RestError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set the `Authorization` header (`Bot <token>` for bot credentials).
    pub fn authorization(self, token: &str) -> Result<Self, RestError> {
        self.header(AUTHORIZATION.as_str(), token)
    }

    /// Attach an audit-log reason. Non-ASCII text is percent-encoded.
    pub fn audit_log_reason(mut self, reason: Option<&str>) -> Result<Self, RestError> {
        if let Some(reason) = reason {
            let encoded = encode_audit_log_reason(reason);
            let value = HeaderValue::try_from(encoded)
                .map_err(|e| RestError::InvalidRequest(format!("audit log reason: {e}")))?;
            self.headers.insert(AUDIT_LOG_REASON, value);
        }
        Ok(self)
    }

    pub fn descriptor(&self) -> &RouteDescriptor {
        &self.descriptor
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

// `%` is escaped too so an encoded reason decodes back to the original text.
const REASON: &AsciiSet = &CONTROLS.add(b'%');

/// Percent-encode `reason` if it is not plain ASCII; ASCII is sent as is.
pub fn encode_audit_log_reason(reason: &str) -> String {
    if reason.is_ascii() {
        return reason.to_owned();
    }
    utf8_percent_encode(reason, REASON).to_string()
}

/// Raw transport output.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Successful response returned to callers.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RestResponse {
    /// Decode the body as JSON. `204 No Content` decodes from `null`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, RestError> {
        let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(body).map_err(|e| RestError::Decode(e.to_string()))
    }
}

impl From<RawResponse> for RestResponse {
    fn from(raw: RawResponse) -> Self {
        Self { status: raw.status, headers: raw.headers, body: raw.body }
    }
}
