//! Error types surfaced by the scheduler
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;

use crate::route::Route;

/// Failure below HTTP: the request never produced a status line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request or connection timed out.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other transport failure (TLS, broken body stream, ...).
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Terminal outcome of a dispatched request. Intermediate 429s and retried
/// failures never reach callers; only what is left when the scheduler gives up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    /// The cap on 429 retries for one dispatch was reached. `attempts` counts
    /// every 429 received, whether or not other failures came in between.
    #[error("gave up after {attempts} rate-limited responses (last retry_after {retry_after:?})")]
    RateLimitExceeded { attempts: usize, retry_after: Duration },
    /// 4xx other than 429. Never retried.
    #[error("client error {status}")]
    ClientError { status: StatusCode, body: Bytes },
    /// 5xx response.
    #[error("server error {status}")]
    ServerError { status: StatusCode, body: Bytes },
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Bounded retries on transient failures were used up; `last` is the final failure.
    #[error("retry exhausted after {attempts} attempts; last error: {last}")]
    RetryExhausted { attempts: usize, last: Box<RestError> },
    /// Major-parameter requirement of the route was not met.
    #[error("invalid route {route}: {reason}")]
    InvalidRoute { route: Route, reason: &'static str },
    /// The request could not be built (body serialization, header values).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A successful body did not decode into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl RestError {
    /// HTTP status of the failure, looking through `RetryExhausted`.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ClientError { status, .. } | Self::ServerError { status, .. } => Some(*status),
            Self::RateLimitExceeded { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Raw response body, if the failure carried one.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::ClientError { body, .. } | Self::ServerError { body, .. } => Some(body),
            Self::RetryExhausted { last, .. } => last.body(),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ClientError { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_rate_limit_exceeded(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Attempts made before giving up, for exhausted-retry outcomes.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetryExhausted { attempts, .. } | Self::RateLimitExceeded { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_reports_last_failure() {
        let err = RestError::RetryExhausted {
            attempts: 4,
            last: Box::new(RestError::ServerError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: Bytes::from_static(b"down"),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("503"));
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.body().map(|b| b.as_ref()), Some(&b"down"[..]));
        assert_eq!(err.attempts(), Some(4));
        assert!(err.is_retry_exhausted());
    }

    #[test]
    fn client_error_keeps_status_and_body() {
        let err = RestError::ClientError {
            status: StatusCode::FORBIDDEN,
            body: Bytes::from_static(br#"{"code":50013}"#),
        };
        assert!(err.is_client_error());
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(err.attempts().is_none());
    }

    #[test]
    fn rate_limit_exceeded_counts_responses_not_streaks() {
        let err = RestError::RateLimitExceeded { attempts: 3, retry_after: Duration::from_millis(250) };
        assert_eq!(err.to_string(), "gave up after 3 rate-limited responses (last retry_after 250ms)");
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(err.attempts(), Some(3));
    }

    #[test]
    fn transport_errors_convert() {
        let err: RestError = TransportError::Timeout("30s".into()).into();
        assert!(matches!(err, RestError::Transport(TransportError::Timeout(_))));
        assert!(err.status().is_none());
        assert_eq!(err.to_string(), "request timed out: 30s");
    }
}
