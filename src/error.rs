//! Failure classification for the send pipeline.
//!
//! A single transport call ends in one of three ways: a response, a response
//! that the transport flagged as an error ([`AttemptError::Http`]), or no
//! response at all ([`AttemptError::Transport`]). Only the last one is retried.

use crate::response::Response;

/// No response could be obtained from the remote side.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Request(e)
        }
    }
}

/// Outcome of one failed transport call, tagged once by the transport.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The remote service answered with an error status; the response is attached.
    #[error("HTTP error status {}", .0.status())]
    Http(Response),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Terminal failure of a send.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Retries are exhausted; this is the error of the last attempt, unmodified.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The retry loop finished without a response or an error. Always a bug.
    #[error("retry loop ended without a result after {attempts} attempts")]
    InvariantViolation { attempts: u32 },
}

impl SendError {
    /// The underlying transport error, if this is one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            SendError::Transport(e) => Some(e),
            SendError::InvariantViolation { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Connect("connection refused".to_string());
        assert_eq!(err.to_string(), "connection failed: connection refused");

        let err = TransportError::Timeout("after 5s".to_string());
        assert!(err.to_string().contains("timed out"));

        let err = TransportError::InvalidRequest("no target URL".to_string());
        assert!(err.to_string().contains("no target URL"));
    }

    #[test]
    fn test_http_attempt_error_display() {
        let response = Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), "");
        let err = AttemptError::Http(response);
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_send_error_is_transparent_over_transport() {
        let err = SendError::from(TransportError::Connect("refused".to_string()));
        assert_eq!(err.to_string(), "connection failed: refused");
        assert!(matches!(err.transport(), Some(TransportError::Connect(_))));
    }

    #[test]
    fn test_invariant_violation_display() {
        let err = SendError::InvariantViolation { attempts: 3 };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.transport().is_none());
    }

    #[tokio::test]
    async fn test_from_reqwest_connect_error() {
        // Bind then drop a listener so the port is known to be closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/", port))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            TransportError::from(err),
            TransportError::Connect(_)
        ));
    }
}
