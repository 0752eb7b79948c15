//! The send pipeline: resolve a [`RequestSpec`] and run it under its retry policy.

use log::{debug, warn};

use crate::error::{AttemptError, SendError};
use crate::response::Response;
use crate::retry::{Sleeper, TokioSleeper};
use crate::spec::{Method, RequestSpec};
use crate::transport::{ReqwestTransport, Transport};
use crate::wire::WireRequest;

/// Executes request specs against a [`Transport`].
///
/// Transport failures (no response) are retried with exponential backoff.
/// A response is returned as soon as there is one, whatever its status:
/// a request that reached the service is never sent twice.
pub struct Dispatcher<T = ReqwestTransport, S = TokioSleeper> {
    transport: T,
    sleeper: S,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Dispatcher<T, TokioSleeper> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            sleeper: TokioSleeper,
        }
    }
}

impl<T: Transport, S: Sleeper> Dispatcher<T, S> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> Dispatcher<T, S2> {
        Dispatcher {
            transport: self.transport,
            sleeper,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a request spec as configured, including its method.
    #[tracing::instrument(skip(self, spec), fields(method = %spec.method()))]
    pub async fn send(&self, spec: &RequestSpec) -> Result<Response, SendError> {
        let request = WireRequest::resolve(spec);
        let policy = spec.retry_policy();
        let target = request.display_target();

        let mut attempt: u32 = 0;
        while attempt <= policy.max_retries {
            debug!(
                "{} {}: attempt {}/{}",
                request.method,
                target,
                attempt + 1,
                policy.max_attempts()
            );

            match self.transport.request(&request).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::Http(response)) => {
                    debug!(
                        "{} {}: HTTP {}, returning response without retry",
                        request.method,
                        target,
                        response.status()
                    );
                    return Ok(response);
                }
                Err(AttemptError::Transport(e)) => {
                    if attempt >= policy.max_retries {
                        warn!(
                            "{} {}: giving up after {} attempt(s): {}",
                            request.method,
                            target,
                            attempt + 1,
                            e
                        );
                        return Err(SendError::Transport(e));
                    }

                    let delay = policy.delay(attempt);
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {}us...",
                        request.method,
                        target,
                        attempt + 1,
                        policy.max_attempts(),
                        e,
                        delay.as_micros()
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        Err(SendError::InvariantViolation { attempts: attempt })
    }
}

impl RequestSpec {
    /// Sets the method and dispatches this request.
    pub async fn send<T: Transport, S: Sleeper>(
        self,
        method: Method,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        let spec = self.with_method(method);
        dispatcher.send(&spec).await
    }

    pub async fn head<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Head, dispatcher).await
    }

    pub async fn get<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Get, dispatcher).await
    }

    pub async fn post<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Post, dispatcher).await
    }

    pub async fn put<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Put, dispatcher).await
    }

    pub async fn patch<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Patch, dispatcher).await
    }

    pub async fn delete<T: Transport, S: Sleeper>(
        self,
        dispatcher: &Dispatcher<T, S>,
    ) -> Result<Response, SendError> {
        self.send(Method::Delete, dispatcher).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::retry::MockSleeper;
    use crate::transport::MockTransport;
    use crate::wire::WireBody;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn refused() -> Result<Response, AttemptError> {
        Err(AttemptError::Transport(TransportError::Connect(
            "connection refused".to_string(),
        )))
    }

    fn response(status: u16) -> Response {
        Response::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), "")
    }

    fn spec() -> RequestSpec {
        RequestSpec::new()
            .set_base_url("https://api.test")
            .endpoint("items")
    }

    #[test_log::test(tokio::test)]
    async fn test_success_returns_immediately() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Ok(response(200)));

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        let dispatcher = Dispatcher::with_transport(transport).with_sleeper(sleeper);
        let result = spec().retry(3, 1000).get(&dispatcher).await.unwrap();
        assert_eq!(result.status(), StatusCode::OK);
    }

    #[test_log::test(tokio::test)]
    async fn test_connection_refused_retries_with_backoff_then_fails() {
        let mut transport = MockTransport::new();
        transport.expect_request().times(3).returning(|_| refused());

        let mut seq = Sequence::new();
        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_micros(1000)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_micros(2000)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());

        let dispatcher = Dispatcher::with_transport(transport).with_sleeper(sleeper);
        let err = spec().retry(2, 1000).post(&dispatcher).await.unwrap_err();

        assert!(matches!(
            err,
            SendError::Transport(TransportError::Connect(_))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_http_error_response_is_returned_without_retry() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Err(AttemptError::Http(response(404))));

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        let dispatcher = Dispatcher::with_transport(transport).with_sleeper(sleeper);
        let result = spec().retry(5, 1000).delete(&dispatcher).await.unwrap();
        assert_eq!(result.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_default_policy_attempts_once() {
        let mut transport = MockTransport::new();
        transport.expect_request().times(1).returning(|_| refused());

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        let dispatcher = Dispatcher::with_transport(transport).with_sleeper(sleeper);
        let err = spec().get(&dispatcher).await.unwrap_err();
        assert!(err.transport().is_some());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(AttemptError::Transport(TransportError::Timeout(
                    "operation timed out".to_string(),
                )))
            });
        transport
            .expect_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(500)));

        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_micros(100_000)))
            .times(1)
            .returning(|_| ());

        let dispatcher = Dispatcher::with_transport(transport).with_sleeper(sleeper);
        let result = spec().retry(1, 100_000).put(&dispatcher).await.unwrap();
        assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_terminal_verbs_set_method() {
        let cases = [
            Method::Head,
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
        ];

        for method in cases {
            let mut transport = MockTransport::new();
            transport
                .expect_request()
                .withf(move |request| request.method == method)
                .times(1)
                .returning(|_| Ok(response(200)));
            let dispatcher = Dispatcher::with_transport(transport);

            let spec = spec();
            let result = match method {
                Method::Head => spec.head(&dispatcher).await,
                Method::Get => spec.get(&dispatcher).await,
                Method::Post => spec.post(&dispatcher).await,
                Method::Put => spec.put(&dispatcher).await,
                Method::Patch => spec.patch(&dispatcher).await,
                Method::Delete => spec.delete(&dispatcher).await,
            };
            assert!(result.is_ok(), "{} failed", method);
        }
    }

    #[tokio::test]
    async fn test_resolved_request_reaches_transport() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|request| {
                request.query.is_empty()
                    && request.body == WireBody::Json(serde_json::json!({"x": 1}))
                    && request.headers["Content-Type"] == "application/json"
                    && request.timeout == Some(Duration::from_secs(5))
                    && request.connect_timeout == Some(Duration::from_secs(2))
            })
            .times(1)
            .returning(|_| Ok(response(201)));

        let dispatcher = Dispatcher::with_transport(transport);
        let result = spec()
            .data([("x", 1)])
            .as_json()
            .post(&dispatcher)
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_against_server_returns_404_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let response = RequestSpec::new()
            .set_base_url(server.url())
            .endpoint("/missing")
            .retry(5, 1000)
            .get(&Dispatcher::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_truncated_body_is_not_sent_again() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 100\r\n\r\npartial")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let response = RequestSpec::new()
            .set_base_url(url)
            .endpoint("orders")
            .data([("item", "book")])
            .retry(2, 1000)
            .post(&Dispatcher::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(!response.is_complete());
        assert_eq!(response.bytes().as_ref(), b"partial");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
