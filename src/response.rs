//! Buffered HTTP response returned by every send, whatever its status.

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use log::warn;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

/// A buffered HTTP response.
///
/// Any status code (including 4xx and 5xx) is represented here; callers
/// inspect [`Response::status`] to tell success from application-level failure.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    complete: bool,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            complete: true,
        }
    }

    /// Reads the whole body of a reqwest response.
    ///
    /// The server has answered by now, so a failed read still yields a
    /// response: `Err` carries the status, headers and the bytes read so far.
    pub(crate) async fn from_reqwest(mut response: reqwest::Response) -> Result<Self, Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = BytesMut::new();

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => return Ok(Self::new(status, headers, body.freeze())),
                Err(e) => {
                    warn!(
                        "Reading response body failed after {} bytes: {}",
                        body.len(),
                        e
                    );
                    let mut partial = Self::new(status, headers, body.freeze());
                    partial.complete = false;
                    return Err(partial);
                }
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `false` when the connection failed while the body was being read.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).with_context(|| {
            format!(
                "Failed to parse JSON response body (status {})",
                self.status.as_u16()
            )
        })
    }
}
