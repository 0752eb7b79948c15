//! The transport capability: perform exactly one HTTP request.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Proxy};
use std::collections::BTreeMap;

use crate::error::{AttemptError, TransportError};
use crate::response::Response;
use crate::wire::{MultipartPart, WireBody, WireRequest};

/// Performs one request, without retrying.
///
/// Implementations decide once how a call ended: `Ok` for a response,
/// [`AttemptError::Http`] for a response they consider an error, and
/// [`AttemptError::Transport`] when there is no response at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: &WireRequest) -> Result<Response, AttemptError>;
}

/// [`Transport`] backed by reqwest.
///
/// Connect timeout and proxy are client-level settings in reqwest, so a client
/// is built per request.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_errors: bool,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { http_errors: true }
    }

    /// When enabled (the default), 4xx and 5xx responses are reported as
    /// [`AttemptError::Http`].
    pub fn http_errors(mut self, enabled: bool) -> Self {
        self.http_errors = enabled;
        self
    }

    fn build_client(&self, request: &WireRequest) -> Result<Client, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = request.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = &request.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }
        Ok(builder.build()?)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method))]
    async fn request(&self, request: &WireRequest) -> Result<Response, AttemptError> {
        let url = request.target()?;
        let client = self.build_client(request)?;

        // The multipart encoder writes its own Content-Type carrying the boundary.
        let multipart = matches!(request.body, WireBody::Multipart(_));
        let headers = header_map(&request.headers, multipart)?;

        let mut builder = client.request(request.method.into(), url).headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            WireBody::Empty => builder,
            WireBody::Json(value) => builder.json(value),
            WireBody::Form(pairs) => builder.form(pairs),
            WireBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let response = builder.send().await.map_err(TransportError::from)?;
        // Past this point the request has been answered and must not be retried.
        let response = match Response::from_reqwest(response).await {
            Ok(response) => response,
            Err(partial) => return Err(AttemptError::Http(partial)),
        };
        debug!("{} {} -> {}", request.method, request.display_target(), response.status());

        let status = response.status();
        if self.http_errors && (status.is_client_error() || status.is_server_error()) {
            return Err(AttemptError::Http(response));
        }
        Ok(response)
    }
}

fn header_map(
    headers: &BTreeMap<String, String>,
    skip_content_type: bool,
) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| TransportError::InvalidRequest(format!("header {:?}: {}", name, e)))?;
        if skip_content_type && name == CONTENT_TYPE {
            continue;
        }
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn multipart_form(parts: &[MultipartPart]) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for part in parts {
        let name = part.name.clone().ok_or_else(|| {
            TransportError::InvalidRequest("multipart entry is missing a name".to_string())
        })?;
        let mut body = Part::bytes(part.contents.to_vec());
        if let Some(filename) = &part.filename {
            body = body.file_name(filename.clone());
        }
        if !part.headers.is_empty() {
            body = body.headers(header_map(&part.headers, false)?);
        }
        form = form.part(name, body);
    }
    Ok(form)
}
