//! Fluent configuration of a single HTTP request.
//!
//! A [`RequestSpec`] only accumulates state: setters never perform I/O and never
//! check one field against another. Sending happens through the terminal verbs
//! (`get`, `post`, ...) which hand the finished spec to a
//! [`Dispatcher`](crate::dispatch::Dispatcher).

use anyhow::{Result, bail};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::retry::RetryPolicy;

pub const CONTENT_TYPE: &str = "Content-Type";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 2.0;
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    Head,
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HEAD" => Ok(Method::Head),
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => bail!("Unsupported HTTP method: {}", other),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Head => reqwest::Method::HEAD,
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// How the payload of a non-GET request is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
    Multipart,
}

impl BodyFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            BodyFormat::Json => "application/json",
            BodyFormat::Form => "application/x-www-form-urlencoded",
            BodyFormat::Multipart => "multipart/form-data",
        }
    }
}

/// One multipart file entry.
///
/// Empty fields are dropped when the entry is attached, so an attachment with
/// empty contents and no filename only carries its name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    name: Option<String>,
    contents: Option<Bytes>,
    filename: Option<String>,
    headers: Option<BTreeMap<String, String>>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name.into()),
            contents: Some(contents.into()),
            ..Self::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn contents(&self) -> Option<&Bytes> {
        self.contents.as_ref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        self.headers.as_ref()
    }

    fn without_empty_fields(self) -> Self {
        Self {
            name: self.name.filter(|n| !n.is_empty()),
            contents: self.contents.filter(|c| !c.is_empty()),
            filename: self.filename.filter(|f| !f.is_empty()),
            headers: self.headers.filter(|h| !h.is_empty()),
        }
    }
}

impl<N: Into<String>, C: Into<Bytes>> From<(N, C)> for Attachment {
    fn from((name, contents): (N, C)) -> Self {
        Attachment::new(name, contents)
    }
}

impl<N: Into<String>, C: Into<Bytes>, F: Into<String>> From<(N, C, F)> for Attachment {
    fn from((name, contents, filename): (N, C, F)) -> Self {
        Attachment::new(name, contents).filename(filename)
    }
}

/// The accumulated, not-yet-sent configuration of one request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    base_url: Option<String>,
    endpoint: Option<String>,
    method: Method,
    headers: BTreeMap<String, String>,
    data: Option<Map<String, Value>>,
    files: Vec<Attachment>,
    body_format: Option<BodyFormat>,
    connect_timeout: f64,
    timeout: f64,
    proxy: Option<String>,
    retry: RetryPolicy,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoint: None,
            method: Method::default(),
            headers: BTreeMap::new(),
            data: None,
            files: Vec::new(),
            body_format: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            timeout: DEFAULT_TIMEOUT_SECS,
            proxy: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RequestSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL, normalized to end with exactly one `/`.
    /// An empty string clears it.
    pub fn set_base_url(mut self, url: impl AsRef<str>) -> Self {
        let url = url.as_ref();
        self.base_url = if url.is_empty() {
            None
        } else {
            Some(format!("{}/", url.trim_end_matches('/')))
        };
        self
    }

    /// Sets the endpoint path with leading `/` stripped. An empty string clears it.
    pub fn endpoint(mut self, path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        self.endpoint = if path.is_empty() {
            None
        } else {
            Some(path.trim_start_matches('/').to_string())
        };
        self
    }

    /// Connection timeout in seconds.
    pub fn connect_timeout(mut self, seconds: f64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    /// Whole-request timeout in seconds.
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Proxy URL for every scheme. An empty string clears it.
    pub fn set_proxy(mut self, proxy: impl Into<String>) -> Self {
        let proxy = proxy.into();
        self.proxy = (!proxy.is_empty()).then_some(proxy);
        self
    }

    /// Merges headers, later values winning on the same key.
    ///
    /// `Content-Type` is silently ignored here; it follows the body format
    /// (see [`RequestSpec::as_json`] and friends).
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            let name = name.into();
            if name.eq_ignore_ascii_case(CONTENT_TYPE) {
                continue;
            }
            self.headers.insert(name, value.into());
        }
        self
    }

    pub fn accept(self, value: impl Into<String>) -> Self {
        self.headers([("Accept", value.into())])
    }

    /// `Authorization: Bearer <token>`.
    pub fn with_token(self, token: impl AsRef<str>) -> Self {
        self.with_token_type(token, "Bearer")
    }

    /// `Authorization: <scheme> <token>`; an empty scheme leaves just the token.
    pub fn with_token_type(self, token: impl AsRef<str>, scheme: impl AsRef<str>) -> Self {
        let value = format!("{} {}", scheme.as_ref(), token.as_ref())
            .trim()
            .to_string();
        self.headers([("Authorization", value)])
    }

    pub fn user_agent(self, value: impl Into<String>) -> Self {
        self.headers([("User-Agent", value.into())])
    }

    /// Replaces the payload. Sent as the query string for GET, as the body otherwise.
    pub fn data<I, K, V>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.data = Some(
            data.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Appends a multipart entry and switches the body format to multipart.
    pub fn attach(self, attachment: impl Into<Attachment>) -> Self {
        let mut spec = self.as_multipart();
        spec.files.push(attachment.into().without_empty_fields());
        spec
    }

    /// Attaches each entry in order.
    pub fn attach_all<I, A>(self, attachments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attachment>,
    {
        attachments
            .into_iter()
            .fold(self, |spec, attachment| spec.attach(attachment))
    }

    pub fn as_json(self) -> Self {
        self.body_format(BodyFormat::Json)
    }

    pub fn as_form(self) -> Self {
        self.body_format(BodyFormat::Form)
    }

    pub fn as_multipart(self) -> Self {
        self.body_format(BodyFormat::Multipart)
    }

    /// Retries transport failures up to `max_retries` times, waiting
    /// `base_delay_micros * 2^attempt` microseconds before each retry.
    pub fn retry(mut self, max_retries: u32, base_delay_micros: u64) -> Self {
        self.retry = RetryPolicy::new(max_retries, base_delay_micros);
        self
    }

    pub(crate) fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    // Format and Content-Type always change together.
    fn body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = Some(format);
        self.headers.retain(|name, _| !name.eq_ignore_ascii_case(CONTENT_TYPE));
        self.headers
            .insert(CONTENT_TYPE.to_string(), format.content_type().to_string());
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn endpoint_path(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn header_map(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn payload(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    pub fn files(&self) -> &[Attachment] {
        &self.files
    }

    pub fn format(&self) -> Option<BodyFormat> {
        self.body_format
    }

    pub fn connect_timeout_secs(&self) -> f64 {
        self.connect_timeout
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
