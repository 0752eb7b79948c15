//! Resolution of a [`RequestSpec`] into the one request that goes on the wire.
//!
//! Rules, in order:
//! - GET sends `data` as the query string and never has a body.
//! - Multipart sends the attached files, then one part per `data` entry.
//! - JSON sends `data` as a JSON document.
//! - Form, or no explicit format at all, sends `data` url-encoded.

use bytes::Bytes;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::TransportError;
use crate::spec::{BodyFormat, Method, RequestSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartPart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: Option<String>,
    pub contents: Bytes,
    pub filename: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub base_url: Option<String>,
    pub endpoint: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: WireBody,
}

impl WireRequest {
    pub fn resolve(spec: &RequestSpec) -> Self {
        let mut query = Vec::new();
        let mut body = WireBody::Empty;

        if spec.method() == Method::Get {
            if let Some(data) = spec.payload().filter(|d| !d.is_empty()) {
                query = form_pairs(data);
            }
        } else {
            body = match spec.format() {
                Some(BodyFormat::Multipart) => WireBody::Multipart(multipart_parts(spec)),
                Some(BodyFormat::Json) => match spec.payload() {
                    Some(data) => WireBody::Json(Value::Object(data.clone())),
                    None => WireBody::Empty,
                },
                // No explicit format falls back to form encoding.
                Some(BodyFormat::Form) | None => match spec.payload() {
                    Some(data) => WireBody::Form(form_pairs(data)),
                    None => WireBody::Empty,
                },
            };
        }

        Self {
            method: spec.method(),
            base_url: spec.base_url().map(str::to_string),
            endpoint: spec.endpoint_path().map(str::to_string),
            headers: spec.header_map().clone(),
            timeout: seconds(spec.timeout_secs()),
            connect_timeout: seconds(spec.connect_timeout_secs()),
            proxy: spec.proxy().map(str::to_string),
            query,
            body,
        }
    }

    /// Joins base URL and endpoint with RFC 3986 reference resolution.
    pub fn target(&self) -> Result<Url, TransportError> {
        let parse = |s: &str| {
            Url::parse(s).map_err(|e| TransportError::InvalidRequest(format!("{}: {}", s, e)))
        };

        match (&self.base_url, &self.endpoint) {
            (Some(base), Some(endpoint)) => parse(base)?.join(endpoint).map_err(|e| {
                TransportError::InvalidRequest(format!("{} + {}: {}", base, endpoint, e))
            }),
            (Some(base), None) => parse(base),
            (None, Some(endpoint)) => parse(endpoint),
            (None, None) => Err(TransportError::InvalidRequest(
                "no base URL or endpoint configured".to_string(),
            )),
        }
    }

    /// Target for log lines; does not validate.
    pub fn display_target(&self) -> String {
        format!(
            "{}{}",
            self.base_url.as_deref().unwrap_or_default(),
            self.endpoint.as_deref().unwrap_or_default()
        )
    }
}

fn seconds(value: f64) -> Option<Duration> {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).ok()
    } else {
        None
    }
}

fn multipart_parts(spec: &RequestSpec) -> Vec<MultipartPart> {
    let files = spec.files().iter().map(|file| MultipartPart {
        name: file.name().map(str::to_string),
        contents: file.contents().cloned().unwrap_or_default(),
        filename: file.file_name().map(str::to_string),
        headers: file.headers().cloned().unwrap_or_default(),
    });

    let fields = spec.payload().into_iter().flatten().map(|(key, value)| MultipartPart {
        name: Some(key.clone()),
        contents: Bytes::from(part_text(value)),
        filename: None,
        headers: BTreeMap::new(),
    });

    files.chain(fields).collect()
}

/// Flattens data into url-encodable pairs, nesting with brackets:
/// `{"a": {"b": 1}, "l": ["x"]}` becomes `a[b]=1`, `l[0]=x`.
/// `null` entries are skipped and booleans become `1`/`0`.
pub fn form_pairs(data: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in data {
        flatten_into(&mut pairs, key.clone(), value);
    }
    pairs
}

fn flatten_into(pairs: &mut Vec<(String, String)>, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(pairs, format!("{}[{}]", key, index), item);
            }
        }
        Value::Object(map) => {
            for (name, item) in map {
                flatten_into(pairs, format!("{}[{}]", key, name), item);
            }
        }
        scalar => pairs.push((key, part_text(scalar))),
    }
}

fn part_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
