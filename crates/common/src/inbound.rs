//! Parameter extraction from inbound HTTP requests.
//!
//! Signed parameters are the union of the query string and the body. Bodies
//! are read as `application/x-www-form-urlencoded` or as a flat JSON object;
//! other content types contribute no parameters. A body without a
//! `Content-Type` header is read as form data.
//!
//! The signing fields (`_app_id`, `_timestamp`, `_nonce`, `_sign`) are only
//! taken from the query string; see [`InboundRequest::query_param`].

use std::collections::BTreeSet;

use error_stack::{Report, ResultExt};
use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use serde_json::Value;
use url::form_urlencoded;

use crate::canonical::Payload;
use crate::error::SignatureError;

/// The parts of an inbound request the validator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: Method,
    /// Raw request path, as it appeared on the wire.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<(String, String)>,
}

/// Merged request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    /// First occurrence of every key.
    pub values: Payload,
    /// Keys that appeared more than once across query and body.
    pub duplicates: BTreeSet<String>,
}

impl ParamSet {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        !self.duplicates.is_empty()
    }
}

impl InboundRequest {
    #[must_use]
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Vec<(String, String)>,
        body: Vec<(String, String)>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            body,
        }
    }

    /// Builds an inbound request from a method, a URI (path and query) and
    /// an optional body.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error if the URI or the body cannot be parsed.
    pub fn from_parts(
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Self, Report<SignatureError>> {
        let uri: Uri = uri.parse().change_context(SignatureError::InvalidRequest {
            message: format!("Invalid request URI: {uri}"),
        })?;

        Ok(Self {
            method,
            path: uri.path().to_string(),
            query: parse_query(uri.query().unwrap_or_default()),
            body: parse_body(content_type, body)?,
        })
    }

    /// Extracts method, path, query and body parameters from an `http::Request`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error if the body cannot be parsed.
    pub fn from_http<B: AsRef<[u8]>>(req: &Request<B>) -> Result<Self, Report<SignatureError>> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        Ok(Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: parse_query(req.uri().query().unwrap_or_default()),
            body: parse_body(content_type, req.body().as_ref())?,
        })
    }

    /// First value of `key` in the query string. Body parameters are ignored.
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Union of query and body parameters.
    #[must_use]
    pub fn params(&self) -> ParamSet {
        let mut set = ParamSet::default();
        for (key, value) in self.query.iter().chain(self.body.iter()) {
            if set.values.contains_key(key) {
                set.duplicates.insert(key.clone());
            } else {
                set.values.insert(key.clone(), value.clone());
            }
        }
        set
    }
}

/// Decodes a query string into ordered pairs, keeping repeated keys.
#[must_use]
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Decodes body parameters according to the content type.
///
/// # Errors
///
/// Returns an invalid-request error for a JSON body that is not a flat
/// object of strings, numbers and booleans.
pub fn parse_body(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<(String, String)>, Report<SignatureError>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match media_type.as_deref() {
        None | Some("application/x-www-form-urlencoded") => {
            Ok(form_urlencoded::parse(body).into_owned().collect())
        }
        Some(media) if media == "application/json" || media.ends_with("+json") => {
            parse_json_object(body)
        }
        Some(_) => Ok(Vec::new()),
    }
}

fn parse_json_object(body: &[u8]) -> Result<Vec<(String, String)>, Report<SignatureError>> {
    let value: Value = serde_json::from_slice(body).change_context(SignatureError::InvalidRequest {
        message: "Body is not valid JSON".into(),
    })?;

    let Value::Object(map) = value else {
        return Err(Report::new(SignatureError::InvalidRequest {
            message: "JSON body must be an object".into(),
        }));
    };

    map.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => {
                    return Err(Report::new(SignatureError::InvalidRequest {
                        message: format!("JSON field '{key}' must be a string, number or boolean"),
                    }))
                }
            };
            Ok((key, value))
        })
        .collect()
}
