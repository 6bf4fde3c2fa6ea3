//! The boundary between the request builder and the network.
//!
//! The builder produces a fully specified [`OutgoingRequest`]; a [`Transport`]
//! performs the I/O. Transports surface failures as-is and never retry: a
//! retried signed request needs a fresh nonce and timestamp.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use error_stack::Report;
use http::{HeaderMap, Method};
use url::Url;

use crate::error::SignatureError;

/// The verbs a signed request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the payload travels in the request body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !matches!(self, Self::Get)
    }

    #[must_use]
    pub fn to_http(&self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Report<SignatureError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(Report::new(SignatureError::InvalidRequest {
                message: format!("unsupported HTTP method: {s}"),
            })),
        }
    }
}

impl TryFrom<&Method> for HttpMethod {
    type Error = Report<SignatureError>;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

/// How the transport should verify the server certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerification {
    /// System trust roots.
    Default,
    /// No verification at all.
    Disabled,
    /// Trust only the certificates in this PEM file.
    CaFile(PathBuf),
}

/// TLS material attached to https requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub verification: TlsVerification,
    /// Name to verify the certificate against when the URL carries an IP
    /// address instead of the logical host.
    pub server_name: Option<String>,
}

/// A signed request, ready for the wire.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub tls: Option<TlsOptions>,
}

impl OutgoingRequest {
    /// Returns the value of the first query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Performs network I/O for signed requests.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the request could not be delivered.
    /// Non-2xx responses are not errors.
    fn send(&self, request: &OutgoingRequest)
        -> Result<http::Response<Vec<u8>>, Report<SignatureError>>;
}
