use std::fmt;
use std::str::FromStr;

use error_stack::{Report, ResultExt};
use url::Url;

use crate::constants::{HTTPS_DEFAULT_PORT, HTTP_DEFAULT_PORT};
use crate::error::SignatureError;
use crate::settings::{CertPem, ClientSettings};
use crate::transport::{TlsOptions, TlsVerification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => HTTP_DEFAULT_PORT,
            Self::Https => HTTPS_DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Report<SignatureError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(Report::new(SignatureError::Configuration {
                message: format!("The supported schemes are: http and https (got '{s}')"),
            })),
        }
    }
}

/// Where a client sends its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    /// Logical host name, used for the Host header and TLS verification.
    pub host: String,
    /// Direct address override.
    pub ip: Option<String>,
    pub port: u16,
    pub cert: CertPem,
}

/// Strips a leading `http://`/`https://` and trailing slashes.
fn strip_scheme(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/')
}

/// Compute the Host header value for a request.
///
/// For standard ports (443 for HTTPS, 80 for HTTP), returns just the hostname.
/// For non-standard ports, returns "hostname:port".
#[inline]
fn compute_host_header(scheme: Scheme, host: &str, port: u16) -> String {
    if port != scheme.default_port() {
        format!("{}:{}", host, port)
    } else {
        host.to_string()
    }
}

impl Endpoint {
    /// Resolves the connection half of a client's settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing host, an unsupported scheme
    /// or port 0.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, Report<SignatureError>> {
        let scheme: Scheme = settings.scheme.parse()?;

        let host = settings
            .host
            .as_deref()
            .map(strip_scheme)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                Report::new(SignatureError::Configuration {
                    message: "host is not defined.".into(),
                })
            })?
            .to_string();

        let ip = settings
            .ip
            .as_deref()
            .map(strip_scheme)
            .filter(|ip| !ip.is_empty())
            .map(|ip| {
                if ip.contains(':') && !ip.starts_with('[') {
                    format!("[{ip}]")
                } else {
                    ip.to_string()
                }
            });

        let port = match settings.port {
            Some(0) => {
                return Err(Report::new(SignatureError::Configuration {
                    message: "port must be between 1 and 65535".into(),
                }))
            }
            Some(port) => port,
            None => scheme.default_port(),
        };

        Ok(Self {
            scheme,
            host,
            ip,
            port,
            cert: settings.https_cert_pem.clone(),
        })
    }

    /// `ip|host` plus the port when it is not the scheme default.
    #[must_use]
    pub fn authority(&self) -> String {
        let target = self.ip.as_deref().unwrap_or(&self.host);
        compute_host_header(self.scheme, target, self.port)
    }

    /// Host header to send when connecting through an IP override.
    #[must_use]
    pub fn host_header(&self) -> Option<String> {
        self.ip
            .as_ref()
            .map(|_| compute_host_header(self.scheme, &self.host, self.port))
    }

    /// Base URL with an empty path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if host, ip or port do not form a valid URL.
    pub fn base_url(&self) -> Result<Url, Report<SignatureError>> {
        let raw = format!("{}://{}/", self.scheme, self.authority());
        Url::parse(&raw).change_context(SignatureError::Configuration {
            message: format!("Invalid endpoint URL: {raw}"),
        })
    }

    /// TLS options for https endpoints.
    #[must_use]
    pub fn tls_options(&self) -> Option<TlsOptions> {
        if self.scheme != Scheme::Https {
            return None;
        }

        let verification = match &self.cert {
            CertPem::Enabled(true) => TlsVerification::Default,
            CertPem::Enabled(false) => {
                log::warn!("INSECURE: certificate check disabled for {}", self.host);
                TlsVerification::Disabled
            }
            CertPem::Path(path) => TlsVerification::CaFile(path.clone()),
        };

        Some(TlsOptions {
            verification,
            server_name: self.ip.as_ref().map(|_| self.host.clone()),
        })
    }
}
