//! `ureq`-backed transport for signed requests.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use api_signature_common::error::SignatureError;
use api_signature_common::transport::{
    HttpMethod, OutgoingRequest, TlsOptions, TlsVerification, Transport,
};
use error_stack::{Report, ResultExt};
use http::header::HOST;
use http::{HeaderMap, Uri};
use ureq::config::Config;
use ureq::tls::{Certificate, PemItem, RootCerts, TlsConfig};
use ureq::unversioned::resolver::{DefaultResolver, ResolvedSocketAddrs, Resolver};
use ureq::unversioned::transport::{DefaultConnector, NextTimeout};
use ureq::{Agent, RequestBuilder};
use url::{Host, Url};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves one host name to a fixed address. Other names go through DNS.
///
/// Used for https over an IP override: the URL keeps the logical host so
/// SNI and certificate verification use it, while the socket goes to the IP.
#[derive(Debug)]
struct PinnedResolver {
    host: String,
    addr: SocketAddr,
    fallback: DefaultResolver,
}

impl PinnedResolver {
    fn new(host: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            host: host.into(),
            addr,
            fallback: DefaultResolver::default(),
        }
    }

    fn pinned(&self, uri: &Uri) -> Option<SocketAddr> {
        uri.host()
            .filter(|host| host.eq_ignore_ascii_case(&self.host))
            .map(|_| self.addr)
    }
}

impl Resolver for PinnedResolver {
    fn resolve(
        &self,
        uri: &Uri,
        config: &Config,
        timeout: NextTimeout,
    ) -> Result<ResolvedSocketAddrs, ureq::Error> {
        match self.pinned(uri) {
            Some(addr) => {
                let mut addrs = self.empty();
                addrs.push(addr);
                Ok(addrs)
            }
            None => self.fallback.resolve(uri, config, timeout),
        }
    }
}

/// Where a request goes on the wire.
#[derive(Debug)]
struct Route {
    url: Url,
    resolver: Option<PinnedResolver>,
}

/// Moves an IP override behind a pinned resolver when the request carries a
/// TLS server name, so the URL names the logical host again.
fn route(request: &OutgoingRequest) -> Result<Route, Report<SignatureError>> {
    let Some(server_name) = request.tls.as_ref().and_then(|tls| tls.server_name.as_deref())
    else {
        return Ok(Route {
            url: request.url.clone(),
            resolver: None,
        });
    };

    let ip = match request.url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        _ => {
            return Err(Report::new(SignatureError::Transport {
                message: format!("ip override in {} is not an IP address", request.url),
            }))
        }
    };
    let port = request
        .url
        .port_or_known_default()
        .ok_or_else(|| {
            Report::new(SignatureError::Transport {
                message: format!("no port for {}", request.url),
            })
        })?;

    let mut url = request.url.clone();
    url.set_host(Some(server_name))
        .change_context(SignatureError::Transport {
            message: format!("invalid server name '{server_name}'"),
        })?;

    Ok(Route {
        url,
        resolver: Some(PinnedResolver::new(server_name, SocketAddr::new(ip, port))),
    })
}

/// Blocking HTTP transport. One agent is built per request so each client's
/// TLS settings apply.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    timeout: Duration,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn agent(
        &self,
        tls: Option<&TlsOptions>,
        resolver: Option<PinnedResolver>,
    ) -> Result<Agent, Report<SignatureError>> {
        let mut config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(self.timeout));

        if let Some(tls) = tls {
            config = config.tls_config(tls_config(&tls.verification)?);
        }

        let config = config.build();
        Ok(match resolver {
            Some(resolver) => Agent::with_parts(config, DefaultConnector::default(), resolver),
            None => config.into(),
        })
    }
}

fn tls_config(verification: &TlsVerification) -> Result<TlsConfig, Report<SignatureError>> {
    let config = match verification {
        TlsVerification::Default => TlsConfig::builder().build(),
        TlsVerification::Disabled => TlsConfig::builder().disable_verification(true).build(),
        TlsVerification::CaFile(path) => {
            let pem = fs::read(path).change_context(SignatureError::Transport {
                message: format!("Failed to read CA file {}", path.display()),
            })?;
            let certs = ureq::tls::parse_pem(&pem)
                .filter_map(|item| match item {
                    Ok(PemItem::Certificate(cert)) => Some(cert.to_owned()),
                    _ => None,
                })
                .collect::<Vec<Certificate<'static>>>();
            if certs.is_empty() {
                return Err(Report::new(SignatureError::Transport {
                    message: format!("No certificates found in {}", path.display()),
                }));
            }
            TlsConfig::builder()
                .root_certs(RootCerts::new_with_certs(&certs))
                .build()
        }
    };
    Ok(config)
}

fn with_headers<B>(
    mut builder: RequestBuilder<B>,
    headers: &HeaderMap,
    pinned: bool,
) -> RequestBuilder<B> {
    for (name, value) in headers {
        // The URL authority already names the logical host.
        if pinned && name == HOST {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: &OutgoingRequest,
    ) -> Result<http::Response<Vec<u8>>, Report<SignatureError>> {
        let Route { url, resolver } = route(request)?;
        let pinned = resolver.is_some();
        if let Some(resolver) = &resolver {
            log::debug!("connecting to {} as {}", resolver.addr, resolver.host);
        }

        let agent = self.agent(request.tls.as_ref(), resolver)?;
        let url = url.as_str();
        let headers = &request.headers;
        let body = request.body.as_deref().unwrap_or_default();

        let result = match request.method {
            HttpMethod::Get => with_headers(agent.get(url), headers, pinned).call(),
            HttpMethod::Post => with_headers(agent.post(url), headers, pinned).send(body),
            HttpMethod::Put => with_headers(agent.put(url), headers, pinned).send(body),
            HttpMethod::Delete => with_headers(agent.delete(url), headers, pinned)
                .force_send_body()
                .send(body),
        };

        let response = result.change_context(SignatureError::Transport {
            message: format!("Failed to send {} {}", request.method, request.url),
        })?;

        let (parts, mut body) = response.into_parts();
        let bytes = body
            .read_to_vec()
            .change_context(SignatureError::Transport {
                message: "Failed to read response body".into(),
            })?;

        Ok(http::Response::from_parts(parts, bytes))
    }
}
