//! Signing, sending and verifying requests from the command line.

use std::path::Path;
use std::sync::Arc;

use api_signature_common::canonical::Payload;
use api_signature_common::client::Client;
use api_signature_common::inbound::InboundRequest;
use api_signature_common::manager::ClientManager;
use api_signature_common::nonce::InMemoryNonceCache;
use api_signature_common::transport::{HttpMethod, OutgoingRequest};
use api_signature_common::validator::RequestValidator;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::load_and_merge_config;
use crate::error::CliError;
use crate::transport::UreqTransport;

/// What to sign: shared by `sign` and `send`.
pub struct RequestArgs<'a> {
    pub file: &'a Path,
    pub client: Option<&'a str>,
    pub method: &'a str,
    pub path: &'a str,
    pub data: &'a [String],
    pub headers: &'a [String],
}

/// Parse `key=value` payload arguments.
pub(crate) fn parse_data(data: &[String]) -> Result<Payload, CliError> {
    data.iter()
        .map(|item| {
            item.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| CliError::Argument(format!("expected key=value, got '{item}'")))
        })
        .collect()
}

/// Parse `Name: value` header arguments.
pub(crate) fn parse_headers(headers: &[String]) -> Result<HeaderMap, CliError> {
    let mut map = HeaderMap::new();
    for item in headers {
        let (name, value) = item
            .split_once(':')
            .ok_or_else(|| CliError::Argument(format!("expected 'Name: value', got '{item}'")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| CliError::Argument(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| CliError::Argument(format!("invalid header value for {name}: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn resolve_client(args: &RequestArgs<'_>, verbose: bool) -> Result<Client, CliError> {
    let (settings, _) = load_and_merge_config(args.file, verbose)?;
    let manager = ClientManager::new(settings, Arc::new(UreqTransport::default()));

    let client = match args.client {
        Some(name) => manager.client(name)?,
        None => manager.default_client()?,
    };
    Ok(client)
}

fn describe(request: &OutgoingRequest) -> serde_json::Value {
    let headers: serde_json::Map<String, serde_json::Value> = request
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                serde_json::Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    serde_json::json!({
        "method": request.method.as_str(),
        "url": request.url.as_str(),
        "headers": headers,
        "body": request
            .body
            .as_deref()
            .map(|body| String::from_utf8_lossy(body).into_owned()),
    })
}

/// Build the signed request and print it as JSON without sending it.
pub fn sign(args: &RequestArgs<'_>, verbose: bool) -> Result<serde_json::Value, CliError> {
    let client = resolve_client(args, verbose)?;
    let method: HttpMethod = args.method.parse()?;
    let request = client.prepare(
        method,
        args.path,
        &parse_data(args.data)?,
        &parse_headers(args.headers)?,
    )?;

    let description = describe(&request);
    println!(
        "{}",
        serde_json::to_string_pretty(&description)
            .map_err(|e| CliError::Signature(format!("Failed to serialize request: {e}")))?
    );
    Ok(description)
}

/// Sign and send a request, printing the status and body.
pub fn send(args: &RequestArgs<'_>, verbose: bool) -> Result<(), CliError> {
    let client = resolve_client(args, verbose)?;
    let method: HttpMethod = args.method.parse()?;

    let response = client.request(
        method,
        args.path,
        &parse_data(args.data)?,
        &parse_headers(args.headers)?,
    )?;

    println!("HTTP {}", response.status());
    if verbose {
        for (name, value) in response.headers() {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
        println!();
    }
    println!("{}", response.text());

    if response.is_success() {
        Ok(())
    } else {
        Err(CliError::Signature(format!(
            "server answered {}",
            response.status()
        )))
    }
}

/// Run the validator against a request and print the identity or the rejection.
pub fn verify(
    file: &Path,
    method: &str,
    url: &str,
    body: Option<&str>,
    content_type: Option<&str>,
    verbose: bool,
) -> Result<serde_json::Value, CliError> {
    let (settings, _) = load_and_merge_config(file, verbose)?;
    let validator = RequestValidator::from_settings(&settings, Arc::new(InMemoryNonceCache::new()));

    let method: HttpMethod = method.parse()?;
    let inbound = InboundRequest::from_parts(
        method.to_http(),
        url,
        content_type,
        body.unwrap_or_default().as_bytes(),
    )?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    match runtime.block_on(validator.authenticate(&inbound)) {
        Ok(identity) => {
            let output = serde_json::to_value(&identity)
                .map_err(|e| CliError::Signature(format!("Failed to serialize identity: {e}")))?;
            println!("{}", output);
            Ok(output)
        }
        Err(report) => {
            log::debug!("{report:?}");
            let rejection = report.current_context().rejection();
            println!(
                "{}",
                serde_json::to_string(&rejection)
                    .map_err(|e| CliError::Signature(format!("Failed to serialize rejection: {e}")))?
            );
            Err(CliError::Rejected(rejection.code.to_string()))
        }
    }
}
