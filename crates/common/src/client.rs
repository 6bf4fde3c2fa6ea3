//! Builds, signs and sends outgoing requests for one configured client.

use std::sync::Arc;
use std::time::Instant;

use error_stack::{Report, ResultExt};
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::canonical::{canonicalize, encode_pairs, normalize_path, Payload, SigningContext};
use crate::constants::{
    is_reserved_param, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, PARAM_APP_ID, PARAM_NONCE,
    PARAM_SIGN, PARAM_TIMESTAMP,
};
use crate::credentials::Secret;
use crate::endpoint::Endpoint;
use crate::error::SignatureError;
use crate::hooks::RequestHooks;
use crate::response::SignatureResponse;
use crate::settings::{BodyFormat, ClientSettings};
use crate::signer;
use crate::transport::{HttpMethod, OutgoingRequest, Transport};

/// A named, fully resolved API client.
pub struct Client {
    name: String,
    identity: String,
    app_id: String,
    secret: Secret,
    endpoint: Endpoint,
    enable_log: bool,
    body_format: BodyFormat,
    transport: Arc<dyn Transport>,
    hooks: Arc<RequestHooks>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("app_id", &self.app_id)
            .field("secret", &self.secret)
            .field("endpoint", &self.endpoint)
            .field("enable_log", &self.enable_log)
            .field("body_format", &self.body_format)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Resolves a client from its settings entry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the app id, secret or host is empty,
    /// or the scheme or port is unusable.
    pub fn new(
        name: &str,
        identity: &str,
        settings: &ClientSettings,
        transport: Arc<dyn Transport>,
        hooks: Arc<RequestHooks>,
    ) -> Result<Self, Report<SignatureError>> {
        if settings.app_id.is_empty() {
            return Err(Report::new(SignatureError::Configuration {
                message: "app_id is not defined.".into(),
            })
            .attach(format!("client: {name}")));
        }
        if settings.app_secret.is_empty() {
            return Err(Report::new(SignatureError::Configuration {
                message: "app_secret is not defined.".into(),
            })
            .attach(format!("client: {name}")));
        }
        let endpoint =
            Endpoint::from_settings(settings).attach(format!("client: {name}"))?;

        Ok(Self {
            name: name.to_string(),
            identity: identity.to_string(),
            app_id: settings.app_id.clone(),
            secret: Secret::new(settings.app_secret.as_bytes()),
            endpoint,
            enable_log: settings.enable_log,
            body_format: settings.body_format,
            transport,
            hooks,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn get(&self, path: &str, payload: &Payload) -> Result<SignatureResponse, Report<SignatureError>> {
        self.request(HttpMethod::Get, path, payload, &HeaderMap::new())
    }

    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn post(&self, path: &str, payload: &Payload) -> Result<SignatureResponse, Report<SignatureError>> {
        self.request(HttpMethod::Post, path, payload, &HeaderMap::new())
    }

    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn put(&self, path: &str, payload: &Payload) -> Result<SignatureResponse, Report<SignatureError>> {
        self.request(HttpMethod::Put, path, payload, &HeaderMap::new())
    }

    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn delete(&self, path: &str, payload: &Payload) -> Result<SignatureResponse, Report<SignatureError>> {
        self.request(HttpMethod::Delete, path, payload, &HeaderMap::new())
    }

    /// Signs and sends a request, running the registered hooks around the
    /// transport call.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error for an unusable path and a transport
    /// error when the request could not be delivered. HTTP error statuses are
    /// returned as responses.
    pub fn request(
        &self,
        method: HttpMethod,
        path: &str,
        payload: &Payload,
        headers: &HeaderMap,
    ) -> Result<SignatureResponse, Report<SignatureError>> {
        let request = self.prepare(method, path, payload, headers)?;

        self.hooks.fire_requesting(&request);

        let started = Instant::now();
        let response = self
            .transport
            .send(&request)
            .attach(format!("{} {}", request.method, request.url))?;
        let response = SignatureResponse::new(response);

        self.hooks.fire_requested(&request, &response);

        if self.enable_log {
            log::debug!(
                "API request [{}]: {} {} -> {} ({} bytes in {:?})",
                self.name,
                request.method,
                request.url,
                response.status(),
                response.body().len(),
                started.elapsed()
            );
        }

        Ok(response)
    }

    /// Builds the signed request for the current time without sending it.
    ///
    /// # Errors
    ///
    /// See [`Client::prepare_at`].
    pub fn prepare(
        &self,
        method: HttpMethod,
        path: &str,
        payload: &Payload,
        headers: &HeaderMap,
    ) -> Result<OutgoingRequest, Report<SignatureError>> {
        let timestamp = chrono::Utc::now().timestamp();
        self.prepare_at(method, path, payload, headers, timestamp)
    }

    /// Builds the signed request with an explicit unix timestamp.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error if `path` is empty or carries a query
    /// or fragment, or a configuration error if the URL cannot be built.
    pub fn prepare_at(
        &self,
        method: HttpMethod,
        path: &str,
        payload: &Payload,
        headers: &HeaderMap,
        timestamp: i64,
    ) -> Result<OutgoingRequest, Report<SignatureError>> {
        let path = validate_path(path)?;

        let mut url = self.endpoint.base_url()?;
        url.set_path(&path);
        let http_path = url.path().to_string();

        let payload = self.strip_reserved(payload);
        let nonce = format!("{}:{}", self.identity, Uuid::now_v7());

        let ctx = SigningContext {
            app_id: self.app_id.clone(),
            timestamp: timestamp.to_string(),
            nonce,
            http_method: method.to_http(),
            http_path,
            payload,
        };
        let signature = signer::sign(&canonicalize(&ctx), self.secret.expose());

        let mut query = vec![
            (PARAM_APP_ID, ctx.app_id.as_str()),
            (PARAM_TIMESTAMP, ctx.timestamp.as_str()),
            (PARAM_NONCE, ctx.nonce.as_str()),
            (PARAM_SIGN, signature.as_str()),
        ];

        let mut headers = headers.clone();
        let body = if method.has_body() {
            let (content_type, body) = self.encode_body(&ctx.payload)?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            Some(body)
        } else {
            query.extend(
                ctx.payload
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            );
            None
        };
        url.set_query(Some(&encode_pairs(query.into_iter())));

        if let Some(host) = self.endpoint.host_header() {
            let value = HeaderValue::from_str(&host).change_context(SignatureError::Configuration {
                message: format!("Invalid host header value: {host}"),
            })?;
            headers.insert(HOST, value);
        }

        Ok(OutgoingRequest {
            method,
            url,
            headers,
            body,
            tls: self.endpoint.tls_options(),
        })
    }

    fn strip_reserved(&self, payload: &Payload) -> Payload {
        payload
            .iter()
            .filter(|(key, _)| {
                let reserved = is_reserved_param(key);
                if reserved {
                    log::warn!(
                        "client [{}]: dropping reserved payload key '{}'",
                        self.name,
                        key
                    );
                }
                !reserved
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn encode_body(
        &self,
        payload: &Payload,
    ) -> Result<(&'static str, Vec<u8>), Report<SignatureError>> {
        match self.body_format {
            BodyFormat::Form => Ok((
                CONTENT_TYPE_FORM,
                encode_pairs(payload.iter().map(|(k, v)| (k.as_str(), v.as_str()))).into_bytes(),
            )),
            BodyFormat::Json => {
                let body =
                    serde_json::to_vec(payload).change_context(SignatureError::InvalidRequest {
                        message: "Failed to encode JSON body".into(),
                    })?;
                Ok((CONTENT_TYPE_JSON, body))
            }
        }
    }
}

fn validate_path(path: &str) -> Result<String, Report<SignatureError>> {
    if path.trim().is_empty() {
        return Err(Report::new(SignatureError::InvalidRequest {
            message: "request path must not be empty".into(),
        }));
    }
    if path.contains(['?', '#']) {
        return Err(Report::new(SignatureError::InvalidRequest {
            message: format!("request path must not contain a query or fragment: {path}"),
        }));
    }
    Ok(normalize_path(path.trim()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use http::Method;
    use url::form_urlencoded;

    use super::*;
    use crate::test_support::tests::{create_test_settings, FailingTransport, RecordingTransport};
    use crate::transport::TlsVerification;

    fn client(name: &str, transport: Arc<dyn Transport>) -> Client {
        let settings = create_test_settings();
        Client::new(
            name,
            &settings.identity,
            &settings.clients[name],
            transport,
            Arc::new(RequestHooks::new()),
        )
        .expect("test client should resolve")
    }

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn query_map(request: &OutgoingRequest) -> HashMap<String, String> {
        request.url.query_pairs().into_owned().collect()
    }

    /// Recomputes the signature the way a server would.
    fn expected_signature(request: &OutgoingRequest, secret: &str, payload: Payload) -> String {
        let query = query_map(request);
        let ctx = SigningContext {
            app_id: query["_app_id"].clone(),
            timestamp: query["_timestamp"].clone(),
            nonce: query["_nonce"].clone(),
            http_method: request.method.to_http(),
            http_path: request.url.path().to_string(),
            payload,
        };
        signer::sign(&canonicalize(&ctx), secret.as_bytes())
    }

    #[test]
    fn get_puts_everything_in_the_query() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let request = client
            .prepare_at(
                HttpMethod::Get,
                "/v1/ping",
                &payload(&[("foo", "bar")]),
                &HeaderMap::new(),
                1_700_000_000,
            )
            .expect("request should build");

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url.scheme(), "http");
        assert_eq!(request.url.host_str(), Some("api.example.com"));
        assert_eq!(request.url.port(), None);
        assert_eq!(request.url.path(), "/v1/ping");
        assert!(request.body.is_none());
        assert!(request.tls.is_none());

        let query = query_map(&request);
        assert_eq!(query["_app_id"], "abc");
        assert_eq!(query["_timestamp"], "1700000000");
        assert_eq!(query["foo"], "bar");
        assert!(!query.contains_key("_http_method"));
        assert!(!query.contains_key("_http_path"));
        assert_eq!(
            query["_sign"],
            expected_signature(&request, "topsecret", payload(&[("foo", "bar")]))
        );
    }

    #[test]
    fn nonce_is_prefixed_with_identity_and_unique() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let build = || {
            client
                .prepare(HttpMethod::Get, "/v1/ping", &Payload::new(), &HeaderMap::new())
                .expect("request should build")
        };
        let first = build().query_param("_nonce").expect("nonce present");
        let second = build().query_param("_nonce").expect("nonce present");

        let uuid_part = first
            .strip_prefix("test-service:")
            .expect("nonce should start with identity");
        assert!(Uuid::parse_str(uuid_part).is_ok());
        assert_ne!(first, second);
    }

    #[test]
    fn post_form_body_keeps_signing_fields_in_query() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let body_payload = payload(&[("amount", "10.5"), ("note", "a b&c")]);
        let request = client
            .prepare_at(
                HttpMethod::Post,
                "v1/charges/",
                &body_payload,
                &HeaderMap::new(),
                1_700_000_000,
            )
            .expect("request should build");

        assert_eq!(request.url.path(), "/v1/charges");
        let query = query_map(&request);
        assert!(!query.contains_key("amount"));
        assert_eq!(query.len(), 4);

        assert_eq!(
            request.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(CONTENT_TYPE_FORM)
        );
        let body = request.body.clone().expect("post should have a body");
        assert_eq!(
            String::from_utf8(body.clone()).expect("utf8 body"),
            "amount=10.5&note=a%20b%26c"
        );
        let decoded: Payload = form_urlencoded::parse(&body).into_owned().collect();
        assert_eq!(decoded, body_payload);

        assert_eq!(
            query["_sign"],
            expected_signature(&request, "topsecret", body_payload)
        );
    }

    #[test]
    fn json_body_and_ip_override() {
        let client = client("pinned", Arc::new(RecordingTransport::ok("{}")));
        let request = client
            .prepare_at(
                HttpMethod::Put,
                "/v1/items/7",
                &payload(&[("name", "widget")]),
                &HeaderMap::new(),
                1_700_000_000,
            )
            .expect("request should build");

        assert_eq!(
            request.url.as_str().split('?').next(),
            Some("https://10.0.0.12:8443/v1/items/7")
        );
        assert_eq!(
            request.headers.get(HOST).and_then(|v| v.to_str().ok()),
            Some("secure.example.com:8443")
        );
        assert_eq!(
            request.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(CONTENT_TYPE_JSON)
        );
        let body: HashMap<String, String> =
            serde_json::from_slice(request.body.as_deref().expect("json body"))
                .expect("valid json");
        assert_eq!(body.get("name").map(String::as_str), Some("widget"));

        let tls = request.tls.expect("https request should carry tls options");
        assert!(matches!(tls.verification, TlsVerification::CaFile(_)));
        assert_eq!(tls.server_name.as_deref(), Some("secure.example.com"));
    }

    #[test]
    fn reserved_payload_keys_are_dropped() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let request = client
            .prepare_at(
                HttpMethod::Get,
                "/v1/ping",
                &payload(&[("_app_id", "spoofed"), ("_sign", "x"), ("foo", "bar")]),
                &HeaderMap::new(),
                1_700_000_000,
            )
            .expect("request should build");

        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert_eq!(pairs.iter().filter(|(k, _)| k == "_app_id").count(), 1);
        assert_eq!(pairs.iter().filter(|(k, _)| k == "_sign").count(), 1);
        assert_eq!(request.query_param("_app_id").as_deref(), Some("abc"));
    }

    #[test]
    fn caller_headers_are_forwarded() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", HeaderValue::from_static("trace-1"));

        let request = client
            .prepare(HttpMethod::Delete, "/v1/items/7", &Payload::new(), &headers)
            .expect("request should build");

        assert_eq!(
            request.headers.get("x-trace-id").and_then(|v| v.to_str().ok()),
            Some("trace-1")
        );
        assert!(request.headers.get(HOST).is_none());
        assert_eq!(request.method.to_http(), Method::DELETE);
    }

    #[test]
    fn rejects_unusable_paths() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        for path in ["", "   ", "/v1/ping?x=1", "/v1/ping#frag"] {
            let err = client
                .prepare(HttpMethod::Get, path, &Payload::new(), &HeaderMap::new())
                .expect_err("path should be rejected");
            assert!(matches!(
                err.current_context(),
                SignatureError::InvalidRequest { .. }
            ));
        }
    }

    #[test]
    fn root_path_is_signed_as_slash() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let request = client
            .prepare(HttpMethod::Get, "/", &Payload::new(), &HeaderMap::new())
            .expect("root path should build");
        assert_eq!(request.url.path(), "/");
    }

    #[test]
    fn request_runs_hooks_and_wraps_response() {
        let transport = Arc::new(RecordingTransport::ok(r#"{"pong":true}"#));
        let hooks = Arc::new(RequestHooks::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let requesting = seen.clone();
        hooks.on_requesting(move |req| {
            requesting
                .lock()
                .expect("lock")
                .push(format!("requesting {}", req.url.path()));
        });
        let requested = seen.clone();
        hooks.on_requested(move |_, resp| {
            requested
                .lock()
                .expect("lock")
                .push(format!("requested {}", resp.status().as_u16()));
        });

        let settings = create_test_settings();
        let client = Client::new(
            "billing",
            &settings.identity,
            &settings.clients["billing"],
            transport.clone(),
            hooks,
        )
        .expect("client should resolve");

        let response = client
            .get("/v1/ping", &payload(&[("foo", "bar")]))
            .expect("request should succeed");

        assert!(response.is_ok());
        assert_eq!(response.text(), r#"{"pong":true}"#);
        assert_eq!(transport.last().url.path(), "/v1/ping");
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["requesting /v1/ping".to_string(), "requested 200".to_string()]
        );
    }

    #[test]
    fn transport_failure_skips_requested_hooks() {
        let hooks = Arc::new(RequestHooks::new());
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        hooks.on_requested(move |_, _| *flag.lock().expect("lock") = true);

        let settings = create_test_settings();
        let client = Client::new(
            "billing",
            &settings.identity,
            &settings.clients["billing"],
            Arc::new(FailingTransport),
            hooks,
        )
        .expect("client should resolve");

        let err = client
            .post("/v1/charges", &Payload::new())
            .expect_err("transport failure should surface");
        assert!(matches!(
            err.current_context(),
            SignatureError::Transport { .. }
        ));
        assert!(!*fired.lock().expect("lock"));
    }

    #[test]
    fn error_statuses_are_responses() {
        let client = client(
            "billing",
            Arc::new(RecordingTransport::with_status(
                http::StatusCode::UNAUTHORIZED,
                r#"{"code":"invalid_signature"}"#,
            )),
        );
        let response = client
            .put("/v1/items/1", &Payload::new())
            .expect("401 is not a transport error");
        assert!(response.is_client_error());
    }

    #[test]
    fn debug_output_hides_secret() {
        let client = client("billing", Arc::new(RecordingTransport::ok("{}")));
        let debug = format!("{client:?}");
        assert!(!debug.contains("topsecret"));
        assert_eq!(client.name(), "billing");
        assert_eq!(client.app_id(), "abc");
    }
}
