use std::time::Duration;

pub const PARAM_APP_ID: &str = "_app_id";
pub const PARAM_TIMESTAMP: &str = "_timestamp";
pub const PARAM_NONCE: &str = "_nonce";
pub const PARAM_SIGN: &str = "_sign";
pub const PARAM_HTTP_METHOD: &str = "_http_method";
pub const PARAM_HTTP_PATH: &str = "_http_path";

/// Parameter names owned by the protocol. Payload entries with these names are
/// never transmitted.
pub const RESERVED_PARAMS: [&str; 6] = [
    PARAM_APP_ID,
    PARAM_TIMESTAMP,
    PARAM_NONCE,
    PARAM_SIGN,
    PARAM_HTTP_METHOD,
    PARAM_HTTP_PATH,
];

pub const NONCE_KEY_PREFIX: &str = "nonce:";

/// Maximum age of a signed request, shared by client and server.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

pub const DEFAULT_NONCE_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

pub const DEFAULT_IDENTITY: &str = "identity";

pub const HTTP_DEFAULT_PORT: u16 = 80;
pub const HTTPS_DEFAULT_PORT: u16 = 443;

pub const SIGNATURE_HEX_LEN: usize = 64;

pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[must_use]
pub fn is_reserved_param(name: &str) -> bool {
    RESERVED_PARAMS.contains(&name)
}
