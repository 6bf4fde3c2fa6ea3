//! Canonical string construction.
//!
//! Client and server both run every signed request through [`canonicalize`]; the
//! two sides agree on a signature only if they produce the same bytes here.
//!
//! The canonical form is the flat set of signing fields plus payload fields,
//! sorted by key (byte order), each key and value percent-encoded per RFC 3986
//! (unreserved characters kept, space as `%20`), joined as `key=value` with `&`.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use http::Method;

use crate::constants::{
    PARAM_APP_ID, PARAM_HTTP_METHOD, PARAM_HTTP_PATH, PARAM_NONCE, PARAM_SIGN, PARAM_TIMESTAMP,
};

/// Payload fields carried by a signed request.
pub type Payload = BTreeMap<String, String>;

/// Everything that goes into a signature. Built fresh for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub app_id: String,
    /// `_timestamp` exactly as it travels on the wire.
    pub timestamp: String,
    pub nonce: String,
    pub http_method: Method,
    pub http_path: String,
    pub payload: Payload,
}

/// The exact bytes fed to the HMAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalString(String);

impl CanonicalString {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CanonicalString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a request path: no trailing slash, exactly one leading slash.
///
/// The root path (and the empty path) normalizes to `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// Builds the canonical string for a signing context.
///
/// Fixed fields override payload entries of the same name, and a `_sign`
/// entry is never signed.
#[must_use]
pub fn canonicalize(ctx: &SigningContext) -> CanonicalString {
    let mut fields: BTreeMap<&str, Cow<'_, str>> = ctx
        .payload
        .iter()
        .filter(|(key, _)| key.as_str() != PARAM_SIGN)
        .map(|(key, value)| (key.as_str(), Cow::Borrowed(value.as_str())))
        .collect();

    fields.insert(PARAM_APP_ID, Cow::Borrowed(&ctx.app_id));
    fields.insert(PARAM_TIMESTAMP, Cow::Borrowed(&ctx.timestamp));
    fields.insert(PARAM_NONCE, Cow::Borrowed(&ctx.nonce));
    fields.insert(
        PARAM_HTTP_METHOD,
        Cow::Owned(ctx.http_method.as_str().to_ascii_uppercase()),
    );
    fields.insert(PARAM_HTTP_PATH, Cow::Owned(normalize_path(&ctx.http_path)));

    CanonicalString(encode_pairs(
        fields.iter().map(|(key, value)| (*key, value.as_ref())),
    ))
}

/// Percent-encodes `key=value` pairs and joins them with `&`, keeping the
/// iteration order.
pub(crate) fn encode_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
