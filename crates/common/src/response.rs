use error_stack::{Report, ResultExt};
use http::{HeaderMap, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::SignatureError;

/// Response to a signed request.
#[derive(Debug)]
pub struct SignatureResponse {
    inner: Response<Vec<u8>>,
}

impl SignatureResponse {
    #[must_use]
    pub fn new(inner: Response<Vec<u8>>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.inner.body()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.inner.body()).into_owned()
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Report<SignatureError>> {
        serde_json::from_slice(self.inner.body()).change_context(SignatureError::Transport {
            message: "Response body is not valid JSON".into(),
        })
    }

    /// First value of `name`, if it is valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status() == StatusCode::OK
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status().is_redirection()
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    #[must_use]
    pub fn into_inner(self) -> Response<Vec<u8>> {
        self.inner
    }
}

impl From<Response<Vec<u8>>> for SignatureResponse {
    fn from(inner: Response<Vec<u8>>) -> Self {
        Self::new(inner)
    }
}
