//! Server-side authentication of signed requests.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! The signing fields are read from the query string only. The body still
//! contributes payload parameters to the canonical string.
//!
//! 1. `_app_id` present and known
//! 2. `_timestamp` valid and inside the freshness window
//! 3. `_nonce` present and not yet consumed
//! 4. `_sign` matches the canonical string of the received parameters
//! 5. nonce reservation
//!
//! The nonce is reserved only after the signature verified, so forged
//! requests cannot burn nonces. Concurrent replays of a valid request race on
//! the reservation and exactly one of them wins.

use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;

use crate::canonical::{canonicalize, SigningContext};
use crate::constants::{PARAM_APP_ID, PARAM_NONCE, PARAM_SIGN, PARAM_TIMESTAMP};
use crate::credentials::{AuthenticatedIdentity, CredentialStore, SettingsCredentialStore};
use crate::error::AuthError;
use crate::inbound::InboundRequest;
use crate::nonce::{NonceCache, NonceGuard};
use crate::settings::Settings;
use crate::signer;

pub struct RequestValidator {
    credentials: Arc<dyn CredentialStore>,
    nonce_guard: NonceGuard,
    freshness_window: Duration,
}

impl RequestValidator {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        nonce_guard: NonceGuard,
        freshness_window: Duration,
    ) -> Self {
        Self {
            credentials,
            nonce_guard,
            freshness_window,
        }
    }

    /// Validator over the settings' clients, with the configured window and
    /// cache timeout.
    #[must_use]
    pub fn from_settings(settings: &Settings, cache: Arc<dyn NonceCache>) -> Self {
        Self::new(
            Arc::new(SettingsCredentialStore::from_settings(settings)),
            NonceGuard::with_timeout(cache, settings.signature.nonce_cache_timeout()),
            settings.signature.freshness_window(),
        )
    }

    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Authenticates `req` against the current time.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] encountered.
    pub async fn authenticate(
        &self,
        req: &InboundRequest,
    ) -> Result<AuthenticatedIdentity, Report<AuthError>> {
        self.authenticate_at(req, chrono::Utc::now().timestamp())
            .await
    }

    /// Authenticates `req` as if received at unix time `now`.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] encountered.
    pub async fn authenticate_at(
        &self,
        req: &InboundRequest,
        now: i64,
    ) -> Result<AuthenticatedIdentity, Report<AuthError>> {
        let result = self.check(req, now).await;
        match &result {
            Ok(identity) => log::debug!(
                "authenticated {} {} as {}",
                req.method,
                req.path,
                identity.app_id
            ),
            Err(report) => log::info!(
                "rejected {} {}: {}",
                req.method,
                req.path,
                report.current_context().code()
            ),
        }
        result
    }

    async fn check(
        &self,
        req: &InboundRequest,
        now: i64,
    ) -> Result<AuthenticatedIdentity, Report<AuthError>> {
        let params = req.params();

        let app_id = req
            .query_param(PARAM_APP_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Report::new(AuthError::MissingAppId))?;

        let credential = match self.credentials.lookup(app_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(Report::new(AuthError::UnknownClient)
                    .attach(format!("app_id: {app_id}")))
            }
            Err(report) => {
                log::warn!("credential store lookup failed: {report:?}");
                return Err(Report::new(AuthError::UnknownClient)
                    .attach("credential store unavailable".to_string()));
            }
        };

        let raw_timestamp = req
            .query_param(PARAM_TIMESTAMP)
            .ok_or_else(|| Report::new(AuthError::InvalidTimestamp))?;
        let timestamp = raw_timestamp
            .parse::<i64>()
            .map_err(|_| Report::new(AuthError::InvalidTimestamp))?;
        if timestamp <= 0 || timestamp > now {
            return Err(Report::new(AuthError::InvalidTimestamp)
                .attach(format!("timestamp {timestamp} at {now}")));
        }
        let window = i64::try_from(self.freshness_window.as_secs()).unwrap_or(i64::MAX);
        if now - timestamp >= window {
            return Err(Report::new(AuthError::ExpiredRequest)
                .attach(format!("age {}s, window {window}s", now - timestamp)));
        }

        let nonce = req
            .query_param(PARAM_NONCE)
            .filter(|nonce| !nonce.is_empty())
            .ok_or_else(|| Report::new(AuthError::MissingNonce))?;
        if self.nonce_guard.is_consumed(nonce).await {
            return Err(Report::new(AuthError::ReplayedNonce));
        }

        if params.has_duplicates() {
            return Err(Report::new(AuthError::InvalidSignature).attach(format!(
                "repeated parameters: {:?}",
                params.duplicates
            )));
        }
        let candidate = req
            .query_param(PARAM_SIGN)
            .ok_or_else(|| Report::new(AuthError::InvalidSignature))?;

        let ctx = SigningContext {
            app_id: app_id.to_string(),
            timestamp: raw_timestamp.to_string(),
            nonce: nonce.to_string(),
            http_method: req.method.clone(),
            http_path: req.path.clone(),
            payload: params.values.clone(),
        };
        if !signer::verify(&canonicalize(&ctx), credential.secret.expose(), candidate) {
            return Err(Report::new(AuthError::InvalidSignature));
        }

        if !self
            .nonce_guard
            .reserve(nonce, self.freshness_window)
            .await
        {
            return Err(Report::new(AuthError::ReplayedNonce));
        }

        Ok(credential.into_identity())
    }
}
