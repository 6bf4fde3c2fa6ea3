//! HMAC-SHA256 request signing for API clients and servers.
//!
//! Clients sign every outgoing request over a canonical string of fixed
//! signing fields plus payload; servers recompute the string, verify the
//! signature, enforce a freshness window and reserve the nonce so a request
//! is accepted at most once.
//!
//! # Modules
//!
//! - [`canonical`]: Canonical string construction shared by both sides
//! - [`client`]: Request builder for one configured client
//! - [`constants`]: Protocol field names and defaults
//! - [`credentials`]: Credential store trait and implementations
//! - [`endpoint`]: Scheme, host, port and TLS resolution
//! - [`error`]: Error types and HTTP status mapping
//! - [`hooks`]: Callbacks around the transport call
//! - [`inbound`]: Parameter extraction from inbound requests
//! - [`manager`]: Named clients from settings
//! - [`nonce`]: Nonce cache trait and replay guard
//! - [`response`]: Response wrapper
//! - [`settings`]: Configuration management and validation
//! - [`signer`]: HMAC-SHA256 sign and constant-time verify
//! - [`test_support`]: Testing utilities and mocks
//! - [`transport`]: Outgoing request descriptor and transport trait
//! - [`validator`]: Server-side request authentication

pub mod canonical;
pub mod client;
pub mod constants;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod inbound;
pub mod manager;
pub mod nonce;
pub mod response;
pub mod settings;
pub mod signer;
pub mod transport;
pub mod validator;
