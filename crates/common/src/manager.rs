use std::sync::Arc;

use error_stack::Report;

use crate::client::Client;
use crate::error::SignatureError;
use crate::hooks::RequestHooks;
use crate::response::SignatureResponse;
use crate::settings::Settings;
use crate::transport::{OutgoingRequest, Transport};

/// Hands out named clients from settings, sharing one transport and one set
/// of hooks.
pub struct ClientManager {
    settings: Settings,
    transport: Arc<dyn Transport>,
    hooks: Arc<RequestHooks>,
}

impl std::fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ClientManager {
    #[must_use]
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            hooks: Arc::new(RequestHooks::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolves the client configured under `[clients.<name>]`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client is not defined or its
    /// settings cannot be resolved.
    pub fn client(&self, name: &str) -> Result<Client, Report<SignatureError>> {
        let client_settings = self.settings.clients.get(name).ok_or_else(|| {
            Report::new(SignatureError::Configuration {
                message: format!("Client [{name}] is not defined."),
            })
        })?;

        Client::new(
            name,
            &self.settings.identity,
            client_settings,
            self.transport.clone(),
            self.hooks.clone(),
        )
    }

    /// Resolves the client named by `default_client`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no default client is configured.
    pub fn default_client(&self) -> Result<Client, Report<SignatureError>> {
        let name = self.settings.default_client.as_deref().ok_or_else(|| {
            Report::new(SignatureError::Configuration {
                message: "No default client is configured.".into(),
            })
        })?;
        self.client(name)
    }

    /// Registers a callback that runs before every request of every client.
    pub fn requesting<F>(&self, hook: F)
    where
        F: Fn(&OutgoingRequest) + Send + Sync + 'static,
    {
        self.hooks.on_requesting(hook);
    }

    /// Registers a callback that runs after every successful transport call.
    pub fn requested<F>(&self, hook: F)
    where
        F: Fn(&OutgoingRequest, &SignatureResponse) + Send + Sync + 'static,
    {
        self.hooks.on_requested(hook);
    }
}
