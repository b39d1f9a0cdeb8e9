//! Builder for configuring custom [RegistryClient] instances

use crate::{
    errors::RegistryError,
    image::RegistryName,
    manifest::RegistryContext,
    registry::{
        auth::{Auth, Credential},
        RegistryClient,
    },
};
use reqwest::{Client, ClientBuilder};
use std::{collections::HashMap, time::Duration};

/// Start here to construct a [RegistryClient] with credentials, timeouts,
/// or service-account selection
pub struct RegistryClientBuilder {
    auth: Auth,
    network: ClientBuilder,
    service_accounts: HashMap<RegistryName, String>,
    use_service_account: bool,
}

impl RegistryClientBuilder {
    /// Start constructing a custom registry client
    pub fn new() -> Self {
        RegistryClientBuilder {
            auth: Auth::new(),
            network: Client::builder().user_agent(RegistryClient::default_user_agent()),
            service_accounts: HashMap::new(),
            use_service_account: false,
        }
    }

    /// Store a credential for use with a particular registry
    pub fn login(mut self, registry: RegistryName, credential: Credential) -> Self {
        self.auth.login(registry, credential);
        self
    }

    /// Store a bearer token the ambient credential store issued for a
    /// service account
    pub fn account_token(mut self, account: &str, token: &str) -> Self {
        self.auth
            .account_token(account.to_owned(), token.to_owned());
        self
    }

    /// Learn the service accounts that manifests declare per registry
    ///
    /// Only registries that declare a `service-account` are recorded;
    /// the rest fall back to plain registry credentials.
    pub fn registry_contexts(mut self, contexts: &[RegistryContext]) -> Self {
        for context in contexts {
            if let Some(account) = &context.service_account {
                self.service_accounts
                    .insert(context.name.clone(), account.clone());
            }
        }
        self
    }

    /// Authenticate writes with the destination registry's declared service
    /// account instead of the plain registry credential
    pub fn use_service_account(mut self, enabled: bool) -> Self {
        self.use_service_account = enabled;
        self
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the last
    /// byte has been received. By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network
    /// request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Construct a [RegistryClient] using the parameters from this builder
    pub fn build(self) -> Result<RegistryClient, RegistryError> {
        Ok(RegistryClient::from_parts(
            self.network.build()?,
            self.auth,
            self.service_accounts,
            self.use_service_account,
        ))
    }
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        RegistryClientBuilder::new()
    }
}
