//! Credentials and the registry token-authentication handshake
//!
//! The promoter never reads credentials from disk. Whoever constructs the
//! client activates the ambient credential store first and hands tokens or
//! logins over through [crate::registry::RegistryClientBuilder]. When a
//! registry answers a request with a bearer challenge, the client trades
//! the stored credential for a short-lived token at the challenge's realm
//! and retries.
//!
//! Reference: <https://docs.docker.com/registry/spec/auth/token/>

use crate::image::RegistryName;
use reqwest::RequestBuilder;
use std::collections::HashMap;

/// One way of authenticating to a registry
#[derive(Debug, Clone)]
pub enum Credential {
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer {
        token: String,
    },
}

/// Credentials for registries and service accounts, keyed by name
#[derive(Debug, Clone, Default)]
pub struct Auth {
    logins: HashMap<RegistryName, Credential>,
    account_tokens: HashMap<String, String>,
}

impl Auth {
    pub fn new() -> Self {
        Auth::default()
    }

    /// Store a credential for use with a particular registry
    pub fn login(&mut self, registry: RegistryName, credential: Credential) {
        self.logins.insert(registry, credential);
    }

    /// Store a bearer token the ambient credential store issued for a
    /// service account
    pub fn account_token(&mut self, account: String, token: String) {
        self.account_tokens.insert(account, token);
    }

    /// Look up the ambient token for a service account, if one was provided
    pub fn token_for_account(&self, account: &str) -> Option<&str> {
        self.account_tokens.get(account).map(String::as_str)
    }

    /// The stored credential for a registry, if any
    pub(crate) fn credential(&self, registry: &RegistryName) -> Option<&Credential> {
        self.logins.get(registry)
    }

    /// Attach whatever credential we hold for a registry to a request
    ///
    /// Requests to registries we have no credential for go out anonymous,
    /// which public registries accept for reads.
    pub fn apply(&self, registry: &RegistryName, request: RequestBuilder) -> RequestBuilder {
        match self.logins.get(registry) {
            None => request,
            Some(Credential::Basic { username, password }) => {
                request.basic_auth(username, password.as_ref())
            }
            Some(Credential::Bearer { token }) => request.bearer_auth(token),
        }
    }
}

/// A bearer challenge parsed from a WWW-Authenticate header
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Split challenge parameters on commas, except commas inside quotes
///
/// Scopes like `repository:prod/foo:pull,push` carry a comma of their own.
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (index, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..index]);
                start = index + 1;
            }
            _ => (),
        }
    }
    parts.push(&params[start..]);
    parts
}

/// Parse a `Bearer realm="…",service="…",scope="…"` challenge
///
/// Returns None for challenges in other schemes, or without a realm to
/// fetch tokens from.
pub(crate) fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for param in split_params(params) {
        let mut parts = param.trim().splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?.trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_owned()),
            "service" => service = Some(value.to_owned()),
            "scope" => scope = Some(value.to_owned()),
            _ => (),
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}
