//! Authentication header injection.
//!
//! Both REST endpoints and the live channel expect a bearer token and an
//! API key. Where those come from (login flow, keychain, environment) is the
//! desktop shell's business; the sync clients only ask a [`HeaderProvider`]
//! for the current values on every request, so a provider that rotates its
//! token is picked up without restarting anything.

use zeroize::Zeroizing;

/// Header carrying the API key (lowercase, as `http` requires for static names).
pub const API_KEY_HEADER: &str = "x-api-key";

/// Credentials to attach to one outgoing request.
#[derive(Default)]
pub struct AuthHeaders {
    pub bearer_token: Option<Zeroizing<String>>,
    pub api_key: Option<Zeroizing<String>>,
}

impl AuthHeaders {
    /// Returns the `Authorization` header value, if a token is set.
    pub fn authorization(&self) -> Option<String> {
        self.bearer_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.as_str()))
    }
}

/// Supplies authentication headers for outgoing requests.
pub trait HeaderProvider: Send + Sync {
    fn headers(&self) -> AuthHeaders;
}

/// Fixed credentials captured at startup.
#[derive(Default)]
pub struct StaticCredentials {
    token: Option<Zeroizing<String>>,
    api_key: Option<Zeroizing<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>, api_key: Option<String>) -> Self {
        Self {
            token: token.map(Zeroizing::new),
            api_key: api_key.map(Zeroizing::new),
        }
    }
}

impl HeaderProvider for StaticCredentials {
    fn headers(&self) -> AuthHeaders {
        AuthHeaders {
            bearer_token: self.token.clone(),
            api_key: self.api_key.clone(),
        }
    }
}
