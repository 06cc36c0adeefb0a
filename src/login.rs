//! Login precondition and credential accessor.
//!
//! The connection never caches credentials: the `Authorization` header is
//! rendered from the store on every connect, so a rotated password takes
//! effect on the next attempt.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use std::sync::Arc;

/// Whether the user is logged in.
pub trait LoginState: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Produces the `Authorization` header value for a connect attempt.
pub type CredentialAccessor = Arc<dyn Fn() -> String + Send + Sync>;

/// Basic credential for the chat socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredential {
    pub user: String,
    pub password: String,
}

impl BasicCredential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.user, self.password))
        )
    }
}

/// Holds the current credential, if any.
#[derive(Debug, Default)]
pub struct CredentialStore {
    credential: RwLock<Option<BasicCredential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: BasicCredential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }

    /// Replace the credential (login or rotation).
    pub fn set(&self, credential: BasicCredential) {
        *self.credential.write() = Some(credential);
    }

    /// Forget the credential (logout).
    pub fn clear(&self) {
        *self.credential.write() = None;
    }

    /// Current header value; empty when logged out.
    pub fn authorization(&self) -> String {
        self.credential
            .read()
            .as_ref()
            .map(BasicCredential::header_value)
            .unwrap_or_default()
    }

    /// An accessor that re-reads this store on every call.
    pub fn accessor(self: &Arc<Self>) -> CredentialAccessor {
        let store = Arc::clone(self);
        Arc::new(move || store.authorization())
    }
}

impl LoginState for CredentialStore {
    fn is_authenticated(&self) -> bool {
        self.credential
            .read()
            .as_ref()
            .is_some_and(|c| !c.user.is_empty() || !c.password.is_empty())
    }
}
