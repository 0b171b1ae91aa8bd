use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::AuthError;

/// Account a token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountIdentity {
    pub account_id: String,
    pub name: String,
}

/// Authorization oracle. Turns a bearer token into the account it belongs to.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait TokenValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccountIdentity, AuthError>> + Send + 'a>>;
}

/// Validator backed by a fixed token table. Used by the single-process mode
/// and by tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, AccountIdentity>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        account_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            AccountIdentity {
                account_id: account_id.into(),
                name: name.into(),
            },
        );
        self
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccountIdentity, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            self.tokens
                .get(token)
                .cloned()
                .ok_or(AuthError::InvalidToken)
        })
    }
}
