use super::types::InteractiveFlow;
use crate::common::IdentityProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// An account known to the identity-provider application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Stable identifier, `<object id>.<tenant id>` for Entra ID accounts
    pub home_account_id: String,
    /// Principal identifier shown to the user (UPN or email)
    pub username: String,
    pub tenant_id: String,
    pub display_name: Option<String>,
}

/// A successful token acquisition.
#[derive(Clone)]
pub struct AuthenticationResult {
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
    pub account: Account,
    pub tenant_id: String,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("access_token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .field("account", &self.account)
            .field("tenant_id", &self.tenant_id)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Result of a silent acquisition attempt.
///
/// "Interaction required" is an expected branch rather than a failure: the
/// caller decides whether to escalate to interactive acquisition.
#[derive(Debug)]
pub enum SilentOutcome {
    Acquired(AuthenticationResult),
    InteractionRequired { reason: String },
}

/// Everything needed to build an identity-provider application handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientApplicationConfig {
    pub client_id: String,
    pub authority: String,
    pub redirect_uri: String,
    pub interactive_flow: InteractiveFlow,
    pub interactive_timeout: Duration,
}

/// Handle to a public-client application registered with the identity provider.
///
/// This is the seam between the token authenticator and the delegated
/// OAuth2 protocol. The production implementation is
/// [`EntraIdPublicClient`](super::entra_id::EntraIdPublicClient); tests plug
/// in in-memory implementations.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use service::auth::{Account, AuthenticationResult, PublicClientApplication, SilentOutcome};
/// use service::common::IdentityProviderError;
///
/// struct NoAccounts;
///
/// #[async_trait]
/// impl PublicClientApplication for NoAccounts {
///     async fn accounts(&self) -> Result<Vec<Account>, IdentityProviderError> {
///         Ok(Vec::new())
///     }
///
///     async fn acquire_token_silent(
///         &self,
///         _scopes: &[String],
///         _account: &Account,
///     ) -> Result<SilentOutcome, IdentityProviderError> {
///         Ok(SilentOutcome::InteractionRequired { reason: "no session".into() })
///     }
///
///     async fn acquire_token_interactive(
///         &self,
///         _scopes: &[String],
///     ) -> Result<AuthenticationResult, IdentityProviderError> {
///         Err(IdentityProviderError::Internal("not supported".into()))
///     }
///
///     async fn remove_account(&self, _account: &Account) -> Result<(), IdentityProviderError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PublicClientApplication: Send + Sync {
    /// Accounts with a local session for this application.
    async fn accounts(&self) -> Result<Vec<Account>, IdentityProviderError>;

    /// Acquires a token for `scopes` without user interaction.
    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<SilentOutcome, IdentityProviderError>;

    /// Acquires a token through a user-facing sign-in flow.
    ///
    /// May suspend for as long as the user takes to sign in.
    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError>;

    /// Forgets the local session of `account`.
    async fn remove_account(&self, account: &Account) -> Result<(), IdentityProviderError>;
}

/// Builds application handles. Called once per authenticator, lazily.
pub trait IdentityProviderFactory: Send + Sync {
    fn build(
        &self,
        config: &ClientApplicationConfig,
    ) -> Result<Arc<dyn PublicClientApplication>, IdentityProviderError>;
}
