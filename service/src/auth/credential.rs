use super::authenticator::TokenAuthenticator;
use super::types::AccessToken;
use crate::common::CredentialError;
use async_trait::async_trait;
use azure_core::credentials::{Secret, TokenCredential, TokenRequestOptions};
use azure_core::error::ErrorKind;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Exposes a [`TokenAuthenticator`] as a generic token supplier.
///
/// HTTP clients ask for tokens without knowing how they were obtained. The
/// scopes a caller requests are ignored: one authenticator serves exactly one
/// configured set of scopes, and those are always what is acquired.
#[derive(Clone)]
pub struct CredentialAdapter {
    authenticator: Arc<TokenAuthenticator>,
    default_scope: String,
}

impl CredentialAdapter {
    pub fn new(authenticator: Arc<TokenAuthenticator>, default_scope: impl Into<String>) -> Self {
        Self {
            authenticator,
            default_scope: default_scope.into(),
        }
    }

    /// Returns a token for the configured scopes.
    ///
    /// # Errors
    ///
    /// Any authentication failure, wrapped in [`CredentialError`].
    pub async fn get_token_async(
        &self,
        requested_scopes: &[&str],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError> {
        log::trace!("Token requested for {requested_scopes:?}");
        Ok(self.authenticator.get_access_token(cancel).await?)
    }

    /// Blocking counterpart of [`CredentialAdapter::get_token_async`].
    ///
    /// The acquisition runs on the authenticator's dedicated executor while
    /// the calling thread waits for it, so this works from threads that have
    /// no async runtime. It must not be called from an async task.
    ///
    /// # Errors
    ///
    /// Any authentication failure, wrapped in [`CredentialError`].
    pub fn get_token_blocking(
        &self,
        requested_scopes: &[&str],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError> {
        log::trace!("Blocking token request for {requested_scopes:?}");
        let authenticator = Arc::clone(&self.authenticator);
        let cancel = cancel.clone();

        let token = self
            .authenticator
            .executor()?
            .block_on(async move { authenticator.get_access_token(&cancel).await })??;
        Ok(token)
    }

    /// Default API scope of the cloud this credential was built for.
    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }

    pub fn authenticator(&self) -> &Arc<TokenAuthenticator> {
        &self.authenticator
    }
}

impl std::fmt::Debug for CredentialAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialAdapter")
            .field("authority", &self.authenticator.authority())
            .field("default_scope", &self.default_scope)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for CredentialAdapter {
    async fn get_token(
        &self,
        scopes: &[&str],
        _options: Option<TokenRequestOptions>,
    ) -> azure_core::Result<azure_core::credentials::AccessToken> {
        let token = self
            .get_token_async(scopes, &CancellationToken::new())
            .await
            .map_err(|e| azure_core::Error::new(ErrorKind::Credential, e))?;

        let expires_on = OffsetDateTime::from_unix_timestamp_nanos(i128::from(
            token.expires_on.timestamp_millis(),
        ) * 1_000_000)
        .map_err(|e| azure_core::Error::new(ErrorKind::Credential, e))?;
        Ok(azure_core::credentials::AccessToken::new(
            Secret::new(token.token),
            expires_on,
        ))
    }
}
