use super::authenticator::TokenAuthenticator;
use super::cloud;
use super::credential::CredentialAdapter;
use super::entra_id::EntraIdClientFactory;
use super::provider::IdentityProviderFactory;
use super::types::ApplicationSettings;
use crate::common::AuthError;
use azure_core::credentials::TokenCredential;
use std::sync::Arc;

/// Builds the OAuth2 credential described by the application settings.
///
/// # Errors
///
/// - [`AuthError::NotConfigured`] unless OAuth2 is switched on and both the
///   client id and tenant id are set
/// - [`AuthError::Configuration`] if the OAuth2 settings are otherwise invalid
pub fn create_credential(settings: &ApplicationSettings) -> Result<CredentialAdapter, AuthError> {
    create_credential_with_factory(settings, Arc::new(EntraIdClientFactory::default()))
}

/// Same as [`create_credential`], with the identity-provider handle built by `factory`.
pub fn create_credential_with_factory(
    settings: &ApplicationSettings,
    factory: Arc<dyn IdentityProviderFactory>,
) -> Result<CredentialAdapter, AuthError> {
    let oauth2 = match &settings.oauth2 {
        Some(oauth2) if settings.using_oauth2() => oauth2,
        _ => return Err(AuthError::NotConfigured),
    };

    let endpoints = cloud::resolve(&oauth2.cloud_environment);
    let authenticator = TokenAuthenticator::with_provider_factory(oauth2.clone(), factory)?;
    log::debug!(
        "Created OAuth2 credential for {} with default scope {}",
        authenticator.authority(),
        endpoints.default_api_scope
    );

    Ok(CredentialAdapter::new(
        Arc::new(authenticator),
        endpoints.default_api_scope,
    ))
}

/// Builds the credential as a shared [`TokenCredential`] for SDK clients.
pub fn create_token_credential(
    settings: &ApplicationSettings,
) -> Result<Arc<dyn TokenCredential>, AuthError> {
    Ok(Arc::new(create_credential(settings)?))
}
