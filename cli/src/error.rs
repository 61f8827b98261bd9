use doctrans_service::common::{AuthError, CredentialError};
use thiserror::Error;

/// Errors surfaced by the command-line front end.
///
/// - [`Config`] - configuration could not be loaded or is incomplete
/// - [`Auth`] - building the credential failed
/// - [`Credential`] - acquiring or discarding a token failed
/// - [`Logger`] - the log dispatcher could not be installed
///
/// [`Config`]: AppError::Config
/// [`Auth`]: AppError::Auth
/// [`Credential`]: AppError::Credential
/// [`Logger`]: AppError::Logger
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Failed to initialize logging: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

impl AppError {
    /// Hint printed under the error for problems the user can fix.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            AppError::Config(_) | AppError::Auth(AuthError::Configuration(_)) => Some(
                "Check doctrans.toml or the DOCTRANS__OAUTH2__* environment variables.",
            ),
            AppError::Auth(AuthError::NotConfigured) => Some(
                "Set use_oauth2_authentication = true and provide oauth2.client_id and oauth2.tenant_id.",
            ),
            AppError::Credential(e) if e.is_cancelled() => None,
            AppError::Credential(_) => {
                Some("Run again to sign in, or pass --device-code on hosts without a browser.")
            }
            _ => None,
        }
    }
}
