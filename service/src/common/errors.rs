use thiserror::Error;

/// Failures raised at the identity-provider boundary.
///
/// These errors describe what went wrong while talking to the identity
/// provider (or while preparing to talk to it). They never describe the
/// "interaction required" branch of silent acquisition, which is reported as
/// [`SilentOutcome::InteractionRequired`](crate::auth::SilentOutcome) instead.
///
/// # Error Categories
///
/// ## Handle Construction
/// - [`InvalidAuthority`] - Authority URL is malformed or not HTTPS
/// - [`InvalidRedirectUri`] - Redirect URI cannot be parsed or is not a loopback address
///
/// ## Protocol Exchange
/// - [`RequestFailed`] - Transport-level failure talking to an endpoint
/// - [`Protocol`] - The provider answered with an OAuth2 error code
/// - [`InvalidResponse`] - The provider answered with something unparseable
///
/// ## Interactive Sign-in
/// - [`Loopback`] - The local redirect listener failed
/// - [`StateMismatch`] - The redirect carried an unexpected `state` value
/// - [`Timeout`] - The user did not finish signing in in time
///
/// [`InvalidAuthority`]: IdentityProviderError::InvalidAuthority
/// [`InvalidRedirectUri`]: IdentityProviderError::InvalidRedirectUri
/// [`RequestFailed`]: IdentityProviderError::RequestFailed
/// [`Protocol`]: IdentityProviderError::Protocol
/// [`InvalidResponse`]: IdentityProviderError::InvalidResponse
/// [`Loopback`]: IdentityProviderError::Loopback
/// [`StateMismatch`]: IdentityProviderError::StateMismatch
/// [`Timeout`]: IdentityProviderError::Timeout
#[derive(Debug, Clone, Error)]
pub enum IdentityProviderError {
    #[error("Invalid authority '{authority}': {reason}")]
    InvalidAuthority { authority: String, reason: String },

    #[error("Invalid redirect URI '{uri}': {reason}")]
    InvalidRedirectUri { uri: String, reason: String },

    #[error("Request failed: {url} - {reason}")]
    RequestFailed { url: String, reason: String },

    /// The provider rejected the request with an OAuth2 error response.
    #[error("Identity provider returned '{code}': {description}")]
    Protocol { code: String, description: String },

    #[error("Invalid response from identity provider: {0}")]
    InvalidResponse(String),

    #[error("Loopback redirect listener failed: {0}")]
    Loopback(String),

    #[error("Authorization response state does not match the request")]
    StateMismatch,

    #[error("Interactive sign-in timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityProviderError {
    /// Returns the OAuth2 error code when the provider answered with one.
    pub fn protocol_code(&self) -> Option<&str> {
        match self {
            IdentityProviderError::Protocol { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Errors produced by the token authenticator and the credential factory.
///
/// Each variant corresponds to one class of failure with its own recovery
/// policy:
///
/// - [`Configuration`] - invalid or missing settings; fatal, raised when the
///   authenticator is constructed and never retried
/// - [`Initialization`] - the identity-provider handle could not be built;
///   fatal for that authenticator instance
/// - [`Authentication`] - silent or interactive acquisition failed for a reason
///   other than "interaction required"
/// - [`NotConfigured`] - the factory was asked for an OAuth2 credential while
///   OAuth2 is disabled; callers must use another authentication method
/// - [`Cancelled`] - the caller's cancellation token fired mid-acquisition
///
/// [`Configuration`]: AuthError::Configuration
/// [`Initialization`]: AuthError::Initialization
/// [`Authentication`]: AuthError::Authentication
/// [`NotConfigured`]: AuthError::NotConfigured
/// [`Cancelled`]: AuthError::Cancelled
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Invalid OAuth2 configuration: {0}")]
    Configuration(String),

    #[error("Failed to initialize OAuth2 authentication: {source}")]
    Initialization {
        #[source]
        source: IdentityProviderError,
    },

    #[error("OAuth2 authentication failed during {stage}: {source}")]
    Authentication {
        stage: &'static str,
        #[source]
        source: IdentityProviderError,
    },

    #[error("OAuth2 authentication is not enabled in settings")]
    NotConfigured,

    #[error("Token acquisition was cancelled")]
    Cancelled,
}

impl AuthError {
    pub(crate) fn authentication(stage: &'static str, source: IdentityProviderError) -> Self {
        AuthError::Authentication { stage, source }
    }

    /// Whether retrying the same call can never succeed without changing settings.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::Configuration(_) | AuthError::Initialization { .. } | AuthError::NotConfigured
        )
    }
}

/// The single error type surfaced by [`CredentialAdapter`](crate::auth::CredentialAdapter).
///
/// Downstream HTTP clients only ever need to handle this type, whatever
/// happened inside the authentication protocol. The underlying [`AuthError`]
/// stays reachable through [`CredentialError::cause`] and the standard
/// `source()` chain.
#[derive(Debug, Clone, Error)]
#[error("Failed to obtain access token: {source}")]
pub struct CredentialError {
    #[from]
    source: AuthError,
}

impl CredentialError {
    pub fn cause(&self) -> &AuthError {
        &self.source
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, AuthError::Cancelled)
    }
}
