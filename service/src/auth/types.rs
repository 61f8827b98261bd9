use super::cloud::{CloudEnvironment, PUBLIC_DEFAULT_SCOPE};
use crate::common::AuthError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens expiring within this many seconds are treated as stale.
pub const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// How the user-facing sign-in step is carried out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveFlow {
    /// Authorization code + PKCE in the system browser, redirected to a loopback listener
    #[default]
    #[serde(alias = "SystemBrowser", alias = "browser")]
    SystemBrowser,
    /// Device code flow for hosts without a local browser
    #[serde(alias = "DeviceCode")]
    DeviceCode,
}

/// OAuth2 settings for one configured identity.
///
/// Loaded once from configuration and never mutated afterwards. Both the
/// snake_case keys used in TOML/environment configuration and the PascalCase
/// keys of `appsettings.json` are accepted.
///
/// # Required Fields
///
/// - `client_id` - Entra ID application (client) ID
/// - `tenant_id` - Entra ID tenant (directory) ID
///
/// # Optional Fields
///
/// - `redirect_uri` - defaults to `http://localhost`
/// - `scopes` - defaults to the public-cloud Cognitive Services scope
/// - `cloud_environment` - defaults to `AzureGovernment`
/// - `interactive_flow` - defaults to the system browser
/// - `interactive_timeout_secs` - defaults to 300
///
/// # Examples
///
/// ```no_run
/// use service::auth::AuthenticationSettings;
///
/// let settings = AuthenticationSettings {
///     client_id: "00000000-0000-0000-0000-000000000001".to_string(),
///     tenant_id: "contoso.onmicrosoft.us".to_string(),
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationSettings {
    #[serde(default, alias = "ClientId", alias = "clientid")]
    pub client_id: String,
    #[serde(default, alias = "TenantId", alias = "tenantid")]
    pub tenant_id: String,
    #[serde(
        default = "default_redirect_uri",
        alias = "RedirectUri",
        alias = "redirecturi"
    )]
    pub redirect_uri: String,
    #[serde(default = "default_scopes", alias = "Scopes")]
    pub scopes: Vec<String>,
    #[serde(
        default = "default_cloud_environment",
        alias = "CloudEnvironment",
        alias = "cloudenvironment"
    )]
    pub cloud_environment: String,
    #[serde(default, alias = "InteractiveFlow", alias = "interactiveflow")]
    pub interactive_flow: InteractiveFlow,
    #[serde(
        default = "default_interactive_timeout_secs",
        alias = "InteractiveTimeoutSecs",
        alias = "interactivetimeoutsecs"
    )]
    pub interactive_timeout_secs: u64,
}

fn default_redirect_uri() -> String {
    "http://localhost".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![PUBLIC_DEFAULT_SCOPE.to_string()]
}

fn default_cloud_environment() -> String {
    "AzureGovernment".to_string()
}

fn default_interactive_timeout_secs() -> u64 {
    300
}

impl Default for AuthenticationSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tenant_id: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            cloud_environment: default_cloud_environment(),
            interactive_flow: InteractiveFlow::default(),
            interactive_timeout_secs: default_interactive_timeout_secs(),
        }
    }
}

impl AuthenticationSettings {
    /// Checks the construction-time invariants.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the client id or tenant id is
    /// blank, or if no usable scope is configured.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("ClientId is required".to_string()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(AuthError::Configuration("TenantId is required".to_string()));
        }
        if self.scopes.is_empty() {
            return Err(AuthError::Configuration(
                "At least one scope is required".to_string(),
            ));
        }
        if self.scopes.iter().any(|scope| scope.trim().is_empty()) {
            return Err(AuthError::Configuration(
                "Scopes must not contain blank entries".to_string(),
            ));
        }
        if self.interactive_timeout_secs == 0 {
            return Err(AuthError::Configuration(
                "InteractiveTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cloud(&self) -> CloudEnvironment {
        CloudEnvironment::parse(&self.cloud_environment)
    }

    /// Tenant-specific authority URL for the configured cloud.
    pub fn authority(&self) -> String {
        self.cloud().authority(&self.tenant_id)
    }
}

/// Application-level settings consulted by the credential factory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    #[serde(
        default,
        alias = "UseOAuth2Authentication",
        alias = "useoauth2authentication"
    )]
    pub use_oauth2_authentication: bool,
    #[serde(default, alias = "OAuth2")]
    pub oauth2: Option<AuthenticationSettings>,
}

impl ApplicationSettings {
    /// OAuth2 counts as configured only when it is switched on and both the
    /// client id and tenant id are present.
    pub fn using_oauth2(&self) -> bool {
        self.use_oauth2_authentication
            && self.oauth2.as_ref().is_some_and(|oauth2| {
                !oauth2.client_id.trim().is_empty() && !oauth2.tenant_id.trim().is_empty()
            })
    }
}

/// The most recent successful acquisition, held in memory only.
#[derive(Clone, Debug)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
    /// Principal identifier (username) of the signed-in account
    pub owner_identifier: String,
    pub home_account_id: String,
    pub display_name: Option<String>,
    pub tenant_id: String,
}

impl CachedToken {
    /// Whether the token is expired or expires within the refresh buffer.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_BUFFER_SECS) >= self.expires_on
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    pub fn to_access_token(&self) -> AccessToken {
        AccessToken {
            token: self.access_token.clone(),
            expires_on: self.expires_on,
        }
    }

    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            username: self.owner_identifier.clone(),
            name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.owner_identifier.clone()),
            tenant_id: self.tenant_id.clone(),
            expires_on: self.expires_on,
        }
    }
}

/// Bearer token handed to callers.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Information about the signed-in principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub username: String,
    pub name: String,
    pub tenant_id: String,
    pub expires_on: DateTime<Utc>,
}
