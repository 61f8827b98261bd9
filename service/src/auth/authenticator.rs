use super::auth_state::{AuthenticationState, CredentialEvent, StateTracker};
use super::entra_id::EntraIdClientFactory;
use super::executor::{InteractiveExecutor, run_cancellable};
use super::provider::{
    AuthenticationResult, ClientApplicationConfig, IdentityProviderFactory,
    PublicClientApplication, SilentOutcome,
};
use super::types::{AccessToken, AuthenticationSettings, CachedToken, UserInfo};
use crate::common::{AuthError, IdentityProviderError};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Owns one delegated OAuth2 session.
///
/// The authenticator lazily builds its identity-provider application handle,
/// acquires tokens silently when it can and interactively when it must, and
/// keeps the most recent result in memory. Tokens are renewed once they come
/// within five minutes of expiry.
///
/// # Concurrency
///
/// The cached token sits behind a mutex that is only held to read or replace
/// it, never across an exchange with the identity provider. Concurrent
/// callers that all see a stale token may each refresh it; the last result
/// wins.
///
/// # Examples
///
/// ```no_run
/// use service::auth::{AuthenticationSettings, TokenAuthenticator};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), service::common::AuthError> {
/// let settings = AuthenticationSettings {
///     client_id: "00000000-0000-0000-0000-000000000001".to_string(),
///     tenant_id: "contoso.onmicrosoft.us".to_string(),
///     ..Default::default()
/// };
/// let authenticator = TokenAuthenticator::new(settings)?;
/// let token = authenticator.get_access_token(&CancellationToken::new()).await?;
/// println!("token expires at {}", token.expires_on);
/// # Ok(())
/// # }
/// ```
pub struct TokenAuthenticator {
    settings: AuthenticationSettings,
    authority: String,
    provider_factory: Arc<dyn IdentityProviderFactory>,
    app: OnceCell<Arc<dyn PublicClientApplication>>,
    cached: Mutex<Option<CachedToken>>,
    state: StateTracker,
    executor: OnceCell<InteractiveExecutor>,
}

impl TokenAuthenticator {
    /// Creates an authenticator talking to Entra ID.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the settings are invalid.
    pub fn new(settings: AuthenticationSettings) -> Result<Self, AuthError> {
        Self::with_provider_factory(settings, Arc::new(EntraIdClientFactory::default()))
    }

    /// Creates an authenticator whose application handle comes from `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the settings are invalid.
    pub fn with_provider_factory(
        settings: AuthenticationSettings,
        factory: Arc<dyn IdentityProviderFactory>,
    ) -> Result<Self, AuthError> {
        settings.validate()?;
        let authority = settings.authority();

        Ok(Self {
            settings,
            authority,
            provider_factory: factory,
            app: OnceCell::new(),
            cached: Mutex::new(None),
            state: StateTracker::new(),
            executor: OnceCell::new(),
        })
    }

    /// Builds the identity-provider application handle. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Initialization`] if the handle cannot be built,
    /// for instance because the authority or redirect URI is malformed.
    pub fn initialize(&self) -> Result<Arc<dyn PublicClientApplication>, AuthError> {
        let app = self.app.get_or_try_init(|| {
            let config = ClientApplicationConfig {
                client_id: self.settings.client_id.clone(),
                authority: self.authority.clone(),
                redirect_uri: self.settings.redirect_uri.clone(),
                interactive_flow: self.settings.interactive_flow,
                interactive_timeout: Duration::from_secs(self.settings.interactive_timeout_secs),
            };
            log::info!(
                "Initializing OAuth2 authentication for {} ({})",
                self.authority,
                self.settings.cloud()
            );
            self.provider_factory
                .build(&config)
                .map_err(|source| AuthError::Initialization { source })
        })?;

        self.state.mark_initialized();
        Ok(Arc::clone(app))
    }

    /// Acquires a token, silently for a known account if possible and
    /// otherwise through the interactive sign-in flow.
    ///
    /// Interactive sign-in runs on the dedicated executor. The result is
    /// cached and replaces any previous token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Initialization`] if the handle cannot be built
    /// - [`AuthError::Authentication`] if silent acquisition fails for a reason
    ///   other than "interaction required", or interactive acquisition fails
    /// - [`AuthError::Cancelled`] if `cancel` fires first; nothing is cached
    pub async fn authenticate_interactive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, AuthError> {
        let app = self.initialize()?;
        let scopes = self.settings.scopes.clone();

        let accounts = run_cancellable(cancel, app.accounts())
            .await?
            .map_err(|e| AuthError::authentication("account lookup", e))?;

        if let Some(account) = accounts.first() {
            match run_cancellable(cancel, app.acquire_token_silent(&scopes, account)).await? {
                Ok(SilentOutcome::Acquired(result)) => {
                    log::debug!("Acquired token silently for '{}'", account.username);
                    return Ok(self
                        .store(result, AuthenticationState::Authenticated)
                        .await);
                }
                Ok(SilentOutcome::InteractionRequired { reason }) => {
                    log::debug!("Silent acquisition needs interaction: {reason}");
                }
                Err(e) => return Err(AuthError::authentication("silent acquisition", e)),
            }
        }

        log::info!("Starting interactive sign-in");
        let interactive_app = Arc::clone(&app);
        let result = self
            .executor()?
            .run(cancel, async move {
                interactive_app.acquire_token_interactive(&scopes).await
            })
            .await?
            .map_err(|e| AuthError::authentication("interactive acquisition", e))?;

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        Ok(self.store(result, AuthenticationState::Authenticated).await)
    }

    /// Returns a usable access token.
    ///
    /// A cached token more than five minutes from expiry is returned as is.
    /// An expiring token is refreshed silently for the cached account; when
    /// that is not possible, for whatever reason, the interactive path is
    /// taken instead. A failed refresh is never fatal on its own.
    ///
    /// # Errors
    ///
    /// Same as [`TokenAuthenticator::authenticate_interactive`].
    pub async fn get_access_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, AuthError> {
        let cached = self.cached.lock().await.clone();
        let Some(cached) = cached else {
            log::debug!("No cached token, authenticating");
            return self.authenticate_interactive(cancel).await;
        };

        if !cached.needs_refresh() {
            return Ok(cached.to_access_token());
        }

        if cached.is_expired() {
            log::info!("Cached token expired at {}, refreshing", cached.expires_on);
        } else {
            log::info!("Cached token expires at {}, refreshing", cached.expires_on);
        }
        self.state.set(AuthenticationState::Stale);

        match self.refresh_silently(&cached, cancel).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => self.authenticate_interactive(cancel).await,
            Err(e) if matches!(e, AuthError::Cancelled) || e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("Silent token refresh failed, falling back to sign-in: {e}");
                self.authenticate_interactive(cancel).await
            }
        }
    }

    /// Silent refresh for the cached principal. `None` means interaction is needed.
    async fn refresh_silently(
        &self,
        cached: &CachedToken,
        cancel: &CancellationToken,
    ) -> Result<Option<AccessToken>, AuthError> {
        let app = self.initialize()?;
        let accounts = run_cancellable(cancel, app.accounts())
            .await?
            .map_err(|e| AuthError::authentication("account lookup", e))?;

        let Some(account) = accounts
            .into_iter()
            .find(|account| account.username == cached.owner_identifier)
        else {
            log::debug!("Account '{}' is no longer known", cached.owner_identifier);
            return Ok(None);
        };

        match run_cancellable(
            cancel,
            app.acquire_token_silent(&self.settings.scopes, &account),
        )
        .await?
        {
            Ok(SilentOutcome::Acquired(result)) => {
                Ok(Some(self.store(result, AuthenticationState::Refreshed).await))
            }
            Ok(SilentOutcome::InteractionRequired { reason }) => {
                log::debug!("Token refresh needs interaction: {reason}");
                Ok(None)
            }
            Err(e) => Err(AuthError::authentication("silent refresh", e)),
        }
    }

    /// Discards the cached token and the account's local session.
    ///
    /// Does nothing when no token is cached. The local state is cleared even
    /// if removing the account from the provider fails.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Authentication`] if the provider could not remove
    /// the account.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(cached) = self.cached.lock().await.take() else {
            log::debug!("Sign-out requested with no cached token");
            return Ok(());
        };

        self.state.transition(
            AuthenticationState::SignedOut,
            CredentialEvent::SignedOut {
                username: cached.owner_identifier.clone(),
            },
        );
        log::info!("Signed out '{}'", cached.owner_identifier);

        let Some(app) = self.app.get() else {
            return Ok(());
        };
        let accounts = app
            .accounts()
            .await
            .map_err(|e| AuthError::authentication("sign-out", e))?;
        if let Some(account) = accounts
            .iter()
            .find(|account| account.username == cached.owner_identifier)
        {
            app.remove_account(account)
                .await
                .map_err(|e| AuthError::authentication("sign-out", e))?;
        }
        Ok(())
    }

    /// The signed-in principal, if a token is cached.
    pub async fn current_user(&self) -> Option<UserInfo> {
        self.cached.lock().await.as_ref().map(CachedToken::user_info)
    }

    pub fn state(&self) -> AuthenticationState {
        self.state.get()
    }

    /// Subscribes to authentication events.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.state.subscribe()
    }

    pub fn scopes(&self) -> &[String] {
        &self.settings.scopes
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn settings(&self) -> &AuthenticationSettings {
        &self.settings
    }

    /// The dedicated executor, started on first use.
    pub(crate) fn executor(&self) -> Result<&InteractiveExecutor, AuthError> {
        self.executor.get_or_try_init(InteractiveExecutor::new).map_err(|e| {
            AuthError::Initialization {
                source: IdentityProviderError::Internal(format!(
                    "failed to start interactive executor: {e}"
                )),
            }
        })
    }

    async fn store(&self, result: AuthenticationResult, state: AuthenticationState) -> AccessToken {
        let token = CachedToken {
            access_token: result.access_token,
            expires_on: result.expires_on,
            owner_identifier: result.account.username,
            home_account_id: result.account.home_account_id,
            display_name: result.account.display_name,
            tenant_id: result.tenant_id,
        };
        let access_token = token.to_access_token();
        let event = match state {
            AuthenticationState::Refreshed => CredentialEvent::TokenRefreshed {
                username: token.owner_identifier.clone(),
                expires_on: token.expires_on,
            },
            _ => CredentialEvent::Authenticated(token.user_info()),
        };
        log::info!(
            "Token for '{}' cached until {}",
            token.owner_identifier,
            token.expires_on
        );

        *self.cached.lock().await = Some(token);
        self.state.transition(state, event);
        access_token
    }
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("client_id", &self.settings.client_id)
            .field("authority", &self.authority)
            .field("scopes", &self.settings.scopes)
            .field("state", &self.state.get())
            .finish()
    }
}
