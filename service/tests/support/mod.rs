//! In-memory identity provider used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use service::auth::{
    Account, ApplicationSettings, AuthenticationResult, AuthenticationSettings,
    ClientApplicationConfig, IdentityProviderFactory, PublicClientApplication, SilentOutcome,
};
use service::common::IdentityProviderError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "ada@contoso.onmicrosoft.us";
pub const TENANT: &str = "tenant-1";

#[derive(Clone, Copy, Debug)]
pub enum Silent {
    Acquire { expires_in_secs: i64 },
    InteractionRequired,
    Fail,
    /// Fails once with a transport error, then requires interaction.
    FailOnce,
}

#[derive(Clone, Copy, Debug)]
pub enum Interactive {
    Acquire { expires_in_secs: i64 },
    Fail,
    Hang,
}

pub struct MockApp {
    accounts: Mutex<Vec<Account>>,
    silent: Mutex<Silent>,
    interactive: Mutex<Interactive>,
    pub accounts_calls: AtomicUsize,
    pub silent_calls: AtomicUsize,
    pub interactive_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl MockApp {
    pub fn new(silent: Silent, interactive: Interactive) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(Vec::new()),
            silent: Mutex::new(silent),
            interactive: Mutex::new(interactive),
            accounts_calls: AtomicUsize::new(0),
            silent_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_silent(&self, silent: Silent) {
        *self.silent.lock().unwrap() = silent;
    }

    pub fn set_interactive(&self, interactive: Interactive) {
        *self.interactive.lock().unwrap() = interactive;
    }

    pub fn seed_account(&self) {
        self.accounts.lock().unwrap().push(account());
    }

    pub fn remove_all_accounts(&self) {
        self.accounts.lock().unwrap().clear();
    }

    pub fn known_accounts(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn account() -> Account {
    Account {
        home_account_id: format!("oid-1.{TENANT}"),
        username: USERNAME.to_string(),
        tenant_id: TENANT.to_string(),
        display_name: None,
    }
}

fn transport_error() -> IdentityProviderError {
    IdentityProviderError::RequestFailed {
        url: format!("https://login.microsoftonline.us/{TENANT}/oauth2/v2.0/token"),
        reason: "connection reset".to_string(),
    }
}

fn result(token: String, expires_in_secs: i64, scopes: &[String]) -> AuthenticationResult {
    AuthenticationResult {
        access_token: token,
        expires_on: Utc::now() + Duration::seconds(expires_in_secs),
        account: account(),
        tenant_id: TENANT.to_string(),
        scopes: scopes.to_vec(),
    }
}

#[async_trait]
impl PublicClientApplication for MockApp {
    async fn accounts(&self) -> Result<Vec<Account>, IdentityProviderError> {
        self.accounts_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        _account: &Account,
    ) -> Result<SilentOutcome, IdentityProviderError> {
        let n = self.silent_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behaviour = *self.silent.lock().unwrap();
        match behaviour {
            Silent::Acquire { expires_in_secs } => Ok(SilentOutcome::Acquired(result(
                format!("silent-{n}"),
                expires_in_secs,
                scopes,
            ))),
            Silent::InteractionRequired => Ok(SilentOutcome::InteractionRequired {
                reason: "invalid_grant: refresh token expired".to_string(),
            }),
            Silent::Fail => Err(transport_error()),
            Silent::FailOnce => {
                *self.silent.lock().unwrap() = Silent::InteractionRequired;
                Err(transport_error())
            }
        }
    }

    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        let n = self.interactive_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behaviour = *self.interactive.lock().unwrap();
        match behaviour {
            Interactive::Acquire { expires_in_secs } => {
                {
                    let mut accounts = self.accounts.lock().unwrap();
                    if accounts.is_empty() {
                        accounts.push(account());
                    }
                }
                Ok(result(format!("interactive-{n}"), expires_in_secs, scopes))
            }
            Interactive::Fail => Err(IdentityProviderError::Protocol {
                code: "access_denied".to_string(),
                description: "The user cancelled the sign-in".to_string(),
            }),
            Interactive::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(IdentityProviderError::Timeout { seconds: 3600 })
            }
        }
    }

    async fn remove_account(&self, account: &Account) -> Result<(), IdentityProviderError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .retain(|known| known.home_account_id != account.home_account_id);
        Ok(())
    }
}

pub struct MockFactory {
    app: Arc<MockApp>,
    pub builds: AtomicUsize,
    pub last_config: Mutex<Option<ClientApplicationConfig>>,
}

impl MockFactory {
    pub fn new(app: Arc<MockApp>) -> Arc<Self> {
        Arc::new(Self {
            app,
            builds: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        })
    }
}

impl IdentityProviderFactory for MockFactory {
    fn build(
        &self,
        config: &ClientApplicationConfig,
    ) -> Result<Arc<dyn PublicClientApplication>, IdentityProviderError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());
        Ok(self.app.clone())
    }
}

pub struct FailingFactory;

impl IdentityProviderFactory for FailingFactory {
    fn build(
        &self,
        config: &ClientApplicationConfig,
    ) -> Result<Arc<dyn PublicClientApplication>, IdentityProviderError> {
        Err(IdentityProviderError::InvalidAuthority {
            authority: config.authority.clone(),
            reason: "authority has no tenant segment".to_string(),
        })
    }
}

pub fn settings() -> AuthenticationSettings {
    AuthenticationSettings {
        client_id: "11111111-2222-3333-4444-555555555555".to_string(),
        tenant_id: TENANT.to_string(),
        scopes: vec!["https://cognitiveservices.azure.us/.default".to_string()],
        ..Default::default()
    }
}

pub fn application_settings(cloud: &str) -> ApplicationSettings {
    ApplicationSettings {
        use_oauth2_authentication: true,
        oauth2: Some(AuthenticationSettings {
            cloud_environment: cloud.to_string(),
            ..settings()
        }),
    }
}
