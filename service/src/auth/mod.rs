pub mod auth_state;
pub mod authenticator;
pub mod cloud;
pub mod credential;
pub mod entra_id;
pub mod executor;
pub mod factory;
pub mod loopback;
pub mod pkce;
pub mod provider;
pub mod types;

pub use auth_state::{AuthenticationState, CredentialEvent};
pub use authenticator::TokenAuthenticator;
pub use cloud::{CloudEndpoints, CloudEnvironment, resolve};
pub use credential::CredentialAdapter;
pub use entra_id::{DeviceCodeCallback, DeviceCodeInfo, EntraIdClientFactory, EntraIdPublicClient};
pub use executor::InteractiveExecutor;
pub use factory::{create_credential, create_credential_with_factory, create_token_credential};
pub use provider::{
    Account, AuthenticationResult, ClientApplicationConfig, IdentityProviderFactory,
    PublicClientApplication, SilentOutcome,
};
pub use types::{
    AccessToken, ApplicationSettings, AuthenticationSettings, CachedToken, InteractiveFlow,
    TOKEN_REFRESH_BUFFER_SECS, UserInfo,
};
