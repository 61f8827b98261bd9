use super::loopback::LoopbackListener;
use super::pkce::{PkcePair, generate_state};
use super::provider::{
    Account, AuthenticationResult, ClientApplicationConfig, IdentityProviderFactory,
    PublicClientApplication, SilentOutcome,
};
use super::types::InteractiveFlow;
use crate::common::IdentityProviderError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeDelta, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// Scopes always requested alongside the API scopes, so that the response
/// carries an ID token (account identity) and a refresh token (silent renewal).
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Error codes meaning the refresh token can no longer be used without the user.
const INTERACTION_REQUIRED_CODES: [&str; 4] = [
    "invalid_grant",
    "interaction_required",
    "login_required",
    "consent_required",
];

/// Device code details to show the user.
#[derive(Clone, Debug)]
pub struct DeviceCodeInfo {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub message: String,
}

/// Called when a device code has been issued and the user must act on it.
pub type DeviceCodeCallback = Arc<dyn Fn(&DeviceCodeInfo) + Send + Sync>;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
    message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize, Default)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    preferred_username: Option<String>,
    upn: Option<String>,
    email: Option<String>,
    name: Option<String>,
}

struct StoredAccount {
    account: Account,
    refresh_token: Option<Zeroizing<String>>,
}

/// Public-client application against the Microsoft identity platform (v2.0).
///
/// Interactive acquisition uses the authorization-code flow with PKCE in the
/// system browser (never an embedded web view), or the device code flow when
/// configured. Silent acquisition redeems the refresh token kept for the
/// account. Accounts and refresh tokens live in memory only.
pub struct EntraIdPublicClient {
    config: ClientApplicationConfig,
    http_client: reqwest::Client,
    tenant_id: String,
    accounts: RwLock<HashMap<String, StoredAccount>>,
    device_code_callback: Option<DeviceCodeCallback>,
}

impl EntraIdPublicClient {
    /// Builds the handle, validating the authority and redirect URI.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityProviderError::InvalidAuthority`] unless the
    /// authority is an `https` URL ending in a tenant segment, and
    /// [`IdentityProviderError::InvalidRedirectUri`] if the redirect URI
    /// cannot be parsed.
    pub fn new(
        config: ClientApplicationConfig,
        http_client: reqwest::Client,
    ) -> Result<Self, IdentityProviderError> {
        let tenant_id = validate_authority(&config.authority)?;
        Url::parse(&config.redirect_uri).map_err(|e| IdentityProviderError::InvalidRedirectUri {
            uri: config.redirect_uri.clone(),
            reason: e.to_string(),
        })?;
        if config.client_id.trim().is_empty() {
            return Err(IdentityProviderError::Internal(
                "client id must not be empty".to_string(),
            ));
        }

        Ok(Self::with_tenant(config, http_client, tenant_id))
    }

    fn with_tenant(
        config: ClientApplicationConfig,
        http_client: reqwest::Client,
        tenant_id: String,
    ) -> Self {
        Self {
            config,
            http_client,
            tenant_id,
            accounts: RwLock::new(HashMap::new()),
            device_code_callback: None,
        }
    }

    pub fn with_device_code_callback(mut self, callback: DeviceCodeCallback) -> Self {
        self.device_code_callback = Some(callback);
        self
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/oauth2/v2.0/{leaf}",
            self.config.authority.trim_end_matches('/')
        )
    }

    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, IdentityProviderError> {
        let url = self.endpoint("token");
        let response = self
            .http_client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| IdentityProviderError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(protocol_error(response).await);
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            IdentityProviderError::InvalidResponse(format!("Failed to parse token response: {e}"))
        })
    }

    /// Turns a token response into a result and records the account session.
    async fn complete(
        &self,
        response: TokenResponse,
        requested: &[String],
        known_account: Option<&Account>,
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        let expires_on = i64::try_from(response.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                IdentityProviderError::InvalidResponse(format!(
                    "Token lifetime of {}s is out of range",
                    response.expires_in
                ))
            })?;

        let account = match response.id_token.as_deref() {
            Some(id_token) => account_from_id_token(id_token, &self.tenant_id)?,
            None => known_account.cloned().ok_or_else(|| {
                IdentityProviderError::InvalidResponse(
                    "Token response carried no ID token to identify the account".to_string(),
                )
            })?,
        };

        {
            let mut accounts = self.accounts.write().await;
            let previous = accounts.remove(&account.home_account_id);
            let refresh_token = response
                .refresh_token
                .map(Zeroizing::new)
                .or_else(|| previous.and_then(|stored| stored.refresh_token));
            accounts.insert(
                account.home_account_id.clone(),
                StoredAccount {
                    account: account.clone(),
                    refresh_token,
                },
            );
        }

        let scopes = response
            .scope
            .map(|granted| granted.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| requested.to_vec());

        Ok(AuthenticationResult {
            access_token: response.access_token,
            expires_on,
            tenant_id: account.tenant_id.clone(),
            account,
            scopes,
        })
    }

    async fn acquire_with_browser(
        &self,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        let listener = LoopbackListener::bind(&self.config.redirect_uri).await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let pkce = PkcePair::generate();
        let state = generate_state();
        let scope = request_scope(scopes);

        let authorize_url = Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| IdentityProviderError::Internal(format!("Invalid authorize URL: {e}")))?;

        log::info!("Opening system browser for interactive sign-in");
        if let Err(e) = open::that_detached(authorize_url.as_str()) {
            log::warn!("Could not open the system browser ({e}); sign in at: {authorize_url}");
        }

        let timeout = self.config.interactive_timeout;
        let params = tokio::time::timeout(timeout, listener.accept_redirect())
            .await
            .map_err(|_| IdentityProviderError::Timeout {
                seconds: timeout.as_secs(),
            })??;
        let code = params.into_code(&state)?;

        self.redeem_authorization_code(&code, &redirect_uri, &pkce.verifier, scopes)
            .await
    }

    async fn redeem_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        let scope = request_scope(scopes);
        let response = self
            .post_token_request(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
                ("scope", scope.as_str()),
            ])
            .await?;

        self.complete(response, scopes, None).await
    }

    async fn acquire_with_device_code(
        &self,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        let scope = request_scope(scopes);
        let device_code = self.start_device_code_flow(&scope).await?;

        let info = DeviceCodeInfo {
            user_code: device_code.user_code.clone(),
            verification_uri: device_code.verification_uri.clone(),
            expires_in: device_code.expires_in,
            message: device_code.message.clone(),
        };
        match &self.device_code_callback {
            Some(callback) => callback(&info),
            None => log::warn!("{}", info.message),
        }

        let response = self.poll_device_code_token(&device_code).await?;
        self.complete(response, scopes, None).await
    }

    async fn start_device_code_flow(
        &self,
        scope: &str,
    ) -> Result<DeviceCodeResponse, IdentityProviderError> {
        let url = self.endpoint("devicecode");
        let params = [("client_id", self.config.client_id.as_str()), ("scope", scope)];

        let response = self
            .http_client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| IdentityProviderError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(protocol_error(response).await);
        }

        response.json().await.map_err(|e| {
            IdentityProviderError::InvalidResponse(format!(
                "Failed to parse device code response: {e}"
            ))
        })
    }

    async fn poll_device_code_token(
        &self,
        device_code: &DeviceCodeResponse,
    ) -> Result<TokenResponse, IdentityProviderError> {
        let url = self.endpoint("token");
        let mut interval = std::time::Duration::from_secs(device_code.interval.max(1));
        let timeout = std::time::Duration::from_secs(device_code.expires_in)
            .min(self.config.interactive_timeout);
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(IdentityProviderError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }

            tokio::time::sleep(interval).await;

            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code.device_code.as_str()),
            ];

            let response = self
                .http_client
                .post(&url)
                .form(&params)
                .send()
                .await
                .map_err(|e| IdentityProviderError::RequestFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

            if response.status().is_success() {
                return response.json().await.map_err(|e| {
                    IdentityProviderError::InvalidResponse(format!(
                        "Failed to parse token response: {e}"
                    ))
                });
            }

            match protocol_error(response).await {
                IdentityProviderError::Protocol { code, .. } if code == "authorization_pending" => {
                    log::debug!("Waiting for user to complete device code sign-in");
                }
                IdentityProviderError::Protocol { code, .. } if code == "slow_down" => {
                    log::debug!("Polling too frequently, increasing interval");
                    interval += std::time::Duration::from_secs(5);
                }
                other => return Err(other),
            }
        }
    }
}

#[async_trait]
impl PublicClientApplication for EntraIdPublicClient {
    async fn accounts(&self) -> Result<Vec<Account>, IdentityProviderError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().map(|stored| stored.account.clone()).collect())
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<SilentOutcome, IdentityProviderError> {
        let refresh_token = {
            let accounts = self.accounts.read().await;
            accounts
                .get(&account.home_account_id)
                .and_then(|stored| stored.refresh_token.clone())
        };
        let Some(refresh_token) = refresh_token else {
            return Ok(SilentOutcome::InteractionRequired {
                reason: "no refresh token for account".to_string(),
            });
        };

        let scope = request_scope(scopes);
        let response = self
            .post_token_request(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("scope", scope.as_str()),
            ])
            .await;

        match response {
            Ok(response) => Ok(SilentOutcome::Acquired(
                self.complete(response, scopes, Some(account)).await?,
            )),
            Err(IdentityProviderError::Protocol { code, description })
                if INTERACTION_REQUIRED_CODES.contains(&code.as_str()) =>
            {
                log::debug!("Silent acquisition needs interaction: {code}");
                Ok(SilentOutcome::InteractionRequired {
                    reason: format!("{code}: {description}"),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
    ) -> Result<AuthenticationResult, IdentityProviderError> {
        match self.config.interactive_flow {
            InteractiveFlow::SystemBrowser => self.acquire_with_browser(scopes).await,
            InteractiveFlow::DeviceCode => self.acquire_with_device_code(scopes).await,
        }
    }

    async fn remove_account(&self, account: &Account) -> Result<(), IdentityProviderError> {
        let removed = self
            .accounts
            .write()
            .await
            .remove(&account.home_account_id);
        if removed.is_none() {
            log::debug!("Account '{}' had no local session", account.username);
        }
        Ok(())
    }
}

/// Builds [`EntraIdPublicClient`] handles sharing one HTTP client.
#[derive(Clone, Default)]
pub struct EntraIdClientFactory {
    http_client: reqwest::Client,
    device_code_callback: Option<DeviceCodeCallback>,
}

impl EntraIdClientFactory {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            device_code_callback: None,
        }
    }

    pub fn with_device_code_callback(mut self, callback: DeviceCodeCallback) -> Self {
        self.device_code_callback = Some(callback);
        self
    }
}

impl IdentityProviderFactory for EntraIdClientFactory {
    fn build(
        &self,
        config: &ClientApplicationConfig,
    ) -> Result<Arc<dyn PublicClientApplication>, IdentityProviderError> {
        let mut client = EntraIdPublicClient::new(config.clone(), self.http_client.clone())?;
        if let Some(callback) = &self.device_code_callback {
            client = client.with_device_code_callback(callback.clone());
        }
        Ok(Arc::new(client))
    }
}

/// Returns the tenant segment of a valid authority.
fn validate_authority(authority: &str) -> Result<String, IdentityProviderError> {
    let invalid = |reason: &str| IdentityProviderError::InvalidAuthority {
        authority: authority.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(authority).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "https" {
        return Err(invalid("authority must use https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("authority has no host"));
    }
    url.path_segments()
        .and_then(|mut segments| segments.find(|segment| !segment.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| invalid("authority has no tenant segment"))
}

fn request_scope(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for reserved in RESERVED_SCOPES {
        if !all.contains(&reserved) {
            all.push(reserved);
        }
    }
    all.join(" ")
}

async fn protocol_error(response: reqwest::Response) -> IdentityProviderError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(error) => IdentityProviderError::Protocol {
            description: error
                .error_description
                .unwrap_or_else(|| format!("HTTP {status}")),
            code: error.error,
        },
        Err(_) => IdentityProviderError::InvalidResponse(format!(
            "HTTP {status} without an OAuth2 error body"
        )),
    }
}

/// Reads the account identity out of an ID token.
///
/// The token arrived over TLS straight from the token endpoint, so only the
/// payload is decoded; the signature is not checked.
fn account_from_id_token(
    id_token: &str,
    fallback_tenant: &str,
) -> Result<Account, IdentityProviderError> {
    let payload = id_token.split('.').nth(1).ok_or_else(|| {
        IdentityProviderError::InvalidResponse("ID token is not a JWT".to_string())
    })?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| IdentityProviderError::InvalidResponse(format!("ID token payload: {e}")))?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| IdentityProviderError::InvalidResponse(format!("ID token claims: {e}")))?;

    let tenant_id = claims
        .tid
        .clone()
        .unwrap_or_else(|| fallback_tenant.to_string());
    let object_id = claims.oid.or(claims.sub).ok_or_else(|| {
        IdentityProviderError::InvalidResponse("ID token has no subject".to_string())
    })?;
    let home_account_id = format!("{object_id}.{tenant_id}");
    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.email)
        .unwrap_or_else(|| home_account_id.clone());

    Ok(Account {
        home_account_id,
        username,
        tenant_id,
        display_name: claims.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(authority: &str) -> ClientApplicationConfig {
        ClientApplicationConfig {
            client_id: "client".to_string(),
            authority: authority.to_string(),
            redirect_uri: "http://localhost".to_string(),
            interactive_flow: InteractiveFlow::SystemBrowser,
            interactive_timeout: StdDuration::from_secs(60),
        }
    }

    fn id_token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn authority_validation() {
        assert_eq!(
            validate_authority("https://login.microsoftonline.us/t1").unwrap(),
            "t1"
        );
        assert!(validate_authority("not a url").is_err());
        assert!(validate_authority("http://login.microsoftonline.us/t1").is_err());
        assert!(validate_authority("https://login.microsoftonline.us/").is_err());
    }

    #[test]
    fn malformed_authority_fails_construction() {
        let result = EntraIdPublicClient::new(config("https:///"), reqwest::Client::new());
        assert!(matches!(
            result,
            Err(IdentityProviderError::InvalidAuthority { .. })
        ));
    }

    #[test]
    fn request_scope_appends_reserved_scopes_once() {
        let scopes = vec![
            "https://cognitiveservices.azure.us/.default".to_string(),
            "openid".to_string(),
        ];
        assert_eq!(
            request_scope(&scopes),
            "https://cognitiveservices.azure.us/.default openid profile offline_access"
        );
    }

    #[test]
    fn account_from_id_token_claims() {
        let token = id_token(serde_json::json!({
            "oid": "object-1",
            "tid": "tenant-1",
            "preferred_username": "ada@contoso.us",
            "name": "Ada Lovelace"
        }));
        let account = account_from_id_token(&token, "fallback").unwrap();
        assert_eq!(account.home_account_id, "object-1.tenant-1");
        assert_eq!(account.username, "ada@contoso.us");
        assert_eq!(account.tenant_id, "tenant-1");
        assert_eq!(account.display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn account_from_id_token_without_username_uses_home_id() {
        let token = id_token(serde_json::json!({ "sub": "subject-9" }));
        let account = account_from_id_token(&token, "t1").unwrap();
        assert_eq!(account.home_account_id, "subject-9.t1");
        assert_eq!(account.username, "subject-9.t1");
        assert!(account_from_id_token("opaque", "t1").is_err());
    }

    #[tokio::test]
    async fn silent_without_refresh_token_requires_interaction() {
        let client = EntraIdPublicClient::new(
            config("https://login.microsoftonline.us/t1"),
            reqwest::Client::new(),
        )
        .unwrap();
        let account = Account {
            home_account_id: "o.t1".to_string(),
            username: "user@contoso.us".to_string(),
            tenant_id: "t1".to_string(),
            display_name: None,
        };

        let outcome = client
            .acquire_token_silent(&["scope".to_string()], &account)
            .await
            .unwrap();
        assert!(matches!(outcome, SilentOutcome::InteractionRequired { .. }));
        assert!(client.accounts().await.unwrap().is_empty());
        assert!(client.remove_account(&account).await.is_ok());
    }

    fn account() -> Account {
        Account {
            home_account_id: "object-1.t1".to_string(),
            username: "ada@contoso.us".to_string(),
            tenant_id: "t1".to_string(),
            display_name: None,
        }
    }

    fn token_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
        serde_json::json!({
            "token_type": "Bearer",
            "access_token": access_token,
            "expires_in": 3600,
            "refresh_token": refresh_token,
            "scope": "https://cognitiveservices.azure.us/.default",
            "id_token": id_token(serde_json::json!({
                "oid": "object-1",
                "tid": "t1",
                "preferred_username": "ada@contoso.us"
            })),
        })
    }

    fn error_body(code: &str) -> serde_json::Value {
        serde_json::json!({ "error": code, "error_description": format!("{code} raised") })
    }

    /// Client whose authority points at a local mock of the identity platform.
    fn mock_client(server: &MockServer) -> EntraIdPublicClient {
        EntraIdPublicClient::with_tenant(
            config(&format!("{}/t1", server.uri())),
            reqwest::Client::new(),
            "t1".to_string(),
        )
    }

    async fn seed_refresh_token(client: &EntraIdPublicClient, refresh_token: &str) {
        client.accounts.write().await.insert(
            account().home_account_id,
            StoredAccount {
                account: account(),
                refresh_token: Some(Zeroizing::new(refresh_token.to_string())),
            },
        );
    }

    async fn stored_refresh_token(client: &EntraIdPublicClient) -> Option<String> {
        client
            .accounts
            .read()
            .await
            .get(&account().home_account_id)
            .and_then(|stored| stored.refresh_token.as_ref().map(|t| t.to_string()))
    }

    fn scopes() -> Vec<String> {
        vec!["https://cognitiveservices.azure.us/.default".to_string()]
    }

    #[tokio::test]
    async fn oversized_token_lifetime_is_an_invalid_response() {
        let client = EntraIdPublicClient::new(
            config("https://login.microsoftonline.us/t1"),
            reqwest::Client::new(),
        )
        .unwrap();

        for expires_in in [1u64 << 62, u64::MAX] {
            let response = TokenResponse {
                access_token: "at".to_string(),
                expires_in,
                refresh_token: Some("rt".to_string()),
                id_token: None,
                scope: None,
            };
            let result = client.complete(response, &scopes(), Some(&account())).await;
            assert!(matches!(
                result,
                Err(IdentityProviderError::InvalidResponse(_))
            ));
        }
        assert!(client.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_grant_records_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2", "rt-2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server);
        seed_refresh_token(&client, "rt-1").await;

        let outcome = client
            .acquire_token_silent(&scopes(), &account())
            .await
            .unwrap();
        let SilentOutcome::Acquired(result) = outcome else {
            panic!("expected a token, got {outcome:?}");
        };
        assert_eq!(result.access_token, "at-2");
        assert_eq!(result.account.username, "ada@contoso.us");
        assert!(result.expires_on > Utc::now() + TimeDelta::minutes(55));
        assert_eq!(stored_refresh_token(&client).await.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn rejected_refresh_token_requires_interaction() {
        for code in ["invalid_grant", "interaction_required"] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/t1/oauth2/v2.0/token"))
                .respond_with(ResponseTemplate::new(400).set_body_json(error_body(code)))
                .mount(&server)
                .await;

            let client = mock_client(&server);
            seed_refresh_token(&client, "rt-1").await;

            let outcome = client
                .acquire_token_silent(&scopes(), &account())
                .await
                .unwrap();
            match outcome {
                SilentOutcome::InteractionRequired { reason } => assert!(reason.contains(code)),
                other => panic!("expected interaction required for {code}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn other_refresh_errors_are_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(error_body("invalid_client")))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        seed_refresh_token(&client, "rt-1").await;

        let err = client
            .acquire_token_silent(&scopes(), &account())
            .await
            .unwrap_err();
        assert_eq!(err.protocol_code(), Some("invalid_client"));
        assert_eq!(stored_refresh_token(&client).await.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn error_without_oauth2_body_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        seed_refresh_token(&client, "rt-1").await;

        let err = client
            .acquire_token_silent(&scopes(), &account())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityProviderError::InvalidResponse(_)));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn authorization_code_is_redeemed_with_verifier_and_redirect_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("client_id=client"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("code_verifier=verifier-123"))
            .and(body_string_contains(
                "redirect_uri=http%3A%2F%2Flocalhost%3A8400",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let result = client
            .redeem_authorization_code("auth-code", "http://localhost:8400", "verifier-123", &scopes())
            .await
            .unwrap();

        assert_eq!(result.access_token, "at-1");
        assert_eq!(result.tenant_id, "t1");
        assert_eq!(result.scopes, scopes());
        assert_eq!(client.accounts().await.unwrap(), vec![account()]);
        assert_eq!(stored_refresh_token(&client).await.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn device_code_flow_polls_through_pending_and_slow_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/devicecode"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dc-1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 1,
                "message": "Enter ABCD-EFGH at https://microsoft.com/devicelogin"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(error_body("authorization_pending")),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body("slow_down")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
            .expect(1)
            .mount(&server)
            .await;

        let shown = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&shown);
        let mut client_config = config(&format!("{}/t1", server.uri()));
        client_config.interactive_flow = InteractiveFlow::DeviceCode;
        let client = EntraIdPublicClient::with_tenant(
            client_config,
            reqwest::Client::new(),
            "t1".to_string(),
        )
        .with_device_code_callback(Arc::new(move |info: &DeviceCodeInfo| {
            *sink.lock().unwrap() = Some(info.user_code.clone());
        }));

        let started = std::time::Instant::now();
        let result = client.acquire_token_interactive(&scopes()).await.unwrap();

        assert_eq!(result.access_token, "at-1");
        assert_eq!(shown.lock().unwrap().as_deref(), Some("ABCD-EFGH"));
        // One second before each of the first two polls, six after slow_down.
        assert!(started.elapsed() >= StdDuration::from_secs(8));
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path().ends_with("/token"))
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn device_code_denial_ends_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dc-1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 1,
                "message": "Enter ABCD-EFGH"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(error_body("authorization_declined")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut client_config = config(&format!("{}/t1", server.uri()));
        client_config.interactive_flow = InteractiveFlow::DeviceCode;
        let client = EntraIdPublicClient::with_tenant(
            client_config,
            reqwest::Client::new(),
            "t1".to_string(),
        );

        let err = client.acquire_token_interactive(&scopes()).await.unwrap_err();
        assert_eq!(err.protocol_code(), Some("authorization_declined"));
        assert!(client.accounts().await.unwrap().is_empty());
    }
}
