use crate::config::AppConfig;
use crate::error::AppError;
use doctrans_service::auth::{
    CloudEnvironment, CredentialAdapter, DeviceCodeInfo, EntraIdClientFactory, InteractiveFlow,
    create_credential_with_factory,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds the credential described by the configuration.
pub fn build_credential(config: &AppConfig, device_code: bool) -> Result<CredentialAdapter, AppError> {
    let mut settings = config.application_settings();
    if device_code {
        if let Some(oauth2) = settings.oauth2.as_mut() {
            oauth2.interactive_flow = InteractiveFlow::DeviceCode;
        }
    }

    let factory = EntraIdClientFactory::default()
        .with_device_code_callback(Arc::new(|info: &DeviceCodeInfo| {
            eprintln!("{}", info.message);
        }));
    Ok(create_credential_with_factory(&settings, Arc::new(factory))?)
}

/// Acquires a token and reports its expiry, printing the token itself only on request.
pub async fn token(
    credential: &CredentialAdapter,
    cancel: &CancellationToken,
    show: bool,
) -> Result<(), AppError> {
    let token = credential
        .get_token_async(&[credential.default_scope()], cancel)
        .await?;

    if show {
        println!("{}", token.token);
    } else {
        println!("Access token acquired, expires at {}", token.expires_on);
    }
    Ok(())
}

/// Signs in if needed and prints the signed-in principal as JSON.
pub async fn whoami(credential: &CredentialAdapter, cancel: &CancellationToken) -> Result<(), AppError> {
    credential
        .get_token_async(&[credential.default_scope()], cancel)
        .await?;

    let authenticator = credential.authenticator();
    match authenticator.current_user().await {
        Some(user) if authenticator.state().has_token() => {
            println!("{}", serde_json::to_string_pretty(&user)?)
        }
        _ => println!("Not signed in"),
    }
    Ok(())
}

/// Discards the session held by this process.
pub async fn sign_out(credential: &CredentialAdapter) -> Result<(), AppError> {
    credential.authenticator().sign_out().await?;
    log::info!("Session discarded");
    Ok(())
}

/// Prints the endpoints of `cloud`, or of the configured cloud.
pub fn endpoints(config: &AppConfig, cloud: Option<&str>) -> Result<(), AppError> {
    let cloud = match (cloud, config.oauth2()) {
        (Some(cloud), _) => CloudEnvironment::parse(cloud),
        (None, Some(oauth2)) => oauth2.cloud(),
        (None, None) => CloudEnvironment::default(),
    };
    let endpoints = cloud.endpoints();

    println!("cloud:     {cloud}");
    println!("authority: {}", endpoints.authority_base_url);
    println!("scope:     {}", endpoints.default_api_scope);
    if let Some(oauth2) = config.oauth2() {
        if !oauth2.tenant_id.trim().is_empty() {
            println!("tenant:    {}", cloud.authority(&oauth2.tenant_id));
        }
    }
    Ok(())
}
