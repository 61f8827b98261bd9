use crate::error::AppError;
use config::{Config, Environment, File, Map};
use doctrans_service::auth::{ApplicationSettings, AuthenticationSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "doctrans.toml";
const ENV_PREFIX: &str = "DOCTRANS";

/// Settings read by the command-line front end.
///
/// Sources, later ones winning:
///
/// 1. `<config dir>/doctrans/config.toml`
/// 2. `doctrans.toml` in the working directory, or the file passed with `--config`
/// 3. `DOCTRANS__*` environment variables (after `.env` is loaded),
///    e.g. `DOCTRANS__OAUTH2__CLIENT_ID`
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(
        default,
        alias = "UseOAuth2Authentication",
        alias = "useoauth2authentication"
    )]
    use_oauth2_authentication: bool,
    #[serde(default, alias = "OAuth2")]
    oauth2: Option<AuthenticationSettings>,
    #[serde(default)]
    logging: LoggingConfig,
}

impl AppConfig {
    pub fn application_settings(&self) -> ApplicationSettings {
        ApplicationSettings {
            use_oauth2_authentication: self.use_oauth2_authentication,
            oauth2: self.oauth2.clone(),
        }
    }

    pub fn oauth2(&self) -> Option<&AuthenticationSettings> {
        self.oauth2.as_ref()
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

/// Loads configuration from files and the process environment.
pub fn load_config(explicit_file: Option<&Path>) -> Result<AppConfig, AppError> {
    dotenv::dotenv().ok();
    load_from(explicit_file, None)
}

/// Loads configuration; `env` replaces the process environment when given.
fn load_from(
    explicit_file: Option<&Path>,
    env: Option<Map<String, String>>,
) -> Result<AppConfig, AppError> {
    let mut builder = Config::builder();

    match explicit_file {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        None => {
            if let Some(user_file) = user_config_file() {
                builder = builder.add_source(File::from(user_file).required(false));
            }
            builder = builder.add_source(File::from(Path::new(CONFIG_FILE)).required(false));
        }
    }

    let config = builder
        .add_source(environment(env))
        .build()
        .map_err(|e| {
            AppError::Config(format!(
                "Configuration loading failed: {e}. Please check {CONFIG_FILE} and environment variables."
            ))
        })?;

    config
        .try_deserialize::<AppConfig>()
        .map_err(|e| AppError::Config(format!("Failed to deserialize config: {e}")))
}

fn environment(source: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("oauth2.scopes")
        .source(source)
}

fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("doctrans").join("config.toml"))
}
