//! Sovereign cloud endpoint resolution.
//!
//! Maps a free-form cloud environment identifier (as found in configuration)
//! to the identity-provider authority host and the default Cognitive Services
//! scope of that cloud. Resolution is total: anything unrecognised, including
//! the empty string, resolves to Azure Government, the primary deployment
//! target.

use std::fmt;

/// Entra ID login host for Azure Government.
pub const GOVERNMENT_AUTHORITY_HOST: &str = "https://login.microsoftonline.us";
/// Entra ID login host for Azure China (21Vianet).
pub const CHINA_AUTHORITY_HOST: &str = "https://login.chinacloudapi.cn";
/// Entra ID login host for the public cloud.
pub const PUBLIC_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

pub const GOVERNMENT_DEFAULT_SCOPE: &str = "https://cognitiveservices.azure.us/.default";
pub const CHINA_DEFAULT_SCOPE: &str = "https://cognitiveservices.azure.cn/.default";
pub const PUBLIC_DEFAULT_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Sovereign deployment region of the identity and translation services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CloudEnvironment {
    #[default]
    Government,
    China,
    Public,
}

impl CloudEnvironment {
    /// Parses a configured identifier, case-insensitively.
    ///
    /// Unknown values fall back to [`CloudEnvironment::Government`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "azuregovernment" | "government" | "gov" => CloudEnvironment::Government,
            "azurechina" | "china" => CloudEnvironment::China,
            "azurepublic" | "public" | "commercial" => CloudEnvironment::Public,
            _ => CloudEnvironment::Government,
        }
    }

    pub fn authority_host(self) -> &'static str {
        match self {
            CloudEnvironment::Government => GOVERNMENT_AUTHORITY_HOST,
            CloudEnvironment::China => CHINA_AUTHORITY_HOST,
            CloudEnvironment::Public => PUBLIC_AUTHORITY_HOST,
        }
    }

    pub fn default_scope(self) -> &'static str {
        match self {
            CloudEnvironment::Government => GOVERNMENT_DEFAULT_SCOPE,
            CloudEnvironment::China => CHINA_DEFAULT_SCOPE,
            CloudEnvironment::Public => PUBLIC_DEFAULT_SCOPE,
        }
    }

    /// Tenant-specific authority, `https://<login-host>/<tenant_id>`.
    pub fn authority(self, tenant_id: &str) -> String {
        format!("{}/{}", self.authority_host(), tenant_id.trim())
    }

    pub fn endpoints(self) -> CloudEndpoints {
        CloudEndpoints {
            authority_base_url: self.authority_host().to_string(),
            default_api_scope: self.default_scope().to_string(),
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudEnvironment::Government => "AzureGovernment",
            CloudEnvironment::China => "AzureChina",
            CloudEnvironment::Public => "AzurePublic",
        };
        f.write_str(name)
    }
}

/// Endpoints derived from a cloud environment. Never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudEndpoints {
    pub authority_base_url: String,
    pub default_api_scope: String,
}

/// Resolves a cloud environment identifier to its endpoints.
pub fn resolve(cloud_environment: &str) -> CloudEndpoints {
    CloudEnvironment::parse(cloud_environment).endpoints()
}
