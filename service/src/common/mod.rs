pub mod errors;

pub use errors::{AuthError, CredentialError, IdentityProviderError};
