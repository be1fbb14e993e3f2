//! Front-channel OAuth2/OIDC login flow
//!
//! Implements the Authorization-Code-with-PKCE exchange against an external
//! identity provider: proof-key generation, authorization redirect
//! construction, and code-for-token exchange at the provider's token
//! endpoint.

pub mod flow;
pub mod metadata;
pub mod pkce;

pub use flow::{FlowController, FlowError, OAuthClientSettings, TokenSet};
pub use metadata::ProviderMetadata;
