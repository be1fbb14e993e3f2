//! Configuration management

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Identity provider and OAuth client settings
    pub oidc: OidcConfig,
    /// Login broker settings
    pub broker: BrokerConfig,
    /// Server-side session settings
    pub session: SessionConfig,
    /// Protected resource server settings
    pub resource: ResourceConfig,
}

/// Identity provider / OAuth client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL of the identity provider. Discovery, token exchange and
    /// JWKS endpoints are all derived from its discovery document.
    pub issuer: String,

    /// OAuth client identifier
    pub client_id: String,

    /// OAuth client secret. Never logged.
    pub client_secret: String,

    /// Scopes requested at authorization time
    pub scopes: Vec<String>,

    /// Audience parameter identifying the target API (provider-specific,
    /// e.g. Auth0). Omitted from the authorization URL when `None`.
    pub audience: Option<String>,
}

/// Login broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listen port for the broker
    pub port: u16,

    /// Redirect URL registered with the provider (the `/oauth-callback` route)
    pub redirect_url: String,

    /// Where the provider should send the browser after a provider-side
    /// logout. When `None`, `/logout` only clears the local session.
    pub post_logout_redirect_url: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            redirect_url: "http://localhost:8080/oauth-callback".to_string(),
            post_logout_redirect_url: None,
        }
    }
}

/// Session store and cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Timeout for a single store operation (get/save/delete)
    pub op_timeout_secs: u64,

    /// Session lifetime. Enforced by the store (key TTL) and mirrored in
    /// the cookie's Max-Age.
    pub max_age_secs: u64,

    /// Session cookie attributes
    pub cookie: CookieConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            op_timeout_secs: 5,
            max_age_secs: 3600,
            cookie: CookieConfig::default(),
        }
    }
}

/// Cookie scope attributes. The cookie is always HttpOnly; that is not
/// configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name
    pub name: String,

    /// Cookie path
    pub path: String,

    /// Set the Secure attribute. Enable whenever the deployment is behind TLS.
    pub secure: bool,

    /// SameSite policy: `strict`, `lax` or `none`
    pub same_site: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "session-id".to_string(),
            path: "/".to_string(),
            secure: false,
            same_site: "lax".to_string(),
        }
    }
}

/// Protected resource server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Listen port for the resource server
    pub port: u16,

    /// Audience the resource server expects in presented tokens
    pub audience: String,

    /// Scopes every request must carry
    pub required_scopes: Vec<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            audience: String::new(),
            required_scopes: vec![],
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `AUTH_BROKER_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file is missing or a value fails to
    /// deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTH_BROKER_ prefix)
        figment = figment.merge(Env::prefixed("AUTH_BROKER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(config)
    }

    /// Validate settings the process cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing or invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(Error::Config("oidc.issuer must be set".to_string()));
        }
        if self.oidc.client_id.trim().is_empty() {
            return Err(Error::Config("oidc.client_id must be set".to_string()));
        }
        if self.oidc.client_secret.trim().is_empty() {
            return Err(Error::Config("oidc.client_secret must be set".to_string()));
        }
        if url::Url::parse(&self.broker.redirect_url).is_err() {
            return Err(Error::Config(format!(
                "broker.redirect_url is not a valid URL: {}",
                self.broker.redirect_url
            )));
        }
        match self.session.cookie.same_site.as_str() {
            "strict" | "lax" | "none" => {}
            other => {
                return Err(Error::Config(format!(
                    "session.cookie.same_site must be strict, lax or none (got {other})"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            oidc: OidcConfig {
                issuer: "https://tenant.example.auth0.com/".to_string(),
                client_id: "client-123".to_string(),
                client_secret: "secret".to_string(),
                scopes: vec!["openid".to_string()],
                audience: Some("https://contacts.example.com".to_string()),
            },
            ..Config::default()
        }
    }

    #[test]
    fn default_config_fails_validation() {
        // Missing issuer/client credentials must be startup-fatal
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_client_secret_is_rejected() {
        let mut config = valid_config();
        config.oidc.client_secret = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn invalid_redirect_url_is_rejected() {
        let mut config = valid_config();
        config.broker.redirect_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_same_site_is_rejected() {
        let mut config = valid_config();
        config.session.cookie.same_site = "sideways".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cookie_defaults_are_restrictive() {
        let cookie = CookieConfig::default();
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.same_site, "lax");
    }
}
