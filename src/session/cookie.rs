//! Session cookie construction
//!
//! The cookie carries only the opaque session id. HttpOnly is always set;
//! path, Secure, SameSite and Max-Age come from [`CookieConfig`] /
//! [`SessionConfig`].

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::SessionConfig;

fn same_site(policy: &str) -> SameSite {
    match policy {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    }
}

/// Build the session cookie for a freshly saved session.
#[must_use]
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie.name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(config.cookie.secure)
        .same_site(same_site(&config.cookie.same_site))
        .path(config.cookie.path.clone())
        .max_age(max_age(config.max_age_secs))
        .build()
}

/// Build an immediate-expiry cookie instruction for logout.
#[must_use]
pub fn clear_session_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie.name.clone(), ""))
        .http_only(true)
        .secure(config.cookie.secure)
        .same_site(same_site(&config.cookie.same_site))
        .path(config.cookie.path.clone())
        .max_age(time::Duration::ZERO)
        .build()
}

fn max_age(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only() {
        let config = SessionConfig::default();
        let cookie = session_cookie(&config, "abc123");
        assert_eq!(cookie.name(), "session-id");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let config = SessionConfig::default();
        let cookie = clear_session_cookie(&config);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }

    #[test]
    fn same_site_policy_is_parsed() {
        let mut config = SessionConfig::default();
        config.cookie.same_site = "strict".to_string();
        let cookie = session_cookie(&config, "id");
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }
}
