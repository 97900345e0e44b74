//! Browser session tokens.
//!
//! A logged-in browser carries two cookies: the username and the backend
//! session id, the latter as the canonical UUID string of the 16 bytes the
//! backend issued. The gateway keeps no session state of its own.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use protocol::{Auth, SESSION_ID_LENGTH};
use thiserror::Error;
use uuid::Uuid;

pub const USERNAME_COOKIE: &str = "username";
pub const SESSION_COOKIE: &str = "sessionID";

/// Why a request carries no usable session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthMissing {
    #[error("no username cookie")]
    Username,

    #[error("no session cookie")]
    SessionId,

    #[error("session cookie is not a valid id")]
    MalformedSessionId,
}

/// Identity of a logged-in browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub id: Uuid,
}

impl Session {
    /// Read the session from request cookies.
    pub fn extract(jar: &CookieJar) -> Result<Self, AuthMissing> {
        let username = jar
            .get(USERNAME_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AuthMissing::Username)?;
        let id = jar.get(SESSION_COOKIE).ok_or(AuthMissing::SessionId)?;
        let id = Uuid::parse_str(id.value()).map_err(|_| AuthMissing::MalformedSessionId)?;

        Ok(Self { username, id })
    }

    /// Build a session from the id bytes returned by `login`.
    pub fn from_login(username: impl Into<String>, id: &[u8]) -> Option<Self> {
        if id.len() != SESSION_ID_LENGTH {
            return None;
        }
        Some(Self {
            username: username.into(),
            id: Uuid::from_slice(id).ok()?,
        })
    }

    /// Credentials for backend requests made on behalf of this session.
    pub fn auth(&self) -> Auth {
        Auth::Session {
            username: self.username.clone(),
            session_id: self.id.as_bytes().to_vec(),
        }
    }

    /// Add this session's cookies to `jar`.
    pub fn store(&self, jar: CookieJar, secure: bool) -> CookieJar {
        jar.add(session_cookie(USERNAME_COOKIE, self.username.clone(), secure))
            .add(session_cookie(SESSION_COOKIE, self.id.to_string(), secure))
    }
}

/// Credentials for a `login` request.
pub fn from_credentials(username: &str, password: &str) -> Auth {
    Auth::UserPassword {
        username: username.to_string(),
        password: password.to_string(),
    }
}

/// Remove both session cookies.
pub fn clear(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(USERNAME_COOKIE).path("/").build())
        .remove(Cookie::build(SESSION_COOKIE).path("/").build())
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}
