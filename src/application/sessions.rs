//! Session management: login, cookie-based authentication, and the
//! logout-everywhere secret rotation.

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::Duration as CookieDuration;
use tracing::info;

use crate::application::token::{self, TokenError};
use crate::cache::entries::UserEntry;
use crate::cache::store::ObjectCache;
use crate::domain::entities::{PASSWORD_HASH_LEN, SESSION_SECRET_LEN};
use crate::domain::ids;

pub const AUTH_COOKIE: &str = "auth_token";

/// Issued-token lifetime: 3 days.
pub const TOKEN_TTL_SECS: i64 = 3 * 24 * 60 * 60;
const TOKEN_TTL_NS: i64 = TOKEN_TTL_SECS * 1_000_000_000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication required")]
    NoToken,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("wrong login or password")]
    BadCredentials,
    #[error("unknown user")]
    UnknownUser,
    #[error("account is disabled")]
    Disabled,
}

pub struct SessionManager {
    cache: Arc<ObjectCache>,
    cookie_domain: String,
}

impl SessionManager {
    pub fn new(cache: Arc<ObjectCache>, cookie_domain: String) -> Self {
        Self {
            cache,
            cookie_domain,
        }
    }

    pub fn hash_password(password: &str) -> [u8; PASSWORD_HASH_LEN] {
        let mut hasher = Sha1::new();
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }

    pub fn generate_secret() -> [u8; SESSION_SECRET_LEN] {
        let mut secret = [0u8; SESSION_SECRET_LEN];
        rand::rng().fill_bytes(&mut secret);
        secret
    }

    /// Verify credentials and issue a fresh cookie. Lookup failure and
    /// hash mismatch collapse into one error so the response does not
    /// reveal which half was wrong.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Arc<UserEntry>, Cookie<'static>), AuthError> {
        let user = self
            .cache
            .find_user_by_login(email)
            .await
            .map_err(|_| AuthError::BadCredentials)?;
        let (stored_hash, secret, enabled) = user
            .record
            .with(|u| (u.password_hash, u.session_secret, u.enabled))
            .await;
        let candidate = Self::hash_password(password);
        if !bool::from(candidate.ct_eq(&stored_hash)) {
            return Err(AuthError::BadCredentials);
        }
        if !enabled {
            return Err(AuthError::Disabled);
        }
        let cookie = self.issue_cookie(user.id(), &secret);
        info!(
            target = "vetrina::sessions",
            user_id = user.id(),
            "User logged in"
        );
        Ok((user, cookie))
    }

    /// Resolve the cookie value to a live, enabled user.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Arc<UserEntry>, AuthError> {
        let token = token.ok_or(AuthError::NoToken)?;
        let decoded = token::decode(token, ids::now_ns())?;
        let user = self
            .cache
            .find_user(decoded.user_id)
            .await
            .map_err(|_| AuthError::UnknownUser)?;
        let (secret, enabled) = user
            .record
            .with(|u| (u.session_secret, u.enabled))
            .await;
        decoded.verify(&secret)?;
        if !enabled {
            return Err(AuthError::Disabled);
        }
        Ok(user)
    }

    /// Fresh cookie for the user's current secret; every authenticated
    /// response carries one so the rolling expiry never surprises an
    /// active user.
    pub fn issue_cookie(&self, user_id: i64, secret: &[u8; SESSION_SECRET_LEN]) -> Cookie<'static> {
        let expires_at_ns = ids::now_ns() + TOKEN_TTL_NS;
        let value = token::issue(user_id, expires_at_ns, secret);
        self.build_cookie(value, CookieDuration::seconds(TOKEN_TTL_SECS))
    }

    /// Overwrite the cookie with an immediately-expiring blank.
    pub fn expired_cookie(&self) -> Cookie<'static> {
        self.build_cookie(String::new(), CookieDuration::ZERO)
    }

    fn build_cookie(&self, value: String, max_age: CookieDuration) -> Cookie<'static> {
        let mut cookie = Cookie::new(AUTH_COOKIE, value);
        cookie.set_path("/");
        cookie.set_secure(true);
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Strict);
        cookie.set_max_age(max_age);
        if !self.cookie_domain.is_empty() {
            cookie.set_domain(self.cookie_domain.clone());
        }
        cookie
    }

    /// Rotate the session secret: O(1) logout-everywhere, every token
    /// issued under the old secret stops verifying.
    pub async fn logout_all(&self, user: &Arc<UserEntry>) -> Cookie<'static> {
        let secret = Self::generate_secret();
        self.cache.rotate_session_secret(user, secret).await;
        info!(
            target = "vetrina::sessions",
            user_id = user.id(),
            "Session secret rotated"
        );
        self.expired_cookie()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::queue::DirtyQueue;
    use crate::cache::store::CreateUserParams;
    use crate::domain::currency::RateTable;

    async fn manager_with_user() -> (SessionManager, Arc<UserEntry>) {
        let cache = Arc::new(ObjectCache::new(
            RateTable::builtin(),
            Arc::new(DirtyQueue::new()),
        ));
        let user = cache
            .create_user(CreateUserParams {
                email: "a@b.c".to_string(),
                name: "A".to_string(),
                password_hash: SessionManager::hash_password("hunter2"),
                session_secret: SessionManager::generate_secret(),
            })
            .await
            .expect("user");
        (SessionManager::new(cache, String::new()), user)
    }

    #[tokio::test]
    async fn login_issues_verifiable_cookie() {
        let (manager, user) = manager_with_user().await;
        let (logged_in, cookie) = manager.login("a@b.c", "hunter2").await.expect("login");
        assert_eq!(logged_in.id(), user.id());
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.http_only(), Some(true));

        let authed = manager
            .authenticate(Some(cookie.value()))
            .await
            .expect("authenticate");
        assert_eq!(authed.id(), user.id());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_identical() {
        let (manager, _user) = manager_with_user().await;
        let wrong_password = manager.login("a@b.c", "nope").await.expect_err("denied");
        let unknown_email = manager
            .login("ghost@b.c", "hunter2")
            .await
            .expect_err("denied");
        assert_eq!(wrong_password, AuthError::BadCredentials);
        assert_eq!(unknown_email, AuthError::BadCredentials);
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (manager, _user) = manager_with_user().await;
        assert_eq!(
            manager.authenticate(None).await.expect_err("no token"),
            AuthError::NoToken
        );
    }

    #[tokio::test]
    async fn secret_rotation_invalidates_outstanding_tokens() {
        let (manager, user) = manager_with_user().await;
        let (_, cookie) = manager.login("a@b.c", "hunter2").await.expect("login");

        manager.logout_all(&user).await;

        let err = manager
            .authenticate(Some(cookie.value()))
            .await
            .expect_err("stale token");
        assert_eq!(err, AuthError::Token(TokenError::BadMac));

        // A fresh login works immediately.
        let (_, fresh) = manager.login("a@b.c", "hunter2").await.expect("re-login");
        manager
            .authenticate(Some(fresh.value()))
            .await
            .expect("fresh token verifies");
    }

    #[tokio::test]
    async fn cookie_ttl_is_three_days() {
        let (manager, user) = manager_with_user().await;
        let secret = user.record.with(|u| u.session_secret).await;
        let cookie = manager.issue_cookie(user.id(), &secret);
        assert_eq!(
            cookie.max_age(),
            Some(CookieDuration::seconds(TOKEN_TTL_SECS))
        );
    }
}
