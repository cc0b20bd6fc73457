//! Account registration and profile maintenance.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::info;

use crate::application::error::AppError;
use crate::application::sessions::{AuthError, SessionManager};
use crate::cache::entries::UserEntry;
use crate::cache::store::{CreateUserParams, ObjectCache};
use crate::domain::entities::UserPatch;
use crate::domain::error::DomainError;
use crate::domain::moderation;

const MIN_PASSWORD_LEN: usize = 6;

pub struct AccountService {
    cache: Arc<ObjectCache>,
}

impl AccountService {
    pub fn new(cache: Arc<ObjectCache>) -> Self {
        Self { cache }
    }

    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<Arc<UserEntry>, AppError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("email address is invalid").into());
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name must not be empty").into());
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ))
            .into());
        }
        moderation::check(&[name])?;

        let user = self
            .cache
            .create_user(CreateUserParams {
                email: email.to_string(),
                name: name.trim().to_string(),
                password_hash: SessionManager::hash_password(password),
                session_secret: SessionManager::generate_secret(),
            })
            .await?;
        info!(
            target = "vetrina::accounts",
            user_id = user.id(),
            "Registered user"
        );
        Ok(user)
    }

    pub async fn update_profile(
        &self,
        user: &Arc<UserEntry>,
        patch: UserPatch,
    ) -> Result<(), AppError> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name must not be empty").into());
            }
            moderation::check(&[name])?;
        }
        if let Some(description) = &patch.description {
            moderation::check(&[description])?;
        }
        self.cache.update_user(user, patch).await;
        Ok(())
    }

    pub async fn change_password(
        &self,
        user: &Arc<UserEntry>,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ))
            .into());
        }
        let stored = user.record.with(|u| u.password_hash).await;
        let candidate = SessionManager::hash_password(old_password);
        if !bool::from(candidate.ct_eq(&stored)) {
            return Err(AuthError::BadCredentials.into());
        }
        self.cache
            .update_password(user, SessionManager::hash_password(new_password))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::queue::DirtyQueue;
    use crate::domain::currency::RateTable;

    fn service() -> AccountService {
        AccountService::new(Arc::new(ObjectCache::new(
            RateTable::builtin(),
            Arc::new(DirtyQueue::new()),
        )))
    }

    #[tokio::test]
    async fn register_rejects_invalid_input() {
        let accounts = service();
        assert!(accounts.register("no-at-sign", "A", "secret1").await.is_err());
        assert!(accounts.register("a@b.c", "", "secret1").await.is_err());
        assert!(accounts.register("a@b.c", "A", "short").await.is_err());
    }

    #[tokio::test]
    async fn register_then_change_password() {
        let accounts = service();
        let user = accounts
            .register("a@b.c", "A", "hunter2")
            .await
            .expect("register");

        let denied = accounts
            .change_password(&user, "wrong-old", "hunter333")
            .await;
        assert!(denied.is_err());

        accounts
            .change_password(&user, "hunter2", "hunter333")
            .await
            .expect("change");
        let stored = user.record.with(|u| u.password_hash).await;
        assert_eq!(stored, SessionManager::hash_password("hunter333"));
    }

    #[tokio::test]
    async fn profile_update_runs_moderation() {
        let accounts = service();
        let user = accounts
            .register("a@b.c", "A", "hunter2")
            .await
            .expect("register");

        let rejected = accounts
            .update_profile(
                &user,
                UserPatch {
                    description: Some("fuck this".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(rejected.is_err());

        accounts
            .update_profile(
                &user,
                UserPatch {
                    description: Some("friendly landlord".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(
            user.record.with(|u| u.description.clone()).await,
            "friendly landlord"
        );
    }
}
