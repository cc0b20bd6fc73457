//! Persistence adapter seam.
//!
//! The cache is the authority; a driver only mirrors it. Operations
//! must be idempotent under retry (create-if-absent, delete-if-present)
//! because the flush worker re-issues a call after any failure.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{AdvRecord, PhotoRecord, UserRecord, WatchesRecord};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("driver encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("driver unavailable: {message}")]
    Unavailable { message: String },
}

impl DriverError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Everything the driver knows at startup.
#[derive(Debug, Default, Clone)]
pub struct StoreSnapshot {
    pub users: Vec<UserRecord>,
    pub advs: Vec<AdvRecord>,
    pub photos: Vec<PhotoRecord>,
    pub watches: Vec<WatchesRecord>,
}

/// Narrow create/update/delete interface per entity kind.
///
/// `update_*` receives the last persisted snapshot alongside the new
/// one; a driver may diff the two and write only changed fields, or
/// replace the record wholesale.
#[async_trait]
pub trait PersistenceDriver: Send + Sync {
    async fn create_user(&self, user: &UserRecord) -> Result<(), DriverError>;
    async fn update_user(
        &self,
        old: Option<&UserRecord>,
        new: &UserRecord,
    ) -> Result<(), DriverError>;
    async fn delete_user(&self, id: i64) -> Result<(), DriverError>;

    async fn create_adv(&self, adv: &AdvRecord) -> Result<(), DriverError>;
    async fn update_adv(&self, old: Option<&AdvRecord>, new: &AdvRecord)
    -> Result<(), DriverError>;
    async fn delete_adv(&self, id: i64) -> Result<(), DriverError>;

    async fn create_photo(&self, photo: &PhotoRecord) -> Result<(), DriverError>;
    async fn update_photo(
        &self,
        old: Option<&PhotoRecord>,
        new: &PhotoRecord,
    ) -> Result<(), DriverError>;
    async fn delete_photo(&self, id: i64) -> Result<(), DriverError>;

    async fn create_watches(&self, watches: &WatchesRecord) -> Result<(), DriverError>;
    async fn update_watches(
        &self,
        old: Option<&WatchesRecord>,
        new: &WatchesRecord,
    ) -> Result<(), DriverError>;
    async fn delete_watches(&self, id: i64) -> Result<(), DriverError>;

    /// Full snapshot for startup index population.
    async fn load_all(&self) -> Result<StoreSnapshot, DriverError>;
}
