//! Cache-resident entity wrappers and their flush behaviour.
//!
//! Each wrapper owns a [`Tracked`] cell; advs additionally own their
//! photo sub-list behind a separate lock so photo uploads on one ad do
//! not contend with listings of another.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::driver::{DriverError, PersistenceDriver};
use crate::cache::dirty::{SaveAction, Tracked};
use crate::domain::entities::{AdvRecord, PhotoRecord, UserRecord, WatchesRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Adv,
    Photo,
    Watches,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Adv => "adv",
            EntityKind::Photo => "photo",
            EntityKind::Watches => "watches",
        }
    }
}

/// A dirty-queue member. `save` runs the per-entity protocol under the
/// entity's own writer lock: plan from the flags, call the driver,
/// commit the transition only on success.
#[async_trait]
pub trait Flushable: Send + Sync {
    async fn save(&self, driver: &dyn PersistenceDriver) -> Result<(), DriverError>;
    fn kind(&self) -> EntityKind;
    fn id(&self) -> i64;
}

#[derive(Debug)]
pub struct UserEntry {
    pub record: Tracked<UserRecord>,
    id: i64,
}

impl UserEntry {
    pub fn new_unsaved(user: UserRecord) -> Arc<Self> {
        let id = user.id;
        Arc::new(Self {
            record: Tracked::new_unsaved(user),
            id,
        })
    }

    pub fn loaded(user: UserRecord) -> Arc<Self> {
        let id = user.id;
        Arc::new(Self {
            record: Tracked::loaded(user),
            id,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

#[async_trait]
impl Flushable for UserEntry {
    async fn save(&self, driver: &dyn PersistenceDriver) -> Result<(), DriverError> {
        let mut guard = self.record.lock_for_save().await;
        let action = guard.action();
        match action {
            SaveAction::Nothing => return Ok(()),
            SaveAction::Create => driver.create_user(guard.current()).await?,
            SaveAction::Update => driver.update_user(guard.shadow(), guard.current()).await?,
            SaveAction::Delete => driver.delete_user(self.id).await?,
        }
        guard.commit(action);
        Ok(())
    }

    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug)]
pub struct PhotoEntry {
    pub record: Tracked<PhotoRecord>,
    id: i64,
}

impl PhotoEntry {
    pub fn new_unsaved(photo: PhotoRecord) -> Arc<Self> {
        let id = photo.id;
        Arc::new(Self {
            record: Tracked::new_unsaved(photo),
            id,
        })
    }

    pub fn loaded(photo: PhotoRecord) -> Arc<Self> {
        let id = photo.id;
        Arc::new(Self {
            record: Tracked::loaded(photo),
            id,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

#[async_trait]
impl Flushable for PhotoEntry {
    async fn save(&self, driver: &dyn PersistenceDriver) -> Result<(), DriverError> {
        let mut guard = self.record.lock_for_save().await;
        let action = guard.action();
        match action {
            SaveAction::Nothing => return Ok(()),
            SaveAction::Create => driver.create_photo(guard.current()).await?,
            SaveAction::Update => driver.update_photo(guard.shadow(), guard.current()).await?,
            SaveAction::Delete => driver.delete_photo(self.id).await?,
        }
        guard.commit(action);
        Ok(())
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Photo
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug)]
pub struct WatchesEntry {
    pub record: Tracked<WatchesRecord>,
    id: i64,
}

impl WatchesEntry {
    pub fn new_unsaved(watches: WatchesRecord) -> Arc<Self> {
        let id = watches.id;
        Arc::new(Self {
            record: Tracked::new_unsaved(watches),
            id,
        })
    }

    pub fn loaded(watches: WatchesRecord) -> Arc<Self> {
        let id = watches.id;
        Arc::new(Self {
            record: Tracked::loaded(watches),
            id,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub async fn count(&self) -> u64 {
        self.record.with(|w| w.count).await
    }
}

#[async_trait]
impl Flushable for WatchesEntry {
    async fn save(&self, driver: &dyn PersistenceDriver) -> Result<(), DriverError> {
        let mut guard = self.record.lock_for_save().await;
        let action = guard.action();
        match action {
            SaveAction::Nothing => return Ok(()),
            SaveAction::Create => driver.create_watches(guard.current()).await?,
            SaveAction::Update => driver.update_watches(guard.shadow(), guard.current()).await?,
            SaveAction::Delete => driver.delete_watches(self.id).await?,
        }
        guard.commit(action);
        Ok(())
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Watches
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug)]
pub struct AdvEntry {
    pub record: Tracked<AdvRecord>,
    /// Separate lock: listing a photoless projection of one ad must not
    /// block photo uploads on another.
    photos: RwLock<Vec<Arc<PhotoEntry>>>,
    pub watches: Arc<WatchesEntry>,
    id: i64,
    owner_id: i64,
}

impl AdvEntry {
    pub fn new_unsaved(adv: AdvRecord, watches: Arc<WatchesEntry>) -> Arc<Self> {
        let (id, owner_id) = (adv.id, adv.user_id);
        Arc::new(Self {
            record: Tracked::new_unsaved(adv),
            photos: RwLock::new(Vec::new()),
            watches,
            id,
            owner_id,
        })
    }

    pub fn loaded(
        adv: AdvRecord,
        photos: Vec<Arc<PhotoEntry>>,
        watches: Arc<WatchesEntry>,
    ) -> Arc<Self> {
        let (id, owner_id) = (adv.id, adv.user_id);
        Arc::new(Self {
            record: Tracked::loaded(adv),
            photos: RwLock::new(photos),
            watches,
            id,
            owner_id,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    pub async fn photos(&self) -> Vec<Arc<PhotoEntry>> {
        self.photos.read().await.clone()
    }

    /// Attach a photo under the ad's photo lock. The photo must belong
    /// to this ad.
    pub async fn attach_photo(&self, photo: Arc<PhotoEntry>) {
        debug_assert_eq!(photo.record.with(|p| p.adv_id).await, self.id);
        self.photos.write().await.push(photo);
    }

    pub async fn detach_photo(&self, photo_id: i64) {
        self.photos.write().await.retain(|p| p.id() != photo_id);
    }

    /// Tombstone every attached photo and drain the sub-list; returns
    /// the tombstoned entries so the caller can enqueue them.
    pub async fn take_photos_for_delete(&self) -> Vec<Arc<PhotoEntry>> {
        let mut photos = self.photos.write().await;
        let taken: Vec<Arc<PhotoEntry>> = photos.drain(..).collect();
        for photo in &taken {
            let _ = photo.record.tombstone().await;
        }
        taken
    }
}

#[async_trait]
impl Flushable for AdvEntry {
    async fn save(&self, driver: &dyn PersistenceDriver) -> Result<(), DriverError> {
        let mut guard = self.record.lock_for_save().await;
        let action = guard.action();
        match action {
            SaveAction::Nothing => return Ok(()),
            SaveAction::Create => driver.create_adv(guard.current()).await?,
            SaveAction::Update => driver.update_adv(guard.shadow(), guard.current()).await?,
            SaveAction::Delete => driver.delete_adv(self.id).await?,
        }
        guard.commit(action);
        Ok(())
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Adv
    }

    fn id(&self) -> i64 {
        self.id
    }
}
