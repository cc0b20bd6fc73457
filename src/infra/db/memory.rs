//! In-memory persistence driver.
//!
//! Selected with `DATA_DIR=:memory:`. Keeps every table in a map and
//! records each mutating call so tests can assert on the exact driver
//! traffic; a fail switch makes the next calls error for retry tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::application::driver::{DriverError, PersistenceDriver, StoreSnapshot};
use crate::cache::entries::EntityKind;
use crate::cache::lock::mutex_lock;
use crate::domain::entities::{AdvRecord, PhotoRecord, UserRecord, WatchesRecord};

const SOURCE: &str = "infra::db::memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOp {
    pub kind: EntityKind,
    pub op: OpKind,
    pub id: i64,
}

#[derive(Default)]
pub struct MemoryDriver {
    users: Mutex<HashMap<i64, UserRecord>>,
    advs: Mutex<HashMap<i64, AdvRecord>>,
    photos: Mutex<HashMap<i64, PhotoRecord>>,
    watches: Mutex<HashMap<i64, WatchesRecord>>,
    ops: Mutex<Vec<DriverOp>>,
    fail: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until cleared.
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Mutating calls observed so far, in order.
    pub fn ops(&self) -> Vec<DriverOp> {
        mutex_lock(&self.ops, SOURCE, "ops").clone()
    }

    pub fn user(&self, id: i64) -> Option<UserRecord> {
        mutex_lock(&self.users, SOURCE, "user").get(&id).cloned()
    }

    pub fn adv(&self, id: i64) -> Option<AdvRecord> {
        mutex_lock(&self.advs, SOURCE, "adv").get(&id).cloned()
    }

    pub fn photo(&self, id: i64) -> Option<PhotoRecord> {
        mutex_lock(&self.photos, SOURCE, "photo").get(&id).cloned()
    }

    pub fn watches(&self, id: i64) -> Option<WatchesRecord> {
        mutex_lock(&self.watches, SOURCE, "watches").get(&id).cloned()
    }

    /// Seed a record directly, bypassing the op log (startup fixtures).
    pub fn seed_user(&self, user: UserRecord) {
        mutex_lock(&self.users, SOURCE, "seed_user").insert(user.id, user);
    }

    pub fn seed_adv(&self, adv: AdvRecord) {
        mutex_lock(&self.advs, SOURCE, "seed_adv").insert(adv.id, adv);
    }

    fn check(&self, kind: EntityKind, op: OpKind, id: i64) -> Result<(), DriverError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(DriverError::unavailable("memory driver failure injected"));
        }
        mutex_lock(&self.ops, SOURCE, "record").push(DriverOp { kind, op, id });
        Ok(())
    }
}

#[async_trait]
impl PersistenceDriver for MemoryDriver {
    async fn create_user(&self, user: &UserRecord) -> Result<(), DriverError> {
        self.check(EntityKind::User, OpKind::Create, user.id)?;
        mutex_lock(&self.users, SOURCE, "create_user").insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(
        &self,
        _old: Option<&UserRecord>,
        new: &UserRecord,
    ) -> Result<(), DriverError> {
        self.check(EntityKind::User, OpKind::Update, new.id)?;
        mutex_lock(&self.users, SOURCE, "update_user").insert(new.id, new.clone());
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<(), DriverError> {
        self.check(EntityKind::User, OpKind::Delete, id)?;
        mutex_lock(&self.users, SOURCE, "delete_user").remove(&id);
        Ok(())
    }

    async fn create_adv(&self, adv: &AdvRecord) -> Result<(), DriverError> {
        self.check(EntityKind::Adv, OpKind::Create, adv.id)?;
        mutex_lock(&self.advs, SOURCE, "create_adv").insert(adv.id, adv.clone());
        Ok(())
    }

    async fn update_adv(
        &self,
        _old: Option<&AdvRecord>,
        new: &AdvRecord,
    ) -> Result<(), DriverError> {
        self.check(EntityKind::Adv, OpKind::Update, new.id)?;
        mutex_lock(&self.advs, SOURCE, "update_adv").insert(new.id, new.clone());
        Ok(())
    }

    async fn delete_adv(&self, id: i64) -> Result<(), DriverError> {
        self.check(EntityKind::Adv, OpKind::Delete, id)?;
        mutex_lock(&self.advs, SOURCE, "delete_adv").remove(&id);
        Ok(())
    }

    async fn create_photo(&self, photo: &PhotoRecord) -> Result<(), DriverError> {
        self.check(EntityKind::Photo, OpKind::Create, photo.id)?;
        mutex_lock(&self.photos, SOURCE, "create_photo").insert(photo.id, photo.clone());
        Ok(())
    }

    async fn update_photo(
        &self,
        _old: Option<&PhotoRecord>,
        new: &PhotoRecord,
    ) -> Result<(), DriverError> {
        self.check(EntityKind::Photo, OpKind::Update, new.id)?;
        mutex_lock(&self.photos, SOURCE, "update_photo").insert(new.id, new.clone());
        Ok(())
    }

    async fn delete_photo(&self, id: i64) -> Result<(), DriverError> {
        self.check(EntityKind::Photo, OpKind::Delete, id)?;
        mutex_lock(&self.photos, SOURCE, "delete_photo").remove(&id);
        Ok(())
    }

    async fn create_watches(&self, watches: &WatchesRecord) -> Result<(), DriverError> {
        self.check(EntityKind::Watches, OpKind::Create, watches.id)?;
        mutex_lock(&self.watches, SOURCE, "create_watches").insert(watches.id, watches.clone());
        Ok(())
    }

    async fn update_watches(
        &self,
        _old: Option<&WatchesRecord>,
        new: &WatchesRecord,
    ) -> Result<(), DriverError> {
        self.check(EntityKind::Watches, OpKind::Update, new.id)?;
        mutex_lock(&self.watches, SOURCE, "update_watches").insert(new.id, new.clone());
        Ok(())
    }

    async fn delete_watches(&self, id: i64) -> Result<(), DriverError> {
        self.check(EntityKind::Watches, OpKind::Delete, id)?;
        mutex_lock(&self.watches, SOURCE, "delete_watches").remove(&id);
        Ok(())
    }

    async fn load_all(&self) -> Result<StoreSnapshot, DriverError> {
        Ok(StoreSnapshot {
            users: mutex_lock(&self.users, SOURCE, "load_all").values().cloned().collect(),
            advs: mutex_lock(&self.advs, SOURCE, "load_all").values().cloned().collect(),
            photos: mutex_lock(&self.photos, SOURCE, "load_all").values().cloned().collect(),
            watches: mutex_lock(&self.watches, SOURCE, "load_all").values().cloned().collect(),
        })
    }
}
