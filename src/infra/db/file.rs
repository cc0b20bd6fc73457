//! Filesystem persistence driver.
//!
//! Records live at `DATA_DIR/{kind}/{id}.json`, one document per
//! record. Writes go through a temporary file in the same directory
//! followed by a rename, so a crash mid-write leaves either the old or
//! the new document, never a torn one. Deletes of missing files
//! succeed, which keeps flush retries idempotent.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::application::driver::{DriverError, PersistenceDriver, StoreSnapshot};
use crate::domain::entities::{AdvRecord, PhotoRecord, UserRecord, WatchesRecord};

const USERS_DIR: &str = "users";
const ADVS_DIR: &str = "advs";
const PHOTOS_DIR: &str = "photos";
const WATCHES_DIR: &str = "watches";

pub struct FileDriver {
    root: PathBuf,
}

impl FileDriver {
    /// Open (creating if needed) the data directory layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DriverError> {
        let root = root.into();
        for dir in [USERS_DIR, ADVS_DIR, PHOTOS_DIR, WATCHES_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        info!(
            target = "vetrina::db",
            root = %root.display(),
            "Opened file driver"
        );
        Ok(Self { root })
    }

    fn record_path(&self, dir: &str, id: i64) -> PathBuf {
        self.root.join(dir).join(format!("{id}.json"))
    }

    fn write_record<T: Serialize>(&self, dir: &str, id: i64, record: &T) -> Result<(), DriverError> {
        let path = self.record_path(dir, id);
        let parent = self.root.join(dir);
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer(&tmp, record)?;
        tmp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }

    fn delete_record(&self, dir: &str, id: i64) -> Result<(), DriverError> {
        match std::fs::remove_file(self.record_path(dir, id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load_dir<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, DriverError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(self.root.join(dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read(&path)?;
            match serde_json::from_slice(&raw) {
                Ok(record) => records.push(record),
                Err(err) => {
                    // A torn or hand-edited document must not take the
                    // whole startup down.
                    warn!(
                        target = "vetrina::db",
                        path = %path.display(),
                        error = %err,
                        "Skipping unreadable record"
                    );
                }
            }
        }
        Ok(records)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl PersistenceDriver for FileDriver {
    async fn create_user(&self, user: &UserRecord) -> Result<(), DriverError> {
        self.write_record(USERS_DIR, user.id, user)
    }

    async fn update_user(
        &self,
        _old: Option<&UserRecord>,
        new: &UserRecord,
    ) -> Result<(), DriverError> {
        self.write_record(USERS_DIR, new.id, new)
    }

    async fn delete_user(&self, id: i64) -> Result<(), DriverError> {
        self.delete_record(USERS_DIR, id)
    }

    async fn create_adv(&self, adv: &AdvRecord) -> Result<(), DriverError> {
        self.write_record(ADVS_DIR, adv.id, adv)
    }

    async fn update_adv(
        &self,
        _old: Option<&AdvRecord>,
        new: &AdvRecord,
    ) -> Result<(), DriverError> {
        self.write_record(ADVS_DIR, new.id, new)
    }

    async fn delete_adv(&self, id: i64) -> Result<(), DriverError> {
        self.delete_record(ADVS_DIR, id)
    }

    async fn create_photo(&self, photo: &PhotoRecord) -> Result<(), DriverError> {
        self.write_record(PHOTOS_DIR, photo.id, photo)
    }

    async fn update_photo(
        &self,
        _old: Option<&PhotoRecord>,
        new: &PhotoRecord,
    ) -> Result<(), DriverError> {
        self.write_record(PHOTOS_DIR, new.id, new)
    }

    async fn delete_photo(&self, id: i64) -> Result<(), DriverError> {
        self.delete_record(PHOTOS_DIR, id)
    }

    async fn create_watches(&self, watches: &WatchesRecord) -> Result<(), DriverError> {
        self.write_record(WATCHES_DIR, watches.id, watches)
    }

    async fn update_watches(
        &self,
        _old: Option<&WatchesRecord>,
        new: &WatchesRecord,
    ) -> Result<(), DriverError> {
        self.write_record(WATCHES_DIR, new.id, new)
    }

    async fn delete_watches(&self, id: i64) -> Result<(), DriverError> {
        self.delete_record(WATCHES_DIR, id)
    }

    async fn load_all(&self) -> Result<StoreSnapshot, DriverError> {
        let snapshot = StoreSnapshot {
            users: self.load_dir(USERS_DIR)?,
            advs: self.load_dir(ADVS_DIR)?,
            photos: self.load_dir(PHOTOS_DIR)?,
            watches: self.load_dir(WATCHES_DIR)?,
        };
        info!(
            target = "vetrina::db",
            users = snapshot.users.len(),
            advs = snapshot.advs.len(),
            photos = snapshot.photos.len(),
            watches = snapshot.watches.len(),
            "Loaded persisted records"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PhotoExt;

    #[tokio::test]
    async fn round_trips_records_through_the_filesystem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FileDriver::open(dir.path()).expect("open");

        let photo = PhotoRecord {
            id: 11,
            adv_id: 5,
            ext: PhotoExt::Png,
        };
        driver.create_photo(&photo).await.expect("create");

        let snapshot = driver.load_all().await.expect("load");
        assert_eq!(snapshot.photos, vec![photo]);
    }

    #[tokio::test]
    async fn update_replaces_the_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FileDriver::open(dir.path()).expect("open");

        let mut watches = WatchesRecord {
            id: 3,
            adv_id: 1,
            count: 0,
        };
        driver.create_watches(&watches).await.expect("create");
        watches.count = 42;
        driver.update_watches(None, &watches).await.expect("update");

        let snapshot = driver.load_all().await.expect("load");
        assert_eq!(snapshot.watches, vec![watches]);
    }

    #[tokio::test]
    async fn delete_of_missing_record_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FileDriver::open(dir.path()).expect("open");
        driver.delete_adv(999).await.expect("idempotent delete");
    }

    #[tokio::test]
    async fn unreadable_documents_are_skipped_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FileDriver::open(dir.path()).expect("open");
        std::fs::write(dir.path().join("advs/7.json"), b"{ torn").expect("write junk");

        let snapshot = driver.load_all().await.expect("load");
        assert!(snapshot.advs.is_empty());
    }
}
