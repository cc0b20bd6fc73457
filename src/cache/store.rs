//! The authoritative in-memory store.
//!
//! All reads and writes hit these indices; durability comes from the
//! dirty queue drained by the flush worker. Index maps are guarded by
//! one reader/writer lock each and writers hold them only to splice
//! pointers — record content lives behind each entry's own lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use time::OffsetDateTime;
use tracing::warn;

use crate::application::driver::StoreSnapshot;
use crate::cache::entries::{AdvEntry, PhotoEntry, UserEntry, WatchesEntry};
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::queue::DirtyQueue;
use crate::domain::currency::RateTable;
use crate::domain::entities::{
    AdvPatch, AdvRecord, PASSWORD_HASH_LEN, PhotoRecord, SESSION_SECRET_LEN, UserPatch, UserRecord,
    WatchesRecord,
};
use crate::domain::error::DomainError;
use crate::domain::ids;
use crate::domain::types::PhotoExt;

const SOURCE: &str = "cache::store";

/// Sort key in the price-ordered index: (whole dollar cents, id).
type PriceKey = (i64, i64);

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub email: String,
    pub name: String,
    pub password_hash: [u8; PASSWORD_HASH_LEN],
    pub session_secret: [u8; SESSION_SECRET_LEN],
}

#[derive(Debug, Clone)]
pub struct CreateAdvParams {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub lang_tags: Vec<String>,
    pub country: String,
    pub city: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub user_comment: String,
}

/// Listing query. Geo bounds are strict; dollar bounds are inclusive.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub min_dollar: f64,
    pub max_dollar: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    pub country: String,
    pub address_substring: String,
    pub offset: usize,
    pub limit: usize,
    /// Reverse the price-ordered scan: descending price, descending id
    /// among equal prices.
    pub first_new: bool,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            min_dollar: 0.0,
            max_dollar: f64::INFINITY,
            min_lon: f64::NEG_INFINITY,
            max_lon: f64::INFINITY,
            min_lat: f64::NEG_INFINITY,
            max_lat: f64::INFINITY,
            country: String::new(),
            address_substring: String::new(),
            offset: 0,
            limit: 20,
            first_new: false,
        }
    }
}

/// Render-time projection of an ad with its owner and attachments.
#[derive(Debug, Clone)]
pub struct AdvView {
    pub adv: AdvRecord,
    pub owner_name: String,
    pub photos: Vec<PhotoRecord>,
    pub watches: u64,
}

pub struct ObjectCache {
    users_by_id: RwLock<HashMap<i64, Arc<UserEntry>>>,
    users_by_email: RwLock<HashMap<String, Arc<UserEntry>>>,
    advs_by_id: RwLock<HashMap<i64, Arc<AdvEntry>>>,
    advs_by_owner: RwLock<HashMap<i64, Vec<Arc<AdvEntry>>>>,
    photos_by_id: RwLock<HashMap<i64, Arc<PhotoEntry>>>,
    advs_by_price: RwLock<BTreeMap<PriceKey, Arc<AdvEntry>>>,
    rates: RwLock<RateTable>,
    queue: Arc<DirtyQueue>,
}

impl ObjectCache {
    pub fn new(rates: RateTable, queue: Arc<DirtyQueue>) -> Self {
        Self {
            users_by_id: RwLock::new(HashMap::new()),
            users_by_email: RwLock::new(HashMap::new()),
            advs_by_id: RwLock::new(HashMap::new()),
            advs_by_owner: RwLock::new(HashMap::new()),
            photos_by_id: RwLock::new(HashMap::new()),
            advs_by_price: RwLock::new(BTreeMap::new()),
            rates: RwLock::new(rates),
            queue,
        }
    }

    /// Populate every index from a driver snapshot. Runs during
    /// single-threaded startup, before the listener opens.
    pub async fn from_snapshot(
        snapshot: StoreSnapshot,
        rates: RateTable,
        queue: Arc<DirtyQueue>,
    ) -> Self {
        let cache = Self::new(rates, queue);

        for user in snapshot.users {
            if !ids::is_valid(user.id) {
                warn!(
                    target = "vetrina::cache",
                    id = user.id,
                    "Rejecting user with out-of-range id at load"
                );
                continue;
            }
            let entry = UserEntry::loaded(user.clone());
            rw_write(&cache.users_by_id, SOURCE, "load.users_by_id").insert(user.id, entry.clone());
            rw_write(&cache.users_by_email, SOURCE, "load.users_by_email")
                .insert(user.email.to_lowercase(), entry);
        }

        let mut photos_of: HashMap<i64, Vec<Arc<PhotoEntry>>> = HashMap::new();
        for photo in snapshot.photos {
            if !ids::is_valid(photo.id) {
                warn!(
                    target = "vetrina::cache",
                    id = photo.id,
                    "Rejecting photo with out-of-range id at load"
                );
                continue;
            }
            let entry = PhotoEntry::loaded(photo.clone());
            rw_write(&cache.photos_by_id, SOURCE, "load.photos_by_id")
                .insert(photo.id, entry.clone());
            photos_of.entry(photo.adv_id).or_default().push(entry);
        }

        let mut watches_of: HashMap<i64, Arc<WatchesEntry>> = HashMap::new();
        for watches in snapshot.watches {
            if !ids::is_valid(watches.id) {
                warn!(
                    target = "vetrina::cache",
                    id = watches.id,
                    "Rejecting watch counter with out-of-range id at load"
                );
                continue;
            }
            watches_of.insert(watches.adv_id, WatchesEntry::loaded(watches));
        }

        for mut adv in snapshot.advs {
            if !ids::is_valid(adv.id) {
                warn!(
                    target = "vetrina::cache",
                    id = adv.id,
                    "Rejecting adv with out-of-range id at load"
                );
                continue;
            }
            let table = rw_read(&cache.rates, SOURCE, "load.rates").clone();
            adv.dollar_price = table.dollar_price(adv.price, &adv.currency);
            let photos = photos_of.remove(&adv.id).unwrap_or_default();
            let watches = match watches_of.remove(&adv.id) {
                Some(entry) => entry,
                None => {
                    // A missing counter is recreated and scheduled for
                    // its first flush.
                    let entry = WatchesEntry::new_unsaved(WatchesRecord {
                        id: ids::next_id(),
                        adv_id: adv.id,
                        count: 0,
                    });
                    cache.queue.push(entry.clone());
                    entry
                }
            };
            let key = (adv.dollar_cents(), adv.id);
            let entry = AdvEntry::loaded(adv.clone(), photos, watches);
            rw_write(&cache.advs_by_id, SOURCE, "load.advs_by_id").insert(adv.id, entry.clone());
            rw_write(&cache.advs_by_owner, SOURCE, "load.advs_by_owner")
                .entry(adv.user_id)
                .or_default()
                .push(entry.clone());
            rw_write(&cache.advs_by_price, SOURCE, "load.advs_by_price").insert(key, entry);
        }

        for (adv_id, orphans) in photos_of {
            warn!(
                target = "vetrina::cache",
                adv_id,
                photos = orphans.len(),
                "Dropping photos of unknown adv at load"
            );
        }

        cache
    }

    pub fn queue(&self) -> Arc<DirtyQueue> {
        self.queue.clone()
    }

    pub fn rate_table(&self) -> RateTable {
        rw_read(&self.rates, SOURCE, "rate_table").clone()
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn create_user(
        &self,
        params: CreateUserParams,
    ) -> Result<Arc<UserEntry>, DomainError> {
        let email_key = params.email.to_lowercase();
        let record = UserRecord {
            id: ids::next_id(),
            email: params.email,
            name: params.name,
            password_hash: params.password_hash,
            session_secret: params.session_secret,
            enabled: true,
            is_admin: false,
            balance: 0,
            description: String::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        let entry = {
            let mut by_email = rw_write(&self.users_by_email, SOURCE, "create_user.by_email");
            if by_email.contains_key(&email_key) {
                return Err(DomainError::EmailTaken);
            }
            let entry = UserEntry::new_unsaved(record);
            by_email.insert(email_key, entry.clone());
            rw_write(&self.users_by_id, SOURCE, "create_user.by_id")
                .insert(entry.id(), entry.clone());
            entry
        };
        self.queue.push(entry.clone());
        Ok(entry)
    }

    pub async fn find_user(&self, id: i64) -> Result<Arc<UserEntry>, DomainError> {
        let entry = rw_read(&self.users_by_id, SOURCE, "find_user")
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("user"))?;
        if entry.record.is_live().await {
            Ok(entry)
        } else {
            Err(DomainError::not_found("user"))
        }
    }

    pub async fn find_user_by_login(&self, email: &str) -> Result<Arc<UserEntry>, DomainError> {
        let entry = rw_read(&self.users_by_email, SOURCE, "find_user_by_login")
            .get(&email.to_lowercase())
            .cloned()
            .ok_or(DomainError::not_found("user"))?;
        if entry.record.is_live().await {
            Ok(entry)
        } else {
            Err(DomainError::not_found("user"))
        }
    }

    pub async fn update_user(&self, entry: &Arc<UserEntry>, patch: UserPatch) {
        let hint = entry.record.mutate(|user| patch.apply(user)).await;
        if hint.0 {
            self.queue.push(entry.clone());
        }
    }

    pub async fn update_password(&self, entry: &Arc<UserEntry>, hash: [u8; PASSWORD_HASH_LEN]) {
        let hint = entry.record.mutate(|user| user.password_hash = hash).await;
        if hint.0 {
            self.queue.push(entry.clone());
        }
    }

    /// Replace the session secret; every outstanding token for this
    /// user stops verifying the moment the write completes.
    pub async fn rotate_session_secret(
        &self,
        entry: &Arc<UserEntry>,
        secret: [u8; SESSION_SECRET_LEN],
    ) {
        let hint = entry.record.mutate(|user| user.session_secret = secret).await;
        if hint.0 {
            self.queue.push(entry.clone());
        }
    }

    // ------------------------------------------------------------------
    // Advs
    // ------------------------------------------------------------------

    pub async fn create_adv(&self, owner_id: i64, params: CreateAdvParams) -> Arc<AdvEntry> {
        let now = OffsetDateTime::now_utc();
        let table = self.rate_table();
        let mut adv = AdvRecord {
            id: ids::next_id(),
            user_id: owner_id,
            created_at: now,
            updated_at: now,
            approved: false,
            lang_tags: params.lang_tags,
            title: params.title,
            description: params.description,
            price: params.price,
            currency: params.currency,
            dollar_price: 0.0,
            country: params.country,
            city: params.city,
            address: params.address,
            latitude: params.latitude,
            longitude: params.longitude,
            visible: true,
            user_comment: params.user_comment,
            admin_comment: String::new(),
        };
        adv.dollar_price = table.dollar_price(adv.price, &adv.currency);
        let key = (adv.dollar_cents(), adv.id);

        let watches = WatchesEntry::new_unsaved(WatchesRecord {
            id: ids::next_id(),
            adv_id: adv.id,
            count: 0,
        });
        let entry = AdvEntry::new_unsaved(adv, watches.clone());

        rw_write(&self.advs_by_id, SOURCE, "create_adv.by_id").insert(entry.id(), entry.clone());
        rw_write(&self.advs_by_owner, SOURCE, "create_adv.by_owner")
            .entry(owner_id)
            .or_default()
            .push(entry.clone());
        rw_write(&self.advs_by_price, SOURCE, "create_adv.by_price").insert(key, entry.clone());

        self.queue.push(entry.clone());
        self.queue.push(watches);
        entry
    }

    pub async fn find_adv(&self, id: i64) -> Result<Arc<AdvEntry>, DomainError> {
        let entry = rw_read(&self.advs_by_id, SOURCE, "find_adv")
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("adv"))?;
        if entry.record.is_live().await {
            Ok(entry)
        } else {
            Err(DomainError::not_found("adv"))
        }
    }

    pub async fn update_adv(&self, entry: &Arc<AdvEntry>, patch: AdvPatch) {
        let old_key = entry
            .record
            .with(|adv| (adv.dollar_cents(), adv.id))
            .await;
        let table = self.rate_table();
        let hint = entry
            .record
            .mutate(|adv| {
                patch.apply(adv);
                adv.dollar_price = table.dollar_price(adv.price, &adv.currency);
            })
            .await;
        let new_key = entry
            .record
            .with(|adv| (adv.dollar_cents(), adv.id))
            .await;
        if new_key != old_key {
            let mut by_price = rw_write(&self.advs_by_price, SOURCE, "update_adv.by_price");
            let mut indexed = by_price.remove(&old_key).is_some();
            if !indexed {
                // A concurrent reposition moved this ad between the key
                // read and the splice. The id is part of the key, so a
                // scan finds whatever slot it sits in now; no slot at
                // all means a concurrent delete already unindexed it.
                let stale: Vec<PriceKey> = by_price
                    .keys()
                    .filter(|key| key.1 == entry.id())
                    .copied()
                    .collect();
                for key in stale {
                    by_price.remove(&key);
                    indexed = true;
                }
            }
            if indexed {
                by_price.insert(new_key, entry.clone());
            }
        }
        if hint.0 {
            self.queue.push(entry.clone());
        }
    }

    /// Set the approved flag (admin moderation decision).
    pub async fn approve_adv(&self, entry: &Arc<AdvEntry>, approved: bool) {
        let hint = entry.record.mutate(|adv| adv.approved = approved).await;
        if hint.0 {
            self.queue.push(entry.clone());
        }
    }

    /// Tombstone the ad, its watch counter, and every live photo, and
    /// splice the ad out of the lookup indices. The id index keeps the
    /// tombstone so the id cannot be observed as reused within a
    /// request.
    pub async fn delete_adv(&self, entry: &Arc<AdvEntry>) -> Vec<Arc<PhotoEntry>> {
        let key = entry
            .record
            .with(|adv| (adv.dollar_cents(), adv.id))
            .await;

        let adv_hint = entry.record.tombstone().await;
        let watches_hint = entry.watches.record.tombstone().await;
        let photos = entry.take_photos_for_delete().await;

        rw_write(&self.advs_by_price, SOURCE, "delete_adv.by_price").remove(&key);
        if let Some(owned) =
            rw_write(&self.advs_by_owner, SOURCE, "delete_adv.by_owner").get_mut(&entry.owner_id())
        {
            owned.retain(|a| a.id() != entry.id());
        }

        if adv_hint.0 {
            self.queue.push(entry.clone());
        }
        if watches_hint.0 {
            self.queue.push(entry.watches.clone());
        }
        for photo in &photos {
            // take_photos_for_delete already tombstoned them; enqueue
            // unconditionally, duplicates collapse at save time.
            self.queue.push(photo.clone());
        }
        photos
    }

    pub async fn owner_advs(&self, owner_id: i64) -> Vec<Arc<AdvEntry>> {
        rw_read(&self.advs_by_owner, SOURCE, "owner_advs")
            .get(&owner_id)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Photos
    // ------------------------------------------------------------------

    pub async fn add_photo(
        &self,
        adv: &Arc<AdvEntry>,
        ext: PhotoExt,
    ) -> Result<Arc<PhotoEntry>, DomainError> {
        if !adv.record.is_live().await {
            return Err(DomainError::not_found("adv"));
        }
        let record = PhotoRecord {
            id: ids::next_id(),
            adv_id: adv.id(),
            ext,
        };
        let entry = {
            let mut by_id = rw_write(&self.photos_by_id, SOURCE, "add_photo.by_id");
            if by_id.contains_key(&record.id) {
                return Err(DomainError::DuplicateId { entity: "photo" });
            }
            let entry = PhotoEntry::new_unsaved(record);
            by_id.insert(entry.id(), entry.clone());
            entry
        };
        adv.attach_photo(entry.clone()).await;
        self.queue.push(entry.clone());
        Ok(entry)
    }

    pub async fn find_photo(&self, id: i64) -> Result<Arc<PhotoEntry>, DomainError> {
        let entry = rw_read(&self.photos_by_id, SOURCE, "find_photo")
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("photo"))?;
        if entry.record.is_live().await {
            Ok(entry)
        } else {
            Err(DomainError::not_found("photo"))
        }
    }

    pub async fn delete_photo(&self, adv: &Arc<AdvEntry>, photo: &Arc<PhotoEntry>) {
        let hint = photo.record.tombstone().await;
        adv.detach_photo(photo.id()).await;
        if hint.0 {
            self.queue.push(photo.clone());
        }
    }

    // ------------------------------------------------------------------
    // Watches
    // ------------------------------------------------------------------

    pub async fn inc_watches(&self, adv: &Arc<AdvEntry>) -> u64 {
        let hint = adv.watches.record.mutate(|w| w.count += 1).await;
        if hint.0 {
            self.queue.push(adv.watches.clone());
        }
        metrics::counter!("vetrina_adv_watch_total").increment(1);
        adv.watches.count().await
    }

    // ------------------------------------------------------------------
    // Rates
    // ------------------------------------------------------------------

    /// Swap the rate table and recompute every ad's derived dollar
    /// price, then re-key the price-ordered index.
    pub async fn refresh_rates(&self, table: RateTable) {
        *rw_write(&self.rates, SOURCE, "refresh_rates.set") = table.clone();

        let advs: Vec<Arc<AdvEntry>> = rw_read(&self.advs_by_id, SOURCE, "refresh_rates.scan")
            .values()
            .cloned()
            .collect();

        let mut scanned = HashSet::with_capacity(advs.len());
        let mut keyed = Vec::with_capacity(advs.len());
        for entry in advs {
            scanned.insert(entry.id());
            if !entry.record.is_live().await {
                continue;
            }
            entry
                .record
                .mutate_derived(|adv| {
                    adv.dollar_price = table.dollar_price(adv.price, &adv.currency);
                })
                .await;
            let key = entry
                .record
                .with(|adv| (adv.dollar_cents(), adv.id))
                .await;
            keyed.push((key, entry));
        }

        self.rekey_price_index(&scanned, keyed);
    }

    /// Replace the slots of the scanned ads with their new keys. Ads
    /// that entered the index after the scan keep their slot untouched;
    /// scanned tombstones carry no new key and drop out.
    fn rekey_price_index(&self, scanned: &HashSet<i64>, keyed: Vec<(PriceKey, Arc<AdvEntry>)>) {
        let mut by_price = rw_write(&self.advs_by_price, SOURCE, "refresh_rates.rekey");
        let mut rebuilt: BTreeMap<PriceKey, Arc<AdvEntry>> = by_price
            .iter()
            .filter(|(key, _)| !scanned.contains(&key.1))
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();
        rebuilt.extend(keyed);
        *by_price = rebuilt;
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Scan the price-ordered sequence (reversed when `first_new`),
    /// skip `offset` matches, emit up to `limit`, and keep counting to
    /// the end so the caller gets the total match count.
    pub async fn find_adv_list(&self, filter: &ListFilter) -> (Vec<Arc<AdvEntry>>, usize) {
        let ordered: Vec<Arc<AdvEntry>> = {
            let by_price = rw_read(&self.advs_by_price, SOURCE, "find_adv_list");
            if filter.first_new {
                by_price.values().rev().cloned().collect()
            } else {
                by_price.values().cloned().collect()
            }
        };

        let mut page = Vec::new();
        let mut matched = 0usize;
        for entry in ordered {
            let retained = entry
                .record
                .with(|adv| Self::retain(adv, filter))
                .await
                && entry.record.is_live().await;
            if !retained {
                continue;
            }
            matched += 1;
            if matched <= filter.offset {
                continue;
            }
            if page.len() < filter.limit {
                page.push(entry);
            }
        }
        (page, matched)
    }

    fn retain(adv: &AdvRecord, filter: &ListFilter) -> bool {
        if !adv.approved || !adv.visible {
            return false;
        }
        if adv.dollar_price < filter.min_dollar || adv.dollar_price > filter.max_dollar {
            return false;
        }
        if !(filter.min_lon < adv.longitude && adv.longitude < filter.max_lon) {
            return false;
        }
        if !(filter.min_lat < adv.latitude && adv.latitude < filter.max_lat) {
            return false;
        }
        if !filter.country.is_empty() && adv.country != filter.country {
            return false;
        }
        if !filter.address_substring.is_empty() && !adv.address.contains(&filter.address_substring)
        {
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    /// Resolve the owner pointer and attachments by index lookup (the
    /// entry stores ids, never direct ownership pointers).
    pub async fn project_adv(&self, entry: &Arc<AdvEntry>) -> AdvView {
        let adv = entry.record.snapshot().await;
        let owner_name = match self.find_user(adv.user_id).await {
            Ok(owner) => owner.record.with(|u| u.name.clone()).await,
            Err(_) => String::new(),
        };
        let mut photos = Vec::new();
        for photo in entry.photos().await {
            if photo.record.is_live().await {
                photos.push(photo.record.snapshot().await);
            }
        }
        let watches = entry.watches.count().await;
        AdvView {
            adv,
            owner_name,
            photos,
            watches,
        }
    }
}
