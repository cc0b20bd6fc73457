//! Advertisement lifecycle: creation, moderation gate, photos, views,
//! and the public catalog.

use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::cache::entries::{AdvEntry, UserEntry};
use crate::cache::store::{AdvView, CreateAdvParams, ListFilter, ObjectCache};
use crate::domain::entities::AdvPatch;
use crate::domain::error::DomainError;
use crate::domain::moderation;
use crate::domain::types::PhotoExt;
use crate::infra::uploads::PhotoStore;

/// Hard cap on a listing page, regardless of the requested limit.
pub const LIST_LIMIT_CAP: usize = 20;

pub struct ListingService {
    cache: Arc<ObjectCache>,
    photos: Arc<PhotoStore>,
}

impl ListingService {
    pub fn new(cache: Arc<ObjectCache>, photos: Arc<PhotoStore>) -> Self {
        Self { cache, photos }
    }

    pub async fn create_adv(
        &self,
        owner: &Arc<UserEntry>,
        params: CreateAdvParams,
    ) -> Result<Arc<AdvEntry>, AppError> {
        Self::validate(&params)?;
        moderation::check(&[&params.title, &params.description, &params.user_comment])?;
        let adv = self.cache.create_adv(owner.id(), params).await;
        info!(
            target = "vetrina::listings",
            adv_id = adv.id(),
            user_id = owner.id(),
            "Created adv"
        );
        Ok(adv)
    }

    pub async fn update_adv(
        &self,
        actor: &Arc<UserEntry>,
        adv_id: i64,
        patch: AdvPatch,
    ) -> Result<(), AppError> {
        let adv = self.owned_adv(actor, adv_id).await?;
        let mut texts: Vec<&str> = Vec::new();
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title must not be empty").into());
            }
            texts.push(title);
        }
        if let Some(description) = &patch.description {
            texts.push(description);
        }
        if let Some(comment) = &patch.user_comment {
            texts.push(comment);
        }
        if let Some(price) = patch.price
            && !(price.is_finite() && price >= 0.0)
        {
            return Err(DomainError::validation("price must be a non-negative number").into());
        }
        if let Some(lat) = patch.latitude
            && !(-90.0..=90.0).contains(&lat)
        {
            return Err(DomainError::validation("latitude out of range").into());
        }
        if let Some(lon) = patch.longitude
            && !(-180.0..=180.0).contains(&lon)
        {
            return Err(DomainError::validation("longitude out of range").into());
        }
        moderation::check(&texts)?;
        self.cache.update_adv(&adv, patch).await;
        Ok(())
    }

    /// Moderation decision; the caller must already have verified admin
    /// rights.
    pub async fn approve_adv(&self, adv_id: i64, approved: bool) -> Result<(), AppError> {
        let adv = self.cache.find_adv(adv_id).await?;
        self.cache.approve_adv(&adv, approved).await;
        info!(
            target = "vetrina::listings",
            adv_id,
            approved,
            "Moderated adv"
        );
        Ok(())
    }

    /// Delete the ad and its attachments, including photo payloads on
    /// disk.
    pub async fn delete_adv(&self, actor: &Arc<UserEntry>, adv_id: i64) -> Result<(), AppError> {
        let adv = self.owned_adv(actor, adv_id).await?;
        let photos = self.cache.delete_adv(&adv).await;
        for photo in photos {
            let ext = photo.record.with(|p| p.ext).await;
            self.photos.remove(photo.id(), ext);
        }
        info!(
            target = "vetrina::listings",
            adv_id,
            user_id = actor.id(),
            "Deleted adv"
        );
        Ok(())
    }

    /// Public single-ad view. Unapproved ads are visible only to their
    /// owner and admins; any other viewer gets a moderation-pending
    /// error. Successful public views bump the watch counter.
    pub async fn view_adv(
        &self,
        viewer: Option<&Arc<UserEntry>>,
        adv_id: i64,
    ) -> Result<AdvView, AppError> {
        let adv = self.cache.find_adv(adv_id).await?;
        let (approved, visible) = adv.record.with(|a| (a.approved, a.visible)).await;
        let privileged = match viewer {
            Some(user) => {
                user.id() == adv.owner_id() || user.record.with(|u| u.is_admin).await
            }
            None => false,
        };
        if (!approved || !visible) && !privileged {
            if !approved {
                return Err(AppError::Unapproved);
            }
            return Err(DomainError::not_found("adv").into());
        }
        if !privileged {
            self.cache.inc_watches(&adv).await;
        }
        Ok(self.cache.project_adv(&adv).await)
    }

    pub async fn list(&self, mut filter: ListFilter) -> (Vec<AdvView>, usize) {
        filter.limit = filter.limit.min(LIST_LIMIT_CAP);
        let (page, total) = self.cache.find_adv_list(&filter).await;
        let mut views = Vec::with_capacity(page.len());
        for entry in &page {
            views.push(self.cache.project_adv(entry).await);
        }
        (views, total)
    }

    pub async fn own_advs(&self, owner: &Arc<UserEntry>) -> Vec<AdvView> {
        let entries = self.cache.owner_advs(owner.id()).await;
        let mut views = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.record.is_live().await {
                views.push(self.cache.project_adv(entry).await);
            }
        }
        views
    }

    pub async fn add_photo(
        &self,
        actor: &Arc<UserEntry>,
        adv_id: i64,
        ext: &str,
        bytes: &[u8],
    ) -> Result<i64, AppError> {
        let adv = self.owned_adv(actor, adv_id).await?;
        let ext = PhotoExt::parse(ext)
            .ok_or_else(|| DomainError::validation("unsupported photo extension"))?;
        if bytes.is_empty() {
            return Err(DomainError::validation("photo payload is empty").into());
        }
        let photo = self.cache.add_photo(&adv, ext).await?;
        self.photos.save(photo.id(), ext, bytes)?;
        Ok(photo.id())
    }

    pub async fn delete_photo(
        &self,
        actor: &Arc<UserEntry>,
        adv_id: i64,
        photo_id: i64,
    ) -> Result<(), AppError> {
        let adv = self.owned_adv(actor, adv_id).await?;
        let photo = self.cache.find_photo(photo_id).await?;
        if photo.record.with(|p| p.adv_id).await != adv.id() {
            return Err(DomainError::not_found("photo").into());
        }
        let ext = photo.record.with(|p| p.ext).await;
        self.cache.delete_photo(&adv, &photo).await;
        self.photos.remove(photo.id(), ext);
        Ok(())
    }

    /// Resolve an ad and enforce the ownership rule: the owner or an
    /// admin may act, everyone else is refused.
    async fn owned_adv(
        &self,
        actor: &Arc<UserEntry>,
        adv_id: i64,
    ) -> Result<Arc<AdvEntry>, AppError> {
        let adv = self.cache.find_adv(adv_id).await?;
        if adv.owner_id() != actor.id() && !actor.record.with(|u| u.is_admin).await {
            return Err(AppError::Forbidden);
        }
        Ok(adv)
    }

    fn validate(params: &CreateAdvParams) -> Result<(), AppError> {
        if params.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty").into());
        }
        if !(params.price.is_finite() && params.price >= 0.0) {
            return Err(DomainError::validation("price must be a non-negative number").into());
        }
        if params.currency.trim().is_empty() {
            return Err(DomainError::validation("currency must not be empty").into());
        }
        if !(-90.0..=90.0).contains(&params.latitude) {
            return Err(DomainError::validation("latitude out of range").into());
        }
        if !(-180.0..=180.0).contains(&params.longitude) {
            return Err(DomainError::validation("longitude out of range").into());
        }
        Ok(())
    }
}
