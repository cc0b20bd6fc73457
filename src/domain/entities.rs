//! Entity snapshots mirrored to persistent storage, plus the patch
//! shapes write operations apply to them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::PhotoExt;

pub const PASSWORD_HASH_LEN: usize = 20;
pub const SESSION_SECRET_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub password_hash: [u8; PASSWORD_HASH_LEN],
    pub session_secret: [u8; SESSION_SECRET_LEN],
    pub enabled: bool,
    pub is_admin: bool,
    pub balance: i64,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UserPatch {
    pub fn apply(&self, user: &mut UserRecord) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(description) = &self.description {
            user.description = description.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvRecord {
    pub id: i64,
    pub user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub approved: bool,
    pub lang_tags: Vec<String>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    /// Derived from `(price, currency)` and the current rate table.
    /// Never persisted.
    #[serde(skip)]
    pub dollar_price: f64,
    pub country: String,
    pub city: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub visible: bool,
    pub user_comment: String,
    pub admin_comment: String,
}

impl AdvRecord {
    /// Sort key for the price-ordered index: whole dollar cents, so
    /// ordering is total (no NaN) and stable across recomputation.
    pub fn dollar_cents(&self) -> i64 {
        if self.dollar_price.is_finite() {
            (self.dollar_price * 100.0).round() as i64
        } else {
            i64::MAX
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdvPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub lang_tags: Option<Vec<String>>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub visible: Option<bool>,
    pub user_comment: Option<String>,
}

impl AdvPatch {
    pub fn apply(&self, adv: &mut AdvRecord) {
        if let Some(v) = &self.title {
            adv.title = v.clone();
        }
        if let Some(v) = &self.description {
            adv.description = v.clone();
        }
        if let Some(v) = self.price {
            adv.price = v;
        }
        if let Some(v) = &self.currency {
            adv.currency = v.clone();
        }
        if let Some(v) = &self.lang_tags {
            adv.lang_tags = v.clone();
        }
        if let Some(v) = &self.country {
            adv.country = v.clone();
        }
        if let Some(v) = &self.city {
            adv.city = v.clone();
        }
        if let Some(v) = &self.address {
            adv.address = v.clone();
        }
        if let Some(v) = self.latitude {
            adv.latitude = v;
        }
        if let Some(v) = self.longitude {
            adv.longitude = v;
        }
        if let Some(v) = self.visible {
            adv.visible = v;
        }
        if let Some(v) = &self.user_comment {
            adv.user_comment = v.clone();
        }
        adv.updated_at = OffsetDateTime::now_utc();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub adv_id: i64,
    pub ext: PhotoExt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchesRecord {
    pub id: i64,
    pub adv_id: i64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_adv() -> AdvRecord {
        AdvRecord {
            id: 1,
            user_id: 2,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
            approved: false,
            lang_tags: vec!["en".to_string()],
            title: "T".to_string(),
            description: "D".to_string(),
            price: 100.0,
            currency: "USD".to_string(),
            dollar_price: 100.0,
            country: "US".to_string(),
            city: "NY".to_string(),
            address: "5 Ave".to_string(),
            latitude: 40.7,
            longitude: -74.0,
            visible: true,
            user_comment: String::new(),
            admin_comment: String::new(),
        }
    }

    #[test]
    fn adv_patch_merges_only_present_fields() {
        let mut adv = sample_adv();
        let patch = AdvPatch {
            title: Some("New".to_string()),
            price: Some(250.0),
            ..Default::default()
        };
        patch.apply(&mut adv);
        assert_eq!(adv.title, "New");
        assert_eq!(adv.price, 250.0);
        assert_eq!(adv.description, "D");
        assert_eq!(adv.currency, "USD");
    }

    #[test]
    fn dollar_cents_is_total_order_key() {
        let mut adv = sample_adv();
        adv.dollar_price = 19.994;
        assert_eq!(adv.dollar_cents(), 1999);
        adv.dollar_price = f64::NAN;
        assert_eq!(adv.dollar_cents(), i64::MAX);
    }

    #[test]
    fn snapshot_serde_skips_dollar_price() {
        let adv = sample_adv();
        let json = serde_json::to_string(&adv).expect("serialize");
        assert!(!json.contains("dollar_price"));
        let back: AdvRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.dollar_price, 0.0);
        assert_eq!(back.price, 100.0);
    }
}
