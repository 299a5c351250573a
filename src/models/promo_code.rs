use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_percent: i16,
    pub owner_id: Option<Uuid>, // None while the code sits in the pool
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPromoCode {
    pub code: String,
    pub discount_percent: i16,
    pub owner_id: Option<Uuid>,
}

/// Code and discount pair shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoOffer {
    pub code: String,
    pub discount_percent: i16,
}

impl PromoCode {
    /// A code can be used by `requester` if it is unused and either unowned
    /// or owned by that same user. Guests only see unowned codes.
    pub fn is_redeemable_by(&self, requester: Option<Uuid>) -> bool {
        if self.used {
            return false;
        }
        match self.owner_id {
            None => true,
            Some(owner) => requester == Some(owner),
        }
    }

    pub fn is_in_pool(&self) -> bool {
        self.owner_id.is_none() && !self.used
    }

    pub fn offer(&self) -> PromoOffer {
        PromoOffer {
            code: self.code.clone(),
            discount_percent: self.discount_percent,
        }
    }
}

/// Normalizes user-entered codes: surrounding whitespace is dropped and
/// matching is case-insensitive.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
