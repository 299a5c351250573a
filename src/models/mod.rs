// Models module - Database entity representations

pub mod promo_code;
pub mod user;

pub use promo_code::{NewPromoCode, PromoCode, PromoOffer};
pub use user::User;
