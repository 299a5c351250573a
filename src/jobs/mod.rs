// Background jobs

pub mod promo_sweep;
pub mod scheduler;
