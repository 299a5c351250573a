// Services module - Business logic

pub mod code_generator;
pub mod notifier;
pub mod pricing;
pub mod promo_allocator;
