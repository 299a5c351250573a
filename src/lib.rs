// Library exports for testing and modular access

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod repositories;
pub mod services;
