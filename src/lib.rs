pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;
