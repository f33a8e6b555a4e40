pub mod cache;
pub mod chain;
pub mod client;
pub mod config;
pub mod models;
pub mod notify;
pub mod prices;
pub mod sync;
pub mod utils;
