pub mod api;
pub mod client;
pub mod config;
pub mod inference;
pub mod logging;
