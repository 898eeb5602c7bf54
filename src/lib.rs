pub mod api;
pub mod broker;
pub mod clients;
pub mod config;
pub mod decoder;
pub mod handlers;
pub mod listener;
pub mod models;
pub mod publisher;
pub mod utils;
