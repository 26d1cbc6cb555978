pub mod config;
pub mod http_client;
pub mod input;
pub mod menu;
pub mod runtime;
pub mod services;
pub mod system_adapter;
pub mod types;
