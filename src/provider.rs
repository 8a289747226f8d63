//! Generation provider: endpoint configuration and the HTTP backend.

pub mod config;
pub mod http;

pub use config::{ProviderConfig, API_KEY_ENV};
pub use http::HttpBackend;
