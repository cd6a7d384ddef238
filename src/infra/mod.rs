pub mod auth;
pub mod http_api;
