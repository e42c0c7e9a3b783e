pub mod api;
pub mod args;
pub mod config;
pub mod device;
pub mod http_helpers;
pub mod link_status;
pub mod log_buffer;
pub mod middleware;
pub mod services;
pub mod templates;
