//! Token-authenticated HTTP and WebSocket load balancer.

pub mod config;
pub mod http;
pub mod net;
pub mod health;
pub mod load_balancer;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
