//! Policy-Gated Reverse Proxy Library

pub mod bolt;
pub mod config;
pub mod context;
pub mod http;
pub mod observability;
pub mod plugins;
pub mod routing;
pub mod ws;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
