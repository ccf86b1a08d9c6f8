//! keyrelay - credential-pooling reverse proxy
//!
//! Core library for the HTTP server and the forwarding pipeline.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
