//! Reverse proxy functionality
//!
//! The forwarding pipeline: path rewriting, credential selection, upstream
//! dispatch and response relay, tied together by [`ProxyHandler`].

pub mod auth;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod relay;
pub mod rewrite;
pub mod upstream;

pub use auth::AuthGuard;
pub use credentials::{CredentialPool, RandomSource, ThreadRandom};
pub use error::ForwardError;
pub use handler::ProxyHandler;
pub use rewrite::{PathRewriter, RewriteRule};
pub use upstream::{ForwardRequest, ForwardResponse, Forwarder, TransferMode};
