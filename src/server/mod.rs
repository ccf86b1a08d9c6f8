//! Network entry point.

pub mod listener;

pub use listener::Listener;
