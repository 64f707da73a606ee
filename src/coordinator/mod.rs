//! The worker-facing side: worker registry, long polling, and the
//! HTTP API.

pub mod api;
pub mod key_store;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod settings;

pub use service::{AdminError, Coordinator};
