//! The bridge between the coordinator and an application running in
//! another process.
//!
//! Every call opens a new TCP connection, sends one request frame and
//! reads one reply frame. Frames are length delimited JSON objects
//! tagged by their `op` field. The bridge has no timeout of its own
//! and never retries.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{BridgeClient, BridgeError};
pub use server::BridgeServer;
