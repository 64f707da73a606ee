#[macro_use]
extern crate tracing;

#[macro_use]
extern crate serde;

pub mod application;
pub mod bridge;
pub mod common;
pub mod coordinator;

#[cfg(test)]
mod tests;
