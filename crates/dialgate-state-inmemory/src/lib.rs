//! In-memory state store implementation for the Dialgate platform
//!
//! This crate provides in-memory implementations of the core repository
//! interfaces defined in the dialgate-core crate. It is the store the
//! server runs on for development and single-node deployments where
//! durable persistence is not required; the session index layout mirrors
//! what a SQL implementation would key on (provider session ID plus a
//! service/phone activity index).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod repositories;
pub use repositories::{
    InMemoryApiConfigRepository, InMemoryFlowRepository, InMemorySessionLogSink,
    InMemorySessionRepository,
};

#[cfg(test)]
mod tests;
