//! Core services for the starchart image pipeline.
//!
//! This crate owns everything stateful between the upstream listing API
//! and the HTTP surface: configuration, logging and metrics setup, the
//! self-throttled listing client with its placeholder degradation, and
//! the bounded deduplicating image cache.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod upstream;
pub mod utils;
