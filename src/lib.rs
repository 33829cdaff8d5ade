//! Tally - In-process request throttling and ephemeral caching
//!
//! This crate provides two independent, process-local stores for request
//! handling services: a fixed-window rate limiter that fails open, and a TTL
//! key/value cache with running statistics. Neither persists anything or
//! coordinates across processes.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod ratelimit;
pub mod sweep;
