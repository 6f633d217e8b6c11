//! Core types and shared functionality for graphcache.
//!
//! This crate provides:
//! - The normalized record model and client id generation
//! - Pagination ranges for connection records
//! - A persistent SQLite cache for records and root calls
//! - Unified error types, logging setup and configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod range;
pub mod record;

pub use cache::{CacheDb, CacheManager, CachedData, DiskCache};
pub use config::AppConfig;
pub use error::Error;
pub use record::{DataId, FieldValue, Record, RecordMap, RecordStatus, RootCallKey, RootCallMap};
