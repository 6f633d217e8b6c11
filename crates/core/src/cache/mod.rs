//! SQLite-backed persistence for normalized records.
//!
//! This module provides a persistent record cache using SQLite with async
//! access via tokio-rusqlite. It supports:
//!
//! - Whole-record and per-field writes, deletes stored as NULL
//! - Root call resolutions keyed by a SHA-256 hash
//! - Automatic schema migrations
//! - A write-behind queue so store writes never wait on disk

pub mod connection;
pub mod hash;
pub mod manager;
pub mod migrations;
pub mod records;
pub mod root_calls;

pub use crate::Error;

pub use connection::CacheDb;
pub use manager::{CacheManager, CachedData, DiskCache};
