//! Offline asset cache and network-fallback controller.
//!
//! This module provides:
//! - Versioned cache generations populated atomically from a manifest
//! - Cache-first fetch handling with network fallback and an offline document
//! - Worker lifecycle (install, activate, supersede) with at most one
//!   generation kept after activation
//! - Control messages, push notifications and background sync hooks

pub mod clients;
pub mod controller;
pub mod http;
pub mod messages;
pub mod network;
pub mod push;
pub mod registration;
pub mod storage;
pub mod sync;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use clients::{ClientKind, ClientRegistry};
pub use http::{Method, Request};
pub use network::HttpNetwork;
pub use registration::Registration;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::Network;
