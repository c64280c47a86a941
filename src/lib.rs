//! kg_sync Library
//!
//! Synchronization and rollback engine for a knowledge store split across graph,
//! vector and relational backends. Sync passes commit queued changes behind a
//! rollback point and restore that point when a write cannot be completed.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod utils;

pub use crate::core::engine::Engine;
pub use error::{Error, Result};
