//! Core engine components.

pub mod adapter;
pub mod conflict;
pub mod coordinator;
pub mod diff;
pub mod engine;
pub mod events;
pub mod executor;
pub mod monitor;
pub mod rollback;
pub mod snapshot_store;
