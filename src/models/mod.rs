//! Data models.

pub mod change;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod operation;
pub mod rollback;
pub mod status;
