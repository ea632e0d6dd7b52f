//! Database module.
//!
//! Provides SQLite storage for check results and the delivered-alert log.

mod models;
mod store;

pub use models::*;
pub use store::*;
