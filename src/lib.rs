//! Vigil - periodic HTTP(S) availability monitoring.
//!
//! Targets are checked on their own intervals; every result is appended to
//! an on-disk history, folded into a per-target up/down state, and state
//! changes or expiring certificates are turned into alerts.

pub mod alerts;
pub mod config;
pub mod db;
pub mod history;
pub mod probe;
pub mod scheduler;
pub mod status;
pub mod target;
pub mod web;
