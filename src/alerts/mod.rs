//! Alert decisions and delivery.
//!
//! The engine decides *whether* and *what* to alert; notifiers only deliver.

pub mod engine;
pub mod notifier;

pub use engine::{AlertEngine, DEFAULT_SSL_WARNING_DAYS};
pub use notifier::{format_message, LogNotifier, MultiNotifier, Notifier, NotifierError, WebhookNotifier};
