//! Headless host for the transfer engine: settings, sticky-operation
//! persistence and a session that drives the operation registry.

pub mod config;
pub mod persistence;
pub mod session;

pub use config::Settings;
pub use persistence::{load_sticky_operations, save_sticky_operations, STATE_FILENAME};
pub use session::{CompletedOperation, Session};
