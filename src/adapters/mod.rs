//! Session ingestion adapters
//!
//! Alternate ingestion paths that turn third-party landmark exports into
//! the same fixed-schema frame records the live video path produces.

pub mod dream;

pub use dream::{discover_user_sessions, load_dream_sequence};
