//! Persistent store

pub mod queries;
pub mod schema;
pub mod sqlite;

pub use sqlite::{format_ts, Database};
