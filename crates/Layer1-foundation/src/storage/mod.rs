//! Storage module for devhost
//!
//! - `json`: global and project JSON config files

mod json;

pub use json::JsonStore;
