//! # rb-core
//!
//! Shared error and value types for the Rebinner workspace.

#![warn(missing_docs)]

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Region, Year};
