//! Prism core crate - shared error type, configuration and record types.

pub mod config;
pub mod error;
pub mod types;

pub use config::PrismConfig;
pub use error::{PrismError, Result};
pub use types::*;
