//! `miqat-core`: shared types, configuration and errors for the prayer-time
//! scheduler and its sync layer.

pub mod config;
pub mod error;
pub mod types;

pub use error::{MiqatError, Result};
