//! # vdig Common Library
//!
//! Shared code for the vdig service crates:
//! - Common error type
//! - Bootstrap configuration (TOML) and its resolution
//! - Task status vocabulary and the lifecycle state machine table
//! - Task lifecycle events (EventBus)

pub mod config;
pub mod error;
pub mod events;
pub mod status;

pub use error::{Error, Result};
pub use status::TaskStatus;
