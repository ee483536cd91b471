//! Shared utilities

pub mod error;
pub mod queue;

pub use error::{AppError, AppResult, ErrorResponse};
pub use queue::DropOldestQueue;
