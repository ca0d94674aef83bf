#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod http;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
