pub mod bus;
pub mod cache;
pub mod config;
pub mod decision;
pub mod error;
pub mod guideline;
pub mod inspector;
pub mod orchestrator;
pub mod signal;
pub mod tokens;
pub mod types;

pub use error::{PrpError, Result};
