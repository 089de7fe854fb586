pub mod actions;
pub mod agent;
pub mod cli;
pub mod config;
pub mod cpi;
pub mod error;
pub mod k8s;

pub use error::{CpiError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
