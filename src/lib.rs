pub mod config;
pub mod error;
pub mod reactive;
pub mod segments;
pub mod solver;
pub mod telemetry;

pub use error::{Error, Result};
