pub mod cli;
pub mod config;
pub mod error;
pub mod generator;
pub mod providers;
pub mod sandbox;
pub mod server;

pub use error::{Result, VoxError};
