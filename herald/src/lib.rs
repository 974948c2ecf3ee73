//! The herald binary's library half: configuration, CLI and sweep wiring.

pub mod cli;
pub mod config;
pub mod run;

pub use config::{Herald, Provider, find_config_file};
