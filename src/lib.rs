pub mod admission;
pub mod app;
pub mod browser;
pub mod capture;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod platform;
pub mod sink;
pub mod worker;

pub use error::{BotError, BotResult};
