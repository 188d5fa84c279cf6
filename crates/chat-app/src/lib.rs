//! Terminal front end for the parley chat core.

pub mod app;
pub mod cli;
pub mod command;
pub mod render;
pub mod settings;

pub use app::{AppError, ChatApp};
pub use cli::Cli;
