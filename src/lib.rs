pub mod aria2;
pub mod commands;
pub mod config;
pub mod error;
pub mod rpc_server;
pub mod state;

#[cfg(test)]
mod testutil;

pub use config::Settings;
pub use error::{Error, Result};
pub use state::AppState;
