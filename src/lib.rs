pub mod bird;
pub mod config;
mod display;
pub mod error;
pub mod fdb;
pub mod kernel;
pub mod reconcile;
mod server;
pub mod supervisor;
#[cfg(test)]
mod testing;
mod utils;
pub mod watcher;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::serve;
