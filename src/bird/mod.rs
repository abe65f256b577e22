//! BIRD control socket client
//!
//! The control protocol is line oriented: a command is a single line and
//! the reply is every line up to one whose first character is `0`.

use std::path::PathBuf;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use crate::error::Result;

mod client;
mod codec;
mod parse;

pub use client::SocketClient;
pub use codec::{is_terminal, ControlCodec, ControlProtocol};
pub use parse::parse_siblings;

/// Request/response access to the routing process
#[async_trait]
pub trait Client: Send {
    /// Send `command` and collect the reply, terminal line included
    async fn query(&mut self, command: &str) -> Result<Vec<String>>;

    /// Release the connection; later queries fail
    async fn close(&mut self);
}

/// Produces one fresh [`Client`] per watcher
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Client>>;
}

#[derive(Debug, Clone)]
pub struct SocketConnector {
    path: PathBuf,
}

impl SocketConnector {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn connect(&self) -> Result<Box<dyn Client>> {
        let client = SocketClient::connect(&self.path).await?;
        Ok(Box::new(client))
    }
}

/// Lists the BGP learned routes for `subnet`
pub fn route_command(subnet: &IpNetwork) -> String {
    format!("show route {} where source = RTS_BGP", subnet)
}
