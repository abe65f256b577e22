use std::path::Path;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::codec::{is_terminal, ControlCodec, ControlProtocol};
use super::Client;
use crate::error::{Error, Result};

/// A persistent connection to the BIRD control socket
///
/// Every call is strictly request/response: the command is written, then
/// lines are read up to (and including) the first one starting with `0`.
pub struct SocketClient<S = UnixStream> {
    protocol: Option<ControlProtocol<S>>,
}

impl SocketClient<UnixStream> {
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|err| {
            Error::connection_io(format!("failed to connect to {}", path.display()), err)
        })?;
        Self::new(stream).await
    }
}

impl<S> SocketClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream, consuming the greeting BIRD sends on connect
    pub async fn new(stream: S) -> Result<Self> {
        let mut client = Self {
            protocol: Some(Framed::new(stream, ControlCodec::new())),
        };
        let greeting = client.read_reply().await.map_err(|err| match err {
            Error::Connection { context, cause } => Error::Connection {
                context: format!("error while reading greeting: {}", context),
                cause,
            },
            other => other,
        })?;
        debug!(
            "Routing socket ready: {}",
            greeting.last().map(String::as_str).unwrap_or_default()
        );
        Ok(client)
    }

    // A failed read drops the connection
    async fn read_reply(&mut self) -> Result<Vec<String>> {
        let protocol = self
            .protocol
            .as_mut()
            .ok_or_else(|| Error::connection("connection closed"))?;
        let result = read_lines(protocol).await;
        if result.is_err() {
            self.protocol = None;
        }
        result
    }
}

async fn read_lines<S>(protocol: &mut ControlProtocol<S>) -> Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines: Vec<String> = Vec::new();
    loop {
        match protocol.next().await {
            Some(Ok(line)) => {
                trace!("<< {}", line);
                let done = is_terminal(&line);
                lines.push(line);
                if done {
                    return Ok(lines);
                }
            }
            Some(Err(err)) => return Err(Error::connection_io("failed to read reply", err)),
            None => return Err(Error::connection("socket died while reading")),
        }
    }
}

#[async_trait]
impl<S> Client for SocketClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn query(&mut self, command: &str) -> Result<Vec<String>> {
        let protocol = self
            .protocol
            .as_mut()
            .ok_or_else(|| Error::connection("connection closed"))?;
        trace!(">> {}", command.trim_end_matches('\n'));
        if let Err(err) = protocol.send(command.to_string()).await {
            self.protocol = None;
            return Err(Error::connection_io("failed to write command", err));
        }
        self.read_reply().await
    }

    async fn close(&mut self) {
        if let Some(protocol) = self.protocol.take() {
            let mut stream = protocol.into_inner();
            if let Err(err) = stream.shutdown().await {
                debug!("Error closing routing socket: {}", err);
            }
        }
    }
}
