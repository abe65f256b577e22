mod file;

pub use file::{ApplyMode, DiscoveryMode};

use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use ipnetwork::IpNetwork;

use crate::error::{Error, Result};
use crate::kernel::HardwareAddr;

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub bird_socket: Option<PathBuf>,
    pub poll_interval: Option<u64>,
}

/// Parse a TOML config file (or use the defaults) and return a ServerConfig
pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<ServerConfig> {
    let mut spec = match path {
        Some(path) => file::ServerConfigSpec::from_file(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?,
        None => file::ServerConfigSpec::default(),
    };
    if let Some(bird_socket) = overrides.bird_socket {
        spec.bird_socket = bird_socket;
    }
    if let Some(poll_interval) = overrides.poll_interval {
        spec.poll_interval = poll_interval;
    }
    ServerConfig::from_spec(spec)
}

/// Validated in-memory settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bird_socket: PathBuf,
    pub poll_interval: Duration,
    pub query_timeout: Duration,
    pub container_cidr: IpNetwork,
    pub interface_pattern: Pattern,
    pub sibling_table: u32,
    pub sentinel: HardwareAddr,
    pub discovery: DiscoveryMode,
    pub apply: ApplyMode,
    pub route_events: bool,
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self> {
        if spec.poll_interval == 0 {
            return Err(Error::Config("poll_interval must be at least 1 second".into()));
        }
        if spec.query_timeout == 0 {
            return Err(Error::Config("query_timeout must be at least 1 second".into()));
        }
        let cidr: IpNetwork = spec.container_cidr.parse().map_err(|err| {
            Error::Config(format!("container_cidr '{}': {}", spec.container_cidr, err))
        })?;
        // Always keyed by the network address
        let container_cidr = IpNetwork::new(cidr.network(), cidr.prefix())
            .map_err(|err| Error::Config(format!("container_cidr: {}", err)))?;
        let interface_pattern = Pattern::new(&spec.interface_pattern).map_err(|err| {
            Error::Config(format!("interface_pattern '{}': {}", spec.interface_pattern, err))
        })?;
        let sentinel: HardwareAddr = spec.sentinel.parse()?;

        Ok(Self {
            bird_socket: spec.bird_socket,
            poll_interval: Duration::from_secs(spec.poll_interval),
            query_timeout: Duration::from_secs(spec.query_timeout),
            container_cidr,
            interface_pattern,
            sibling_table: spec.sibling_table,
            sentinel,
            discovery: spec.discovery,
            apply: spec.apply,
            route_events: spec.route_events,
        })
    }
}
