use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{self, Deserialize, Deserializer};

struct Defaults {}

impl Defaults {
    fn bird_socket() -> PathBuf {
        PathBuf::from("/var/run/bird/bird.ctl")
    }

    fn poll_interval() -> u64 {
        5
    }
    fn query_timeout() -> u64 {
        10
    }

    fn container_cidr() -> String {
        String::from("10.1.0.0/16")
    }

    fn interface_pattern() -> String {
        String::from("mv_*")
    }

    fn sibling_table() -> u32 {
        100
    }

    fn sentinel() -> String {
        String::from("00:00:00:00:00:00")
    }

    fn discovery() -> DiscoveryMode {
        DiscoveryMode::Bird
    }
    fn apply() -> ApplyMode {
        ApplyMode::Applier
    }
}

/// Config (toml) representation of the daemon settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ServerConfigSpec {
    // BIRD control socket
    #[serde(default = "Defaults::bird_socket")]
    pub(super) bird_socket: PathBuf,
    // Seconds between watcher passes
    #[serde(default = "Defaults::poll_interval")]
    pub(super) poll_interval: u64,
    // Seconds allowed for a single routing query
    #[serde(default = "Defaults::query_timeout")]
    pub(super) query_timeout: u64,

    // Only addresses inside this range start watchers
    #[serde(default = "Defaults::container_cidr")]
    pub(super) container_cidr: String,
    // Links scanned at startup (glob)
    #[serde(default = "Defaults::interface_pattern")]
    pub(super) interface_pattern: String,

    // Table holding the sibling routes
    #[serde(default = "Defaults::sibling_table")]
    pub(super) sibling_table: u32,
    // Hardware address marking the entries we own
    #[serde(default = "Defaults::sentinel")]
    pub(super) sentinel: String,

    #[serde(default = "Defaults::discovery")]
    pub(super) discovery: DiscoveryMode,
    #[serde(default = "Defaults::apply")]
    pub(super) apply: ApplyMode,
    // Resync subnets when sibling table routes change
    #[serde(default)]
    pub(super) route_events: bool,
}

impl ServerConfigSpec {
    pub(super) fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_toml(&contents)
    }

    pub(super) fn from_toml(contents: &str) -> io::Result<Self> {
        toml::from_str(contents).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

impl Default for ServerConfigSpec {
    fn default() -> Self {
        Self {
            bird_socket: Defaults::bird_socket(),
            poll_interval: Defaults::poll_interval(),
            query_timeout: Defaults::query_timeout(),
            container_cidr: Defaults::container_cidr(),
            interface_pattern: Defaults::interface_pattern(),
            sibling_table: Defaults::sibling_table(),
            sentinel: Defaults::sentinel(),
            discovery: Defaults::discovery(),
            apply: Defaults::apply(),
            route_events: false,
        }
    }
}

/// Where a watcher learns the desired siblings of its subnet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscoveryMode {
    /// `show route` queries on the BIRD control socket
    Bird,
    /// Gateways of the sibling table routes
    RouteTable,
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = match self {
            DiscoveryMode::Bird => "bird",
            DiscoveryMode::RouteTable => "route-table",
        };
        write!(f, "{}", display)
    }
}

impl<'de> Deserialize<'de> for DiscoveryMode {
    fn deserialize<D>(deserializer: D) -> Result<DiscoveryMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "bird" => Ok(DiscoveryMode::Bird),
            "route-table" | "route_table" => Ok(DiscoveryMode::RouteTable),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported discovery mode: '{}'",
                s
            ))),
        }
    }
}

/// Which task writes sibling updates to the FDB
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyMode {
    /// The shared applier task, in channel order
    Applier,
    /// Each watcher, as soon as the update is computed
    Watcher,
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = match self {
            ApplyMode::Applier => "applier",
            ApplyMode::Watcher => "watcher",
        };
        write!(f, "{}", display)
    }
}

impl<'de> Deserialize<'de> for ApplyMode {
    fn deserialize<D>(deserializer: D) -> Result<ApplyMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "applier" => Ok(ApplyMode::Applier),
            "watcher" => Ok(ApplyMode::Watcher),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported apply mode: '{}'",
                s
            ))),
        }
    }
}
