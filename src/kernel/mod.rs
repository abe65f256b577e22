//! Kernel networking state: addresses, links, routes and the bridge FDB

use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use ipnetwork::{IpNetwork, IpNetworkError};

use crate::error::{Error, Result};

pub mod netlink;

pub use self::netlink::{subscribe, Netlink};

/// 48-bit link layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl TryFrom<&[u8]> for HardwareAddr {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let octets = <[u8; 6]>::try_from(bytes).map_err(|_| {
            Error::Config(format!("hardware address must be 6 bytes, got {}", bytes.len()))
        })?;
        Ok(HardwareAddr(octets))
    }
}

impl FromStr for HardwareAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid hardware address '{}'", s));
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(HardwareAddr(octets))
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// An address assigned to a local link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub link: u32,
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    /// The subnet this address lives on, host bits cleared
    pub fn subnet(&self) -> std::result::Result<IpNetwork, IpNetworkError> {
        let network = IpNetwork::new(self.address, self.prefix_len)?;
        IpNetwork::new(network.network(), self.prefix_len)
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{} (link {})", self.address, self.prefix_len, self.link)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    /// `IFLA_LINK`, the lower device of stacked links such as macvlan
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub table: u32,
    pub destination: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    /// Gateways of a multipath route, in kernel order
    pub next_hops: Vec<IpAddr>,
    pub output_link: Option<u32>,
}

impl Route {
    /// Every gateway this route forwards through
    pub fn gateways(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.gateway.iter().chain(self.next_hops.iter()).copied()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.destination {
            Some(dst) => write!(f, "{}", dst)?,
            None => write!(f, "default")?,
        }
        for gateway in self.gateways() {
            write!(f, " via {}", gateway)?;
        }
        if let Some(link) = self.output_link {
            write!(f, " dev {}", link)?;
        }
        write!(f, " table {}", self.table)
    }
}

/// A bridge forwarding entry (`bridge fdb`) on a VXLAN link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdbEntry {
    pub link: u32,
    pub address: IpAddr,
    pub hwaddr: HardwareAddr,
}

impl fmt::Display for FdbEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} dst {} link {}", self.hwaddr, self.address, self.link)
    }
}

/// Address and route changes delivered by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    AddressAdded(InterfaceAddress),
    AddressRemoved(InterfaceAddress),
    RouteAdded(Route),
    RouteRemoved(Route),
}

/// Read and write access to kernel networking state
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Addresses on every link, every family
    async fn addresses(&self) -> Result<Vec<InterfaceAddress>>;

    async fn links(&self) -> Result<Vec<LinkInfo>>;

    async fn link(&self, index: u32) -> Result<LinkInfo>;

    /// Routes from every table, every family
    async fn routes(&self) -> Result<Vec<Route>>;

    /// Routes the kernel would use to reach `destination`
    async fn route_get(&self, destination: IpAddr) -> Result<Vec<Route>>;

    /// Bridge FDB entries on a link
    async fn fdb_entries(&self, link: u32) -> Result<Vec<FdbEntry>>;

    /// Append a permanent entry, `bridge fdb append` style
    async fn fdb_append(&self, entry: &FdbEntry) -> Result<()>;

    async fn fdb_delete(&self, entry: &FdbEntry) -> Result<()>;
}
