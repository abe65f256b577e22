use std::convert::TryFrom;
use std::net::IpAddr;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ipnetwork::IpNetwork;
use log::{debug, trace};
use netlink_packet_core::{
    NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_APPEND, NLM_F_CREATE, NLM_F_REQUEST,
};
use netlink_packet_route::nlas::address::Nla as AddressNla;
use netlink_packet_route::nlas::link::Nla as LinkNla;
use netlink_packet_route::nlas::neighbour::Nla as NeighbourNla;
use netlink_packet_route::nlas::route::Nla as RouteNla;
use netlink_packet_route::route::NextHop;
use netlink_packet_route::{
    AddressMessage, LinkMessage, NeighbourMessage, RouteMessage, RtnlMessage, AF_BRIDGE, AF_INET,
    AF_INET6, NTF_SELF, NUD_PERMANENT,
};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::constants::{
    RTMGRP_IPV4_IFADDR, RTMGRP_IPV4_ROUTE, RTMGRP_IPV6_IFADDR, RTMGRP_IPV6_ROUTE,
};
use rtnetlink::{Handle, IpVersion};
use tokio::sync::mpsc;

use super::{FdbEntry, HardwareAddr, InterfaceAddress, Kernel, KernelEvent, LinkInfo, Route};
use crate::error::{Error, Result};

/// [`Kernel`] backed by an rtnetlink socket
#[derive(Clone)]
pub struct Netlink {
    handle: Handle,
}

impl Netlink {
    /// Open the socket and drive it on the current tokio runtime
    pub fn connect() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|err| Error::kernel_query("failed to open rtnetlink socket", err))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn acknowledge(
        &self,
        request: NetlinkMessage<RtnlMessage>,
    ) -> std::result::Result<(), rtnetlink::Error> {
        let mut handle = self.handle.clone();
        let mut response = handle.request(request)?;
        while let Some(message) = response.next().await {
            if let NetlinkPayload::Error(err) = message.payload {
                if err.code.is_some() {
                    return Err(rtnetlink::Error::NetlinkError(err));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Kernel for Netlink {
    async fn addresses(&self) -> Result<Vec<InterfaceAddress>> {
        let messages: Vec<AddressMessage> = self
            .handle
            .address()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(|err| Error::kernel_query("failed to list addresses", err))?;
        Ok(messages.iter().filter_map(address_from_message).collect())
    }

    async fn links(&self) -> Result<Vec<LinkInfo>> {
        let messages: Vec<LinkMessage> = self
            .handle
            .link()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(|err| Error::kernel_query("failed to list links", err))?;
        Ok(messages.iter().map(link_from_message).collect())
    }

    async fn link(&self, index: u32) -> Result<LinkInfo> {
        let context = || format!("failed to get link {}", index);
        let messages: Vec<LinkMessage> = self
            .handle
            .link()
            .get()
            .match_index(index)
            .execute()
            .try_collect()
            .await
            .map_err(|err| Error::kernel_query(context(), err))?;
        messages
            .first()
            .map(link_from_message)
            .ok_or_else(|| Error::resolution(format!("link {} not found", index)))
    }

    async fn routes(&self) -> Result<Vec<Route>> {
        let mut routes = Vec::new();
        for version in [IpVersion::V4, IpVersion::V6] {
            let messages: Vec<RouteMessage> = self
                .handle
                .route()
                .get(version)
                .execute()
                .try_collect()
                .await
                .map_err(|err| Error::kernel_query("failed to list routes", err))?;
            routes.extend(messages.iter().filter_map(route_from_message));
        }
        Ok(routes)
    }

    async fn route_get(&self, destination: IpAddr) -> Result<Vec<Route>> {
        let context = || format!("failed to look up route to {}", destination);
        let mut message = RouteMessage::default();
        message.header.address_family = family(destination);
        message.header.destination_prefix_length = full_prefix(destination);
        message.nlas.push(RouteNla::Destination(octets(destination)));
        let mut request = NetlinkMessage::from(RtnlMessage::GetRoute(message));
        request.header.flags = NLM_F_REQUEST;

        let mut handle = self.handle.clone();
        let mut response = handle
            .request(request)
            .map_err(|err| Error::kernel_query(context(), err))?;
        let mut routes = Vec::new();
        while let Some(message) = response.next().await {
            match message.payload {
                NetlinkPayload::InnerMessage(RtnlMessage::NewRoute(route)) => {
                    routes.extend(route_from_message(&route))
                }
                NetlinkPayload::Error(err) if err.code.is_some() => {
                    return Err(Error::kernel_query(
                        context(),
                        rtnetlink::Error::NetlinkError(err),
                    ))
                }
                _ => {}
            }
        }
        Ok(routes)
    }

    async fn fdb_entries(&self, link: u32) -> Result<Vec<FdbEntry>> {
        let mut request = self.handle.neighbours().get();
        request.message_mut().header.family = AF_BRIDGE as u8;
        let messages: Vec<NeighbourMessage> = request
            .execute()
            .try_collect()
            .await
            .map_err(|err| {
                Error::kernel_query(format!("failed to list bridge fdb on link {}", link), err)
            })?;
        Ok(messages
            .iter()
            .filter(|message| message.header.ifindex == link)
            .filter_map(fdb_from_message)
            .collect())
    }

    async fn fdb_append(&self, entry: &FdbEntry) -> Result<()> {
        trace!("bridge fdb append {}", entry);
        let mut request = NetlinkMessage::from(RtnlMessage::NewNeighbour(fdb_message(entry)));
        request.header.flags = NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_APPEND;
        self.acknowledge(request)
            .await
            .map_err(|err| Error::mutation(format!("failed to append {}", entry), err))
    }

    async fn fdb_delete(&self, entry: &FdbEntry) -> Result<()> {
        trace!("bridge fdb del {}", entry);
        self.handle
            .neighbours()
            .del(fdb_message(entry))
            .execute()
            .await
            .map_err(|err| Error::mutation(format!("failed to delete {}", entry), err))
    }
}

/// Subscribe to address and route notifications
///
/// Events arrive in kernel order until the receiver is dropped.
pub fn subscribe() -> Result<mpsc::UnboundedReceiver<KernelEvent>> {
    let (mut connection, _, mut messages) = rtnetlink::new_connection()
        .map_err(|err| Error::kernel_query("failed to open rtnetlink socket", err))?;
    let groups = RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR | RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE;
    connection
        .socket_mut()
        .socket_mut()
        .bind(&SocketAddr::new(0, groups))
        .map_err(|err| Error::kernel_query("failed to join rtnetlink multicast groups", err))?;
    tokio::spawn(connection);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some((message, _)) = messages.next().await {
            if let Some(event) = event_from_message(message) {
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
        debug!("Kernel event subscription ended");
    });
    Ok(rx)
}

pub(crate) fn event_from_message(message: NetlinkMessage<RtnlMessage>) -> Option<KernelEvent> {
    match message.payload {
        NetlinkPayload::InnerMessage(RtnlMessage::NewAddress(msg)) => {
            address_from_message(&msg).map(KernelEvent::AddressAdded)
        }
        NetlinkPayload::InnerMessage(RtnlMessage::DelAddress(msg)) => {
            address_from_message(&msg).map(KernelEvent::AddressRemoved)
        }
        NetlinkPayload::InnerMessage(RtnlMessage::NewRoute(msg)) => {
            route_from_message(&msg).map(KernelEvent::RouteAdded)
        }
        NetlinkPayload::InnerMessage(RtnlMessage::DelRoute(msg)) => {
            route_from_message(&msg).map(KernelEvent::RouteRemoved)
        }
        other => {
            trace!("Ignoring netlink message {:?}", other);
            None
        }
    }
}

fn address_from_message(message: &AddressMessage) -> Option<InterfaceAddress> {
    let mut address = None;
    for nla in &message.nlas {
        match nla {
            // IFA_LOCAL is the local side of point-to-point links
            AddressNla::Local(bytes) => return local_address(message, bytes),
            AddressNla::Address(bytes) => address = Some(bytes),
            _ => {}
        }
    }
    address.and_then(|bytes| local_address(message, bytes))
}

fn local_address(message: &AddressMessage, bytes: &[u8]) -> Option<InterfaceAddress> {
    Some(InterfaceAddress {
        link: message.header.index,
        address: ip_from_octets(bytes)?,
        prefix_len: message.header.prefix_len,
    })
}

fn link_from_message(message: &LinkMessage) -> LinkInfo {
    let mut link = LinkInfo {
        index: message.header.index,
        name: String::new(),
        parent: None,
    };
    for nla in &message.nlas {
        match nla {
            LinkNla::IfName(name) => link.name = name.clone(),
            LinkNla::Link(parent) => link.parent = Some(*parent),
            _ => {}
        }
    }
    link
}

fn route_from_message(message: &RouteMessage) -> Option<Route> {
    let mut route = Route {
        table: u32::from(message.header.table),
        destination: None,
        gateway: None,
        next_hops: Vec::new(),
        output_link: None,
    };
    let mut destination = None;
    for nla in &message.nlas {
        match nla {
            RouteNla::Table(table) => route.table = *table,
            RouteNla::Destination(bytes) => destination = ip_from_octets(bytes),
            RouteNla::Gateway(bytes) => route.gateway = ip_from_octets(bytes),
            RouteNla::Oif(index) => route.output_link = Some(*index),
            RouteNla::MultiPath(hops) => {
                route.next_hops.extend(hops.iter().filter_map(NextHop::gateway))
            }
            _ => {}
        }
    }
    if let Some(addr) = destination {
        let prefix_len = message.header.destination_prefix_length;
        route.destination = Some(IpNetwork::new(addr, prefix_len).ok()?);
    }
    Some(route)
}

fn fdb_from_message(message: &NeighbourMessage) -> Option<FdbEntry> {
    let mut address = None;
    let mut hwaddr = None;
    for nla in &message.nlas {
        match nla {
            NeighbourNla::Destination(bytes) => address = ip_from_octets(bytes),
            NeighbourNla::LinkLocalAddress(bytes) => {
                hwaddr = HardwareAddr::try_from(&bytes[..]).ok()
            }
            _ => {}
        }
    }
    Some(FdbEntry {
        link: message.header.ifindex,
        address: address?,
        hwaddr: hwaddr?,
    })
}

fn fdb_message(entry: &FdbEntry) -> NeighbourMessage {
    let mut message = NeighbourMessage::default();
    message.header.family = AF_BRIDGE as u8;
    message.header.ifindex = entry.link;
    message.header.state = NUD_PERMANENT;
    message.header.flags = NTF_SELF;
    message
        .nlas
        .push(NeighbourNla::LinkLocalAddress(entry.hwaddr.octets().to_vec()));
    message.nlas.push(NeighbourNla::Destination(octets(entry.address)));
    message
}

fn ip_from_octets(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        Some(IpAddr::from(v4))
    } else if let Ok(v6) = <[u8; 16]>::try_from(bytes) {
        Some(IpAddr::from(v6))
    } else {
        None
    }
}

fn octets(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn family(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => AF_INET as u8,
        IpAddr::V6(_) => AF_INET6 as u8,
    }
}

fn full_prefix(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_address(index: u32, addr: &str, prefix_len: u8) -> AddressMessage {
        let addr: IpAddr = addr.parse().unwrap();
        let mut message = AddressMessage::default();
        message.header.family = family(addr);
        message.header.index = index;
        message.header.prefix_len = prefix_len;
        message.nlas.push(AddressNla::Address(octets(addr)));
        message
    }

    #[test]
    fn test_address_events() {
        let message =
            NetlinkMessage::from(RtnlMessage::NewAddress(new_address(7, "10.1.2.17", 24)));
        let expected = InterfaceAddress {
            link: 7,
            address: "10.1.2.17".parse().unwrap(),
            prefix_len: 24,
        };
        assert_eq!(
            event_from_message(message),
            Some(KernelEvent::AddressAdded(expected))
        );

        let mut removed = new_address(7, "fd00::1", 64);
        removed.nlas.push(AddressNla::Label("mv_a".to_string()));
        let message = NetlinkMessage::from(RtnlMessage::DelAddress(removed));
        match event_from_message(message) {
            Some(KernelEvent::AddressRemoved(addr)) => {
                assert_eq!(addr.subnet().unwrap().to_string(), "fd00::/64")
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_address_prefers_local() {
        let mut message = new_address(3, "192.0.2.1", 32);
        message.nlas.push(AddressNla::Local(octets("192.0.2.9".parse().unwrap())));
        let addr = address_from_message(&message).unwrap();
        assert_eq!(addr.address.to_string(), "192.0.2.9");
    }

    #[test]
    fn test_route_events() {
        let mut route = RouteMessage::default();
        route.header.address_family = AF_INET as u8;
        route.header.destination_prefix_length = 24;
        route.header.table = 100;
        route.nlas.push(RouteNla::Destination(vec![10, 1, 2, 0]));
        route.nlas.push(RouteNla::Gateway(vec![10, 1, 2, 5]));
        route.nlas.push(RouteNla::Oif(4));

        let message = NetlinkMessage::from(RtnlMessage::NewRoute(route.clone()));
        let expected = Route {
            table: 100,
            destination: Some("10.1.2.0/24".parse().unwrap()),
            gateway: Some("10.1.2.5".parse().unwrap()),
            next_hops: Vec::new(),
            output_link: Some(4),
        };
        assert_eq!(
            event_from_message(message),
            Some(KernelEvent::RouteAdded(expected.clone()))
        );

        // Tables above 255 only travel as RTA_TABLE
        route.header.table = 252;
        route.nlas.push(RouteNla::Table(1000));
        let message = NetlinkMessage::from(RtnlMessage::DelRoute(route));
        match event_from_message(message) {
            Some(KernelEvent::RouteRemoved(route)) => assert_eq!(route.table, 1000),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_other_messages_ignored() {
        let message = NetlinkMessage::from(RtnlMessage::NewLink(LinkMessage::default()));
        assert_eq!(event_from_message(message), None);
    }

    #[test]
    fn test_link_parent() {
        let mut message = LinkMessage::default();
        message.header.index = 12;
        message.nlas.push(LinkNla::IfName("mv_blue".to_string()));
        message.nlas.push(LinkNla::Link(9));
        assert_eq!(
            link_from_message(&message),
            LinkInfo {
                index: 12,
                name: "mv_blue".to_string(),
                parent: Some(9),
            }
        );
    }

    #[test]
    fn test_fdb_message() {
        let entry = FdbEntry {
            link: 9,
            address: "10.1.2.5".parse().unwrap(),
            hwaddr: HardwareAddr::default(),
        };
        let message = fdb_message(&entry);
        assert_eq!(message.header.family, AF_BRIDGE as u8);
        assert_eq!(message.header.state, NUD_PERMANENT);
        assert_eq!(message.header.flags, NTF_SELF);
        assert_eq!(fdb_from_message(&message), Some(entry));

        // Entries without a remote address are not ours
        let mut local = NeighbourMessage::default();
        local.header.ifindex = 9;
        local
            .nlas
            .push(NeighbourNla::LinkLocalAddress(vec![2, 0x42, 0, 0, 0, 1]));
        assert_eq!(fdb_from_message(&local), None);
    }

    #[test]
    fn test_ip_from_octets() {
        assert_eq!(
            ip_from_octets(&[10, 0, 0, 5]),
            Some("10.0.0.5".parse().unwrap())
        );
        assert_eq!(
            ip_from_octets(&octets("fd00::5".parse().unwrap())),
            Some("fd00::5".parse().unwrap())
        );
        assert_eq!(ip_from_octets(&[10, 0, 0]), None);
    }
}
