//! In-memory stand-ins for the kernel and the routing socket

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use crate::bird::{Client, Connector};
use crate::error::{Error, Result};
use crate::kernel::{FdbEntry, HardwareAddr, InterfaceAddress, Kernel, LinkInfo, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Append(FdbEntry),
    Delete(FdbEntry),
}

#[derive(Default)]
struct KernelState {
    addresses: Vec<InterfaceAddress>,
    links: Vec<LinkInfo>,
    routes: Vec<Route>,
    lookups: HashMap<IpAddr, Vec<Route>>,
    fdb: Vec<FdbEntry>,
    mutations: Vec<Mutation>,
    failing_appends: HashSet<IpAddr>,
    failing_deletes: HashSet<IpAddr>,
    fail_fdb_list: bool,
}

#[derive(Default)]
pub struct FakeKernel {
    state: Mutex<KernelState>,
}

impl FakeKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `subnet` resolve to `vxlan` through an on-link device `device`
    pub fn with_vxlan(&self, subnet: &str, device: u32, vxlan: u32) {
        let subnet: IpNetwork = subnet.parse().unwrap();
        let mut state = self.state.lock().unwrap();
        state.lookups.insert(
            subnet.network(),
            vec![Route {
                table: 254,
                destination: Some(subnet),
                gateway: None,
                next_hops: Vec::new(),
                output_link: Some(device),
            }],
        );
        state.links.push(LinkInfo {
            index: device,
            name: format!("mv_{}", device),
            parent: Some(vxlan),
        });
        state.links.push(LinkInfo {
            index: vxlan,
            name: format!("vx{}", vxlan),
            parent: None,
        });
    }

    pub fn add_address(&self, link: u32, cidr: &str) {
        let (address, prefix_len) = split_cidr(cidr);
        self.state.lock().unwrap().addresses.push(InterfaceAddress {
            link,
            address,
            prefix_len,
        });
    }

    pub fn add_route(&self, route: Route) {
        self.state.lock().unwrap().routes.push(route);
    }

    pub fn add_fdb(&self, link: u32, address: &str, hwaddr: HardwareAddr) {
        self.state.lock().unwrap().fdb.push(FdbEntry {
            link,
            address: address.parse().unwrap(),
            hwaddr,
        });
    }

    pub fn fail_append(&self, address: &str) {
        let address = address.parse().unwrap();
        self.state.lock().unwrap().failing_appends.insert(address);
    }

    pub fn fail_delete(&self, address: &str) {
        let address = address.parse().unwrap();
        self.state.lock().unwrap().failing_deletes.insert(address);
    }

    pub fn fail_fdb_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_fdb_list = fail;
    }

    pub fn fdb(&self) -> Vec<FdbEntry> {
        self.state.lock().unwrap().fdb.clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }
}

fn split_cidr(cidr: &str) -> (IpAddr, u8) {
    let mut parts = cidr.split('/');
    let address = parts.next().unwrap().parse().unwrap();
    let prefix_len = parts.next().unwrap().parse().unwrap();
    (address, prefix_len)
}

fn fake_error(context: String) -> Error {
    Error::kernel_query(context, std::io::Error::new(std::io::ErrorKind::Other, "fake"))
}

#[async_trait]
impl Kernel for FakeKernel {
    async fn addresses(&self) -> Result<Vec<InterfaceAddress>> {
        Ok(self.state.lock().unwrap().addresses.clone())
    }

    async fn links(&self) -> Result<Vec<LinkInfo>> {
        Ok(self.state.lock().unwrap().links.clone())
    }

    async fn link(&self, index: u32) -> Result<LinkInfo> {
        let state = self.state.lock().unwrap();
        state
            .links
            .iter()
            .find(|link| link.index == index)
            .cloned()
            .ok_or_else(|| Error::resolution(format!("link {} not found", index)))
    }

    async fn routes(&self) -> Result<Vec<Route>> {
        Ok(self.state.lock().unwrap().routes.clone())
    }

    async fn route_get(&self, destination: IpAddr) -> Result<Vec<Route>> {
        let state = self.state.lock().unwrap();
        state
            .lookups
            .get(&destination)
            .cloned()
            .ok_or_else(|| fake_error(format!("no route to {}", destination)))
    }

    async fn fdb_entries(&self, link: u32) -> Result<Vec<FdbEntry>> {
        let state = self.state.lock().unwrap();
        if state.fail_fdb_list {
            return Err(fake_error(format!("listing fdb on {}", link)));
        }
        Ok(state.fdb.iter().filter(|e| e.link == link).cloned().collect())
    }

    async fn fdb_append(&self, entry: &FdbEntry) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(Mutation::Append(*entry));
        if state.failing_appends.contains(&entry.address) {
            return Err(Error::mutation(
                format!("append {}", entry),
                std::io::Error::new(std::io::ErrorKind::Other, "EEXIST"),
            ));
        }
        if !state.fdb.contains(entry) {
            state.fdb.push(*entry);
        }
        Ok(())
    }

    async fn fdb_delete(&self, entry: &FdbEntry) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(Mutation::Delete(*entry));
        if state.failing_deletes.contains(&entry.address) {
            return Err(Error::mutation(
                format!("delete {}", entry),
                std::io::Error::new(std::io::ErrorKind::Other, "EBUSY"),
            ));
        }
        state.fdb.retain(|e| e != entry);
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    reply: Vec<String>,
    fail_queries: bool,
    refuse: bool,
    queries: Vec<String>,
    connects: usize,
    closed: usize,
}

/// Routing client answering every query with the same scripted reply
pub struct ScriptedClient {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Client for ScriptedClient {
    async fn query(&mut self, command: &str) -> Result<Vec<String>> {
        let mut script = self.script.lock().unwrap();
        script.queries.push(command.to_string());
        if script.fail_queries {
            return Err(Error::connection("socket died while reading"));
        }
        Ok(script.reply.clone())
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closed += 1;
    }
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with one `via` line per sibling
    pub fn reply_siblings(&self, siblings: &[&str]) {
        let mut reply = vec!["1007-Table master4:".to_string()];
        for sibling in siblings {
            reply.push(format!(" via {} on vx0", sibling));
        }
        reply.push("0000 ".to_string());
        self.script.lock().unwrap().reply = reply;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.script.lock().unwrap().fail_queries = fail;
    }

    pub fn refuse(&self, refuse: bool) {
        self.script.lock().unwrap().refuse = refuse;
    }

    pub fn queries(&self) -> Vec<String> {
        self.script.lock().unwrap().queries.clone()
    }

    pub fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    pub fn closed(&self) -> usize {
        self.script.lock().unwrap().closed
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Client>> {
        let mut script = self.script.lock().unwrap();
        if script.refuse {
            return Err(Error::connection("failed to connect"));
        }
        script.connects += 1;
        Ok(Box::new(ScriptedClient {
            script: Arc::clone(&self.script),
        }))
    }
}
