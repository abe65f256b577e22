use std::collections::HashMap;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use futures::FutureExt;
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::bird::Connector;
use crate::config::{ApplyMode, DiscoveryMode, ServerConfig};
use crate::display::{WatcherRow, WatcherTable};
use crate::fdb::FdbSync;
use crate::kernel::{InterfaceAddress, KernelEvent, LinkInfo, Route};
use crate::reconcile::SiblingUpdate;
use crate::watcher::{Discovery, SiblingWatcher, WatcherHandle};

/// Starts and stops one watcher per local overlay subnet
///
/// Owned by the dispatch loop; nothing here blocks on kernel or socket I/O.
pub struct Supervisor {
    config: Arc<ServerConfig>,
    fdb: FdbSync,
    connector: Arc<dyn Connector>,
    updates: mpsc::Sender<SiblingUpdate>,
    // Active watchers      subnet: handle
    watchers: HashMap<IpNetwork, WatcherHandle>,
    // Route triggered syncs still running
    syncs: JoinSet<()>,
}

impl Supervisor {
    pub fn new(
        config: Arc<ServerConfig>,
        fdb: FdbSync,
        connector: Arc<dyn Connector>,
        updates: mpsc::Sender<SiblingUpdate>,
    ) -> Self {
        Self {
            config,
            fdb,
            connector,
            updates,
            watchers: HashMap::new(),
            syncs: JoinSet::new(),
        }
    }

    pub fn handle_event(&mut self, event: KernelEvent) {
        self.reap_syncs();
        match event {
            KernelEvent::AddressAdded(addr) => {
                self.address_added(&addr);
            }
            KernelEvent::AddressRemoved(addr) => self.address_removed(&addr),
            KernelEvent::RouteAdded(route) | KernelEvent::RouteRemoved(route) => {
                if self.config.route_events {
                    self.route_changed(&route);
                }
            }
        }
    }

    /// Returns whether a new watcher was started
    pub fn address_added(&mut self, addr: &InterfaceAddress) -> bool {
        if !self.config.container_cidr.contains(addr.address) {
            trace!("Ignoring address {} outside {}", addr, self.config.container_cidr);
            return false;
        }
        let subnet = match addr.subnet() {
            Ok(subnet) => subnet,
            Err(err) => {
                warn!("Ignoring address {}: {}", addr, err);
                return false;
            }
        };
        self.prune();
        if self.watchers.contains_key(&subnet) {
            info!("Already have a watcher for {}, ignoring {}", subnet, addr);
            return false;
        }

        let discovery = match self.config.discovery {
            DiscoveryMode::Bird => Discovery::Bird(Arc::clone(&self.connector)),
            DiscoveryMode::RouteTable => Discovery::RouteTable,
        };
        let handle = SiblingWatcher::new(
            subnet,
            discovery,
            self.fdb.clone(),
            self.updates.clone(),
            self.config.poll_interval,
            self.config.apply,
        )
        .query_timeout(self.config.query_timeout)
        .spawn();
        info!("Started watcher for {} ({})", subnet, addr);
        self.watchers.insert(subnet, handle);
        true
    }

    pub fn address_removed(&mut self, addr: &InterfaceAddress) {
        let subnet = match addr.subnet() {
            Ok(subnet) => subnet,
            Err(err) => {
                warn!("Ignoring removed address {}: {}", addr, err);
                return;
            }
        };
        match self.watchers.remove(&subnet) {
            Some(handle) => {
                handle.stop();
                info!("Stopping watcher for {} ({} removed)", subnet, addr);
            }
            None => debug!("No watcher for {}, ignoring removal of {}", subnet, addr),
        }
    }

    /// Resync a sibling table destination if it is one of our subnets
    ///
    /// Returns whether a sync was started.
    pub fn route_changed(&mut self, route: &Route) -> bool {
        if route.table != self.fdb.sibling_table() {
            return false;
        }
        let subnet = match route.destination {
            Some(subnet) => subnet,
            None => return false,
        };
        let fdb = self.fdb.clone();
        debug!("Sibling route changed: {}", route);
        self.syncs.spawn(async move {
            match fdb.is_directly_connected(&subnet).await {
                Ok(true) => match fdb.sync_fdb(&subnet).await {
                    Ok(count) => debug!("Route triggered sync of {}: {} updates", subnet, count),
                    Err(err) => warn!("Route triggered sync of {} failed: {}", subnet, err),
                },
                Ok(false) => trace!("{} is not directly connected", subnet),
                Err(err) => warn!("Could not check whether {} is local: {}", subnet, err),
            }
        });
        true
    }

    /// Wait for every route triggered sync to finish
    pub async fn finish_syncs(&mut self) {
        while let Some(result) = self.syncs.join_next().await {
            if let Err(err) = result {
                error!("Route triggered sync ended abnormally: {}", err);
            }
        }
    }

    // Collect syncs that already finished without waiting on the rest
    fn reap_syncs(&mut self) {
        while let Some(Some(result)) = self.syncs.join_next().now_or_never() {
            if let Err(err) = result {
                error!("Route triggered sync ended abnormally: {}", err);
            }
        }
    }

    // Forget watchers whose task already exited, e.g. after a failed connect
    fn prune(&mut self) {
        self.watchers.retain(|subnet, handle| {
            let finished = handle.is_finished();
            if finished {
                debug!("Watcher for {} has exited, forgetting it", subnet);
            }
            !finished
        });
    }

    /// Feed the addresses of links matching the interface pattern
    ///
    /// Returns how many watchers were started.
    pub fn start_existing(&mut self, links: &[LinkInfo], addresses: &[InterfaceAddress]) -> usize {
        let pattern = self.config.interface_pattern.clone();
        let mut started = 0;
        for link in links.iter().filter(|link| pattern.matches(&link.name)) {
            debug!("Scanning link {} ({})", link.name, link.index);
            for addr in addresses.iter().filter(|addr| addr.link == link.index) {
                if self.address_added(addr) {
                    started += 1;
                }
            }
        }
        started
    }

    /// Watched subnets, ascending
    pub fn dump(&self) -> Vec<IpNetwork> {
        self.watchers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(subnet, _)| *subnet)
            .sorted()
            .collect()
    }

    pub fn table(&self) -> WatcherTable {
        let mut table = WatcherTable::new();
        for subnet in self.dump() {
            if let Some(handle) = self.watchers.get(&subnet) {
                table.add_row(&WatcherRow {
                    subnet,
                    discovery: handle.discovery(),
                    started: handle.started(),
                });
            }
        }
        table
    }

    pub fn print_dump(&self) {
        info!("Dumping {} watchers", self.watchers.len());
        println!("{}", self.table());
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Stop every watcher and wait for their routing clients to close
    pub async fn shutdown(&mut self) {
        let handles: Vec<WatcherHandle> = self.watchers.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            handle.join().await;
        }
        self.finish_syncs().await;
    }
}

/// Drain the update channel, one update at a time in arrival order
pub async fn run_applier(
    fdb: FdbSync,
    apply: ApplyMode,
    mut updates: mpsc::Receiver<SiblingUpdate>,
) {
    while let Some(update) = updates.recv().await {
        match apply {
            // Failures are logged by apply; a later pass retries
            ApplyMode::Applier => {
                let _ = fdb.apply(&update).await;
            }
            ApplyMode::Watcher => debug!("Applied by watcher: {}", update),
        }
    }
    debug!("Update channel closed, applier done");
}
