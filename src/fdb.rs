use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::kernel::{FdbEntry, HardwareAddr, Kernel};
use crate::reconcile::{reconcile, SiblingSet, SiblingUpdate};

/// Reads and writes sibling entries in the VXLAN bridge FDB
///
/// Only entries carrying the sentinel hardware address are considered ours;
/// anything else on the link is left alone.
#[derive(Clone)]
pub struct FdbSync {
    kernel: Arc<dyn Kernel>,
    sentinel: HardwareAddr,
    sibling_table: u32,
}

impl FdbSync {
    pub fn new(kernel: Arc<dyn Kernel>, sentinel: HardwareAddr, sibling_table: u32) -> Self {
        Self {
            kernel,
            sentinel,
            sibling_table,
        }
    }

    pub fn sibling_table(&self) -> u32 {
        self.sibling_table
    }

    /// Gateways of the sibling table routes to exactly `subnet`
    pub async fn route_siblings(&self, subnet: &IpNetwork) -> Result<SiblingSet> {
        let routes = self.kernel.routes().await?;
        Ok(routes
            .iter()
            .filter(|route| route.table == self.sibling_table)
            .filter(|route| route.destination.as_ref() == Some(subnet))
            .flat_map(|route| route.gateways())
            .collect())
    }

    /// Index of the VXLAN link carrying `subnet`
    ///
    /// The subnet is reached on-link through a stacked device; the VXLAN link
    /// is that device's parent.
    pub async fn vxlan_id_from_prefix(&self, subnet: &IpNetwork) -> Result<u32> {
        let routes = self
            .kernel
            .route_get(subnet.network())
            .await
            .map_err(|err| Error::resolution_from(format!("no route to {}", subnet), err))?;
        let route = routes
            .iter()
            .find(|route| route.gateway.is_none() && route.next_hops.is_empty())
            .ok_or_else(|| Error::resolution(format!("no on-link route for {}", subnet)))?;
        let device = route.output_link.ok_or_else(|| {
            Error::resolution(format!("on-link route for {} has no device", subnet))
        })?;
        let link = self.kernel.link(device).await?;
        match link.parent {
            Some(parent) if parent != 0 && parent != link.index => Ok(parent),
            _ => Err(Error::resolution(format!(
                "device {} for {} has no parent link",
                link.name, subnet
            ))),
        }
    }

    /// Sibling addresses installed on `vxlan` with the sentinel address
    pub async fn fdb_siblings(&self, vxlan: u32) -> Result<SiblingSet> {
        let entries = self.kernel.fdb_entries(vxlan).await?;
        Ok(entries
            .iter()
            .filter(|entry| entry.hwaddr == self.sentinel)
            .map(|entry| entry.address)
            .collect())
    }

    pub async fn is_directly_connected(&self, subnet: &IpNetwork) -> Result<bool> {
        let addresses = self.kernel.addresses().await?;
        Ok(addresses.iter().any(|addr| subnet.contains(addr.address)))
    }

    pub async fn add_sibling(&self, vxlan: u32, address: IpAddr) -> Result<()> {
        let entry = FdbEntry {
            link: vxlan,
            address,
            hwaddr: self.sentinel,
        };
        self.kernel.fdb_append(&entry).await
    }

    pub async fn del_sibling(&self, vxlan: u32, address: IpAddr) -> Result<()> {
        let entries = self.kernel.fdb_entries(vxlan).await?;
        let owned = entries
            .iter()
            .find(|entry| entry.address == address && entry.hwaddr == self.sentinel);
        match owned {
            Some(entry) => self.kernel.fdb_delete(entry).await,
            None => {
                debug!("No entry for {} on link {}, nothing to delete", address, vxlan);
                Ok(())
            }
        }
    }

    /// Converge the FDB of `subnet` on the sibling table routes
    ///
    /// Returns how many mutations were attempted. Individual failures are
    /// logged and do not stop the rest.
    pub async fn sync_fdb(&self, subnet: &IpNetwork) -> Result<usize> {
        let desired = self.route_siblings(subnet).await?;
        let vxlan = self.vxlan_id_from_prefix(subnet).await?;
        let installed = self.fdb_siblings(vxlan).await?;
        let updates = reconcile(*subnet, &desired, &installed);
        if updates.is_empty() {
            debug!("FDB for {} already in sync", subnet);
            return Ok(0);
        }
        let mut failed = 0;
        for update in &updates {
            if self.apply_on(vxlan, update).await.is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(
                "Synced {} with {} of {} updates failing",
                subnet,
                failed,
                updates.len()
            );
        }
        Ok(updates.len())
    }

    /// Apply one update, resolving the VXLAN link for its subnet
    pub async fn apply(&self, update: &SiblingUpdate) -> Result<()> {
        let vxlan = self.vxlan_id_from_prefix(&update.subnet).await?;
        self.apply_on(vxlan, update).await
    }

    pub async fn apply_on(&self, vxlan: u32, update: &SiblingUpdate) -> Result<()> {
        let result = if update.added {
            self.add_sibling(vxlan, update.address).await
        } else {
            self.del_sibling(vxlan, update.address).await
        };
        match &result {
            Ok(()) => info!("{} (link {})", capitalize(&update.to_string()), vxlan),
            Err(err) => error!("Failed to {} (link {}): {}", update, vxlan, err),
        }
        result
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
