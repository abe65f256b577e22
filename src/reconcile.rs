use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

pub type SiblingSet = BTreeSet<IpAddr>;

/// One FDB change for a single sibling on a subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingUpdate {
    pub subnet: IpNetwork,
    pub address: IpAddr,
    pub added: bool,
}

impl fmt::Display for SiblingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = if self.added { "add" } else { "remove" };
        write!(f, "{} sibling {} on {}", op, self.address, self.subnet)
    }
}

/// Diff `desired` against `installed`
///
/// Additions come first, then removals, each in ascending address order.
pub fn reconcile(
    subnet: IpNetwork,
    desired: &SiblingSet,
    installed: &SiblingSet,
) -> Vec<SiblingUpdate> {
    let additions = desired.difference(installed).map(|address| SiblingUpdate {
        subnet,
        address: *address,
        added: true,
    });
    let removals = installed.difference(desired).map(|address| SiblingUpdate {
        subnet,
        address: *address,
        added: false,
    });
    additions.chain(removals).collect()
}
