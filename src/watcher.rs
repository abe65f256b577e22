//! One reconciliation loop per overlay subnet

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bird::{parse_siblings, route_command, Client, Connector};
use crate::config::{ApplyMode, DiscoveryMode};
use crate::error::{Error, Result};
use crate::fdb::FdbSync;
use crate::reconcile::{reconcile, SiblingSet, SiblingUpdate};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a watcher learns the desired sibling set
#[derive(Clone)]
pub enum Discovery {
    /// Query BIRD over a connection owned by the watcher
    Bird(Arc<dyn Connector>),
    /// Read the sibling table routes
    RouteTable,
}

impl Discovery {
    pub fn mode(&self) -> DiscoveryMode {
        match self {
            Discovery::Bird(_) => DiscoveryMode::Bird,
            Discovery::RouteTable => DiscoveryMode::RouteTable,
        }
    }
}

// Connected form of `Discovery`, owned by the running task
enum Source {
    Bird(Box<dyn Client>),
    RouteTable,
    /// Routing client closed after a query timed out
    Closed,
}

impl Source {
    async fn close(&mut self) {
        if let Source::Bird(client) = self {
            client.close().await;
        }
    }
}

pub struct SiblingWatcher {
    subnet: IpNetwork,
    discovery: Discovery,
    fdb: FdbSync,
    updates: mpsc::Sender<SiblingUpdate>,
    interval: Duration,
    query_timeout: Duration,
    apply: ApplyMode,
    cancel: CancellationToken,
    // Last successfully fetched desired set
    desired: SiblingSet,
}

impl SiblingWatcher {
    pub fn new(
        subnet: IpNetwork,
        discovery: Discovery,
        fdb: FdbSync,
        updates: mpsc::Sender<SiblingUpdate>,
        interval: Duration,
        apply: ApplyMode,
    ) -> Self {
        Self {
            subnet,
            discovery,
            fdb,
            updates,
            interval,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            apply,
            cancel: CancellationToken::new(),
            desired: SiblingSet::new(),
        }
    }

    pub fn query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Start watching on a new task
    pub fn spawn(self) -> WatcherHandle {
        let subnet = self.subnet;
        let discovery = self.discovery.mode();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.watch());
        WatcherHandle {
            subnet,
            discovery,
            started: Utc::now(),
            cancel,
            task,
        }
    }

    async fn watch(mut self) {
        let mut source = match self.connect().await {
            Some(source) => source,
            None => return,
        };
        info!(
            "Watching {} every {}s ({})",
            self.subnet,
            self.interval.as_secs(),
            self.discovery.mode()
        );

        // First tick completes immediately
        let mut ticker = interval_at(Instant::now(), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => (),
            }
            self.pass(&mut source).await;
        }

        source.close().await;
        info!("Stopped watching {}", self.subnet);
    }

    async fn connect(&self) -> Option<Source> {
        let connector = match &self.discovery {
            Discovery::Bird(connector) => Arc::clone(connector),
            Discovery::RouteTable => return Some(Source::RouteTable),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = connector.connect() => match result {
                Ok(client) => Some(Source::Bird(client)),
                Err(err) => {
                    error!("Watcher for {} could not connect: {}", self.subnet, err);
                    None
                }
            },
        }
    }

    // One reconciliation pass; failures skip the pass
    async fn pass(&mut self, source: &mut Source) {
        let desired = match self.fetch_desired(source).await {
            Ok(desired) => desired,
            Err(err) => {
                warn!("Skipping pass for {}, desired siblings: {}", self.subnet, err);
                return;
            }
        };
        let vxlan = match self.fdb.vxlan_id_from_prefix(&self.subnet).await {
            Ok(vxlan) => vxlan,
            Err(err) => {
                warn!("Skipping pass for {}: {}", self.subnet, err);
                return;
            }
        };
        let installed = match self.fdb.fdb_siblings(vxlan).await {
            Ok(installed) => installed,
            Err(err) => {
                warn!("Skipping pass for {}, installed siblings: {}", self.subnet, err);
                return;
            }
        };
        self.desired = desired;

        let updates = reconcile(self.subnet, &self.desired, &installed);
        trace!(
            "{}: {} desired, {} installed, {} updates",
            self.subnet,
            self.desired.len(),
            installed.len(),
            updates.len()
        );
        for update in updates {
            if self.cancel.is_cancelled() {
                debug!("Watcher for {} stopped, dropping {}", self.subnet, update);
                return;
            }
            if self.apply == ApplyMode::Watcher {
                // Failures are logged by apply_on; the next pass retries
                let _ = self.fdb.apply_on(vxlan, &update).await;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                sent = self.updates.send(update) => {
                    if sent.is_err() {
                        warn!("Update channel closed, {} not queued", update);
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_desired(&self, source: &mut Source) -> Result<SiblingSet> {
        match source {
            Source::RouteTable => self.fdb.route_siblings(&self.subnet).await,
            Source::Bird(client) => {
                let command = route_command(&self.subnet);
                let reply = timeout(self.query_timeout, client.query(&command)).await;
                match reply {
                    Ok(lines) => Ok(parse_siblings(&lines?)),
                    Err(_) => {
                        // A late reply would answer the next query
                        client.close().await;
                        *source = Source::Closed;
                        Err(Error::connection(format!(
                            "'{}' timed out after {}s, routing client closed",
                            command,
                            self.query_timeout.as_secs()
                        )))
                    }
                }
            }
            Source::Closed => Err(Error::connection("routing client closed")),
        }
    }
}

/// The supervisor's view of a running watcher
pub struct WatcherHandle {
    subnet: IpNetwork,
    discovery: DiscoveryMode,
    started: DateTime<Utc>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn subnet(&self) -> IpNetwork {
        self.subnet
    }

    pub fn discovery(&self) -> DiscoveryMode {
        self.discovery
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Ask the watcher to stop; returns without waiting for it
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The task has exited, stopped or not
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit, after its routing client is closed
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!("Watcher for {} ended abnormally: {}", self.subnet, err);
        }
    }
}
