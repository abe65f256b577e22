use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook_tokio::Signals;
use tokio::sync::mpsc;

use crate::bird::SocketConnector;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::fdb::FdbSync;
use crate::kernel::{self, Kernel, Netlink};
use crate::supervisor::{run_applier, Supervisor};

// Pending sibling updates shared by all watchers
const UPDATE_QUEUE: usize = 256;

/// Run the daemon until SIGTERM or SIGINT
///
/// SIGUSR1 prints the watched subnets to stdout.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let netlink: Arc<dyn Kernel> = Arc::new(Netlink::connect()?);
    let fdb = FdbSync::new(Arc::clone(&netlink), config.sentinel, config.sibling_table);

    // Subscribe before the scan so nothing added meanwhile is missed
    let mut events = kernel::subscribe()?;
    let mut signals = Signals::new(&[SIGTERM, SIGINT, SIGUSR1])
        .map_err(|err| Error::io("failed to install signal handlers", err))?;
    let signals_handle = signals.handle();

    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE);
    let applier = tokio::spawn(run_applier(fdb.clone(), config.apply, updates_rx));

    let connector = Arc::new(SocketConnector::new(config.bird_socket.clone()));
    let mut supervisor = Supervisor::new(Arc::clone(&config), fdb, connector, updates_tx);

    let links = netlink.links().await?;
    let addresses = netlink.addresses().await?;
    let started = supervisor.start_existing(&links, &addresses);
    info!(
        "Started {} watchers from links matching '{}'",
        started,
        config.interface_pattern.as_str()
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    debug!("Kernel event: {:?}", event);
                    supervisor.handle_event(event);
                }
                None => {
                    error!("Kernel event subscription ended");
                    break;
                }
            },
            signal = signals.next() => match signal {
                Some(SIGUSR1) => supervisor.print_dump(),
                Some(sig @ SIGTERM) | Some(sig @ SIGINT) => {
                    info!("Received signal {}, stopping fdbsync...", sig);
                    break;
                }
                Some(other) => debug!("Ignoring signal {}", other),
                None => break,
            },
        }
    }

    signals_handle.close();
    supervisor.shutdown().await;
    // Dropping the last sender lets the applier drain and exit
    drop(supervisor);
    if let Err(err) = applier.await {
        error!("Update applier ended abnormally: {}", err);
    }
    info!("Stopped");
    Ok(())
}
