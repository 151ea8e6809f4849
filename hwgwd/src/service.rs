//! Directory service loop.
//!
//! Owns the RPC server for the directory context and drives it at a fixed
//! tick: drain the inbox, purge dead owners, refresh the fillers. Runs
//! until the shutdown signal flips.

use crate::directory::Directory;
use hwgw_common::config::HwgwConfig;
use hwgw_common::rpc::{PortBus, RpcServer};
use hwgw_common::types::Origin;
use hwgw_common::world::{Exec, Oracle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// The directory's own process identity on the bus.
pub const DIRECTORY_ORIGIN: Origin = 1;

pub struct DirectoryService<W> {
    server: RpcServer<Directory<W>>,
    tick: Duration,
}

impl<W: Oracle + Exec + 'static> DirectoryService<W> {
    pub fn new(world: Arc<W>, bus: PortBus, cfg: &HwgwConfig) -> Self {
        let directory = Directory::new(world, &cfg.directory, DIRECTORY_ORIGIN);
        let server = RpcServer::new(
            Arc::new(directory),
            Arc::new(Directory::router()),
            bus,
            cfg.rpc.directory_port,
        );
        Self {
            server,
            tick: cfg.directory.tick,
        }
    }

    pub fn directory(&self) -> &Arc<Directory<W>> {
        self.server.context()
    }

    /// Serve until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "directory service up");
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.server.tick();
                    let directory = self.server.context();
                    directory.maintain();
                    directory.refresh_fillers();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.server.context().shutdown();
        info!("directory service down");
    }

    /// Spawn the service; the returned sender stops it when set to true
    /// (or dropped).
    pub fn spawn(self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }
}
