//! Share fillers: burn idle RAM on unreserved hosts.
//!
//! One controller task per host loops launching share slices sized to the
//! host's free RAM. Stopping a filler aborts its controller; any in-flight
//! slice keeps running until it settles (or the caller kills the host).

use hwgw_common::types::{HostId, OpKind, Origin};
use hwgw_common::world::{Exec, LaunchSpec, Oracle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

pub struct FillerPool<W> {
    world: Arc<W>,
    origin: Origin,
    /// Pause before retrying when a host has no room or a launch fails.
    pause: Duration,
    active: Mutex<HashMap<HostId, AbortHandle>>,
}

impl<W: Oracle + Exec + 'static> FillerPool<W> {
    pub fn new(world: Arc<W>, origin: Origin, pause: Duration) -> Self {
        Self {
            world,
            origin,
            pause,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<HostId, AbortHandle>> {
        self.active.lock().expect("filler pool poisoned")
    }

    /// Start a filler on `host` unless one is already running.
    pub fn ensure(&self, host: &HostId) {
        let mut active = self.active();
        if active.contains_key(host) {
            return;
        }
        let task = tokio::spawn(fill_host(
            self.world.clone(),
            host.clone(),
            self.origin,
            self.pause,
        ));
        active.insert(host.clone(), task.abort_handle());
        debug!(%host, "filler started");
    }

    /// Abort the filler on `host`. Returns whether one was running.
    pub fn stop(&self, host: &HostId) -> bool {
        match self.active().remove(host) {
            Some(handle) => {
                handle.abort();
                debug!(%host, "filler stopped");
                true
            }
            None => false,
        }
    }

    /// Abort every filler and return the hosts that had one.
    pub fn stop_all(&self) -> Vec<HostId> {
        let mut active = self.active();
        let mut hosts = Vec::with_capacity(active.len());
        for (host, handle) in active.drain() {
            handle.abort();
            hosts.push(host);
        }
        hosts.sort();
        hosts
    }
}

async fn fill_host<W: Oracle + Exec>(
    world: Arc<W>,
    host: HostId,
    origin: Origin,
    pause: Duration,
) {
    loop {
        let per_thread = world.ram_cost(OpKind::Share);
        let threads = (world.host_free_ram(&host) / per_thread).floor() as u32;
        if threads == 0 {
            tokio::time::sleep(pause).await;
            continue;
        }
        let spec = LaunchSpec {
            host: host.clone(),
            op: OpKind::Share,
            target: None,
            threads,
            extra_delay: Duration::ZERO,
            origin,
        };
        match world.launch(spec) {
            Ok(handle) => {
                // Aborting the controller detaches the slice; the slice
                // itself is killed separately when the host is handed out.
                let _ = handle.await;
            }
            Err(e) => {
                debug!(%host, error = %e, "filler launch failed");
                tokio::time::sleep(pause).await;
            }
        }
    }
}
