//! Background refresher: periodic inventory polls with per-guest fan-out.
//!
//! One long-lived task per cache. Each pass lists the cluster's VM resources
//! and fires an independent fetch of every qemu guest's agent-reported
//! interfaces, bounded by a semaphore. Observed IPv4 addresses inside the
//! configured subnet overwrite the cache entry for that guest's canonical
//! name when they differ from the stored value.
//!
//! Failure policy is deliberately blunt: the cluster handle is resolved once
//! with no retry, and a failed resource list degrades the cache and ends the
//! loop for the remaining process lifetime. Only per-guest fetch failures are
//! tolerated (logged and skipped).

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::VmCache;
use crate::error::Error;
use crate::inventory::{AgentInterface, InventoryClient, VmResource};
use crate::metrics::{self, Timer};

/// Periodic poller that keeps a [`VmCache`] converged with the inventory.
pub struct Refresher {
    client: InventoryClient,
    cache: VmCache,
    subnet: Ipv4Net,
    poll_interval: Duration,
    fanout: Arc<Semaphore>,
}

impl Refresher {
    /// Create a refresher writing into the given cache handle.
    pub fn new(
        client: InventoryClient,
        cache: VmCache,
        subnet: Ipv4Net,
        poll_interval: Duration,
        fanout_limit: usize,
    ) -> Self {
        Self {
            client,
            cache,
            subnet,
            poll_interval,
            fanout: Arc::new(Semaphore::new(fanout_limit)),
        }
    }

    /// Start the refresh loop on the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until cancelled or fatally failed.
    ///
    /// A cluster-handle or resource-list failure marks the cache degraded and
    /// returns; there is no retry or backoff by policy.
    async fn run(self, shutdown: CancellationToken) {
        let cluster = match self.client.cluster().await {
            Ok(cluster) => cluster,
            Err(err) => {
                error!(%err, "unable to resolve inventory cluster");
                self.cache.mark_degraded();
                return;
            }
        };
        info!(cluster = %cluster.name, poll_interval = ?self.poll_interval, "guest refresher started");

        loop {
            let timer = Timer::start();
            match self.poll_once().await {
                Ok(machines) => {
                    metrics::record_refresh_pass(machines, timer.elapsed());
                    debug!(machines, "completed refresh pass");
                }
                Err(err) => {
                    error!(%err, "unable to list inventory guests");
                    self.cache.mark_degraded();
                    return;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("guest refresher stopped");
                    return;
                }
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// One pass over the resource list, fanning out a task per qemu guest.
    ///
    /// Returns the number of guests dispatched. Dispatched fetches are
    /// fire-and-forget; the semaphore only bounds how many run at once.
    pub async fn poll_once(&self) -> Result<usize, Error> {
        let resources = self.client.vm_resources().await?;

        let mut dispatched = 0;
        for resource in resources {
            if resource.kind != "qemu" {
                continue;
            }

            let Ok(permit) = self.fanout.clone().acquire_owned().await else {
                break;
            };
            let client = self.client.clone();
            let cache = self.cache.clone();
            let subnet = self.subnet;
            dispatched += 1;

            tokio::spawn(async move {
                let _permit = permit;
                refresh_machine(&client, &cache, subnet, &resource).await;
            });
        }

        Ok(dispatched)
    }
}

/// Fetch one guest's interfaces and fold eligible addresses into the cache.
///
/// Failures here never affect other guests or the degraded flag.
async fn refresh_machine(
    client: &InventoryClient,
    cache: &VmCache,
    subnet: Ipv4Net,
    resource: &VmResource,
) {
    let interfaces = match client.agent_interfaces(&resource.node, resource.vmid).await {
        Ok(interfaces) => interfaces,
        Err(err) => {
            warn!(vm = %resource.name, vmid = resource.vmid, %err, "unable to fetch guest interfaces");
            metrics::record_machine_fetch_failure();
            return;
        }
    };

    fold_interfaces(cache, subnet, &resource.name, &interfaces);
}

/// Fold eligible IPv4 addresses from an interface report into the cache.
fn fold_interfaces(cache: &VmCache, subnet: Ipv4Net, guest: &str, interfaces: &[AgentInterface]) {
    for interface in interfaces {
        for address in &interface.ip_addresses {
            if address.ip_address_type != "ipv4" {
                continue;
            }
            let Ok(ip) = address.ip_address.parse::<Ipv4Addr>() else {
                debug!(vm = %guest, addr = %address.ip_address, "skipping unparsable address");
                continue;
            };
            if !subnet.contains(&ip) {
                continue;
            }
            if cache.update(guest, ip) {
                info!(vm = %guest, %ip, "updated guest address");
                metrics::record_cache_update();
            }
        }
    }
}
