//! Presence detection from BLE advertisements.
//!
//! Comet Blue thermostats advertise every few seconds while their radio is up.
//! Watching those advertisements tells us whether a device is in range without
//! connecting to it, which would cost battery.

use anyhow::anyhow;
use bluest::{Adapter, AdvertisingDevice};
use futures_util::StreamExt;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace};

use crate::availability::PresenceTracker;

/// Feeds a [`PresenceTracker`] from the default Bluetooth adapter.
pub struct BlePresenceScanner {
    adapter: Adapter,
    tracker: PresenceTracker,
}

impl BlePresenceScanner {
    /// Open the default adapter, waiting for it to become available.
    pub async fn new(tracker: PresenceTracker) -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        Ok(Self { adapter, tracker })
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// Record every advertisement seen until the adapter stops scanning.
    ///
    /// Only returns on error; run it on its own task.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut advertisements = self.adapter.scan(&[]).await?;
        info!("Scanning for advertisements");

        while let Some(advertisement) = advertisements.next().await {
            self.record(&advertisement);
        }

        Err(anyhow!("Advertisement stream ended"))
    }

    /// Scan until `address` advertises, giving up after `wait`.
    pub async fn wait_for(&self, address: &str, wait: Duration) -> anyhow::Result<()> {
        let mut advertisements = self.adapter.scan(&[]).await?;

        let found = timeout(wait, async {
            while let Some(advertisement) = advertisements.next().await {
                if self.record(&advertisement).eq_ignore_ascii_case(address.trim()) {
                    return true;
                }
            }
            false
        })
        .await
        .map_err(|_| anyhow!("Device {address} not found"))?;

        if found {
            Ok(())
        } else {
            Err(anyhow!("Advertisement stream ended before {address} was seen"))
        }
    }

    fn record(&self, advertisement: &AdvertisingDevice) -> String {
        let address = advertisement.device.id().to_string();
        trace!(address = %address, rssi = ?advertisement.rssi, "Advertisement");
        if self.tracker.last_seen(&address).is_none() {
            debug!(address = %address, "New device in range");
        }
        self.tracker.record(&address);
        address
    }
}
