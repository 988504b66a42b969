use std::time::Duration;

use cometread::{BlePresenceScanner, PresenceTracker};

/// Report every five seconds whether the thermostat given on the command line is in range.
#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    cometread::logging::init(cometread::logging::DEFAULT_DIRECTIVE)?;
    let address = std::env::args().nth(1).unwrap_or_else(|| "E0:E5:CF:00:00:01".to_string());

    let scanner = BlePresenceScanner::new(PresenceTracker::default()).await?;
    match scanner.wait_for(&address, Duration::from_secs(30)).await {
        Ok(()) => println!("{address} found"),
        Err(err) => println!("{err}, watching anyway"),
    }

    let tracker = scanner.tracker().clone();
    tokio::spawn(async move {
        if let Err(err) = scanner.run().await {
            tracing::error!("Scanner stopped: {err}");
        }
    });

    loop {
        println!("{address} present: {}", tracker.is_present(&address));
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
