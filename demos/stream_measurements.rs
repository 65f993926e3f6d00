//! Measurement streaming example
//!
//! Scans for the first BRIC5 probe, syncs its clock once services are up,
//! and prints every assembled measurement until the probe disconnects.
//!
//! Run with: cargo run --example stream_measurements
//!
//! To match a different name prefix:
//!   cargo run --example stream_measurements -- --prefix BRIC5_12

use bric5_ble::{BricClient, ClientConfig, ClientEvent, Result, SessionState};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,bric5_ble=debug")
        .init();

    println!("BRIC5 Measurement Stream");
    println!("========================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let prefix = args
        .iter()
        .position(|arg| arg == "--prefix")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let mut config = ClientConfig::default().with_scan_timeout(Duration::from_secs(10));
    if let Some(prefix) = prefix {
        config = config.with_name_prefix(prefix);
    }

    println!("Looking for devices named {}*...\n", config.name_prefix);

    let client = BricClient::new(config).await?;
    let mut events = client.subscribe();

    client.start_scan().await?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    ClientEvent::StateChanged(state) => {
                        println!("[state] {}", state);
                        match state {
                            SessionState::Idle => {
                                println!("No probe found.");
                                break;
                            }
                            SessionState::Streaming => {
                                println!("Syncing device time");
                                if let Err(e) = client.sync_device_time().await {
                                    println!("Time sync failed: {}", e);
                                }
                            }
                            _ => {}
                        }
                    }
                    ClientEvent::Connected => println!("Connected"),
                    ClientEvent::Measurement(measurement) => {
                        println!("{}", measurement);
                        println!("  recorded at {}", measurement.primary.timestamp);
                        for pair in measurement.errors.pairs() {
                            if pair.code != 0 {
                                println!(
                                    "  error {}: {:.3} {:.3}",
                                    pair.code, pair.data1, pair.data2
                                );
                            }
                        }
                    }
                    ClientEvent::Info(message) => println!("[info] {}", message),
                    ClientEvent::Disconnected => {
                        println!("Probe disconnected.");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted.");
                break;
            }
        }
    }

    client.shutdown().await?;
    Ok(())
}
