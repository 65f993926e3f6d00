//! Device control example
//!
//! Connects to the first BRIC5 probe and writes a raw command to its
//! device control characteristic.
//!
//! Run with: cargo run --example send_command -- 01 02 0A

use bric5_ble::{BricClient, ClientConfig, ClientEvent, Error, Result, SessionState};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,bric5_ble=info")
        .init();

    let command: Vec<u8> = std::env::args()
        .skip(1)
        .filter_map(|arg| u8::from_str_radix(&arg, 16).ok())
        .collect();

    if command.is_empty() {
        println!("Usage: send_command <hex byte>...");
        return Ok(());
    }

    println!("Command: {:02X?}\n", command);

    let client = BricClient::new(ClientConfig::default()).await?;
    let mut events = client.subscribe();

    client.start_scan().await?;

    // The control service is resolved alongside the measurement service
    let connected = tokio::time::timeout(Duration::from_secs(30), async {
        while let Ok(event) = events.recv().await {
            if event == ClientEvent::StateChanged(SessionState::Streaming) {
                return true;
            }
            if let ClientEvent::Info(message) = event {
                println!("[info] {}", message);
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !connected {
        client.shutdown().await?;
        return Err(Error::DeviceNotFound {
            identifier: "BRIC5_*".to_string(),
        });
    }

    match client.send_command(&command).await {
        Ok(()) => println!("Command sent."),
        Err(e) => println!("Command failed: {}", e),
    }

    client.disconnect().await?;
    client.shutdown().await?;
    Ok(())
}
