//! Set a rich presence activity, print pushed events for a while, then clear it.
//!
//! Run with a Discord desktop client running:
//!   DIPC_CLIENT_ID=<application id> cargo run --example set-activity

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dipc::client::{
    connect_with_config, ClientConfig, ClientError, Event, EventHandler, ReadyEvent,
    EVT_ACTIVITY_JOIN,
};
use dipc::transport::SystemLocator;
use serde_json::json;

struct Printer;

impl EventHandler for Printer {
    fn on_ready(&self, ready: &ReadyEvent) {
        eprintln!("[ready] user={:?}", ready.user);
    }

    fn on_event(&self, event: &Event) {
        eprintln!("[event] {:?} {}", event.evt, event.data);
    }

    fn on_disconnect(&self, reason: &ClientError) {
        eprintln!("[disconnected] {reason}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_id = std::env::var("DIPC_CLIENT_ID")?;
    let connection = connect_with_config(
        ClientConfig::new(client_id),
        &SystemLocator::new(),
        Some(Arc::new(Printer)),
    )?;
    eprintln!("connected via {:?}", connection.endpoint());

    let response = connection
        .set_activity(Some(json!({
            "state": "In a test",
            "details": "Testing dipc",
            "timestamps": {"start": 1_700_000_000},
        })))?
        .wait()?;
    eprintln!("[set-activity] {}", response["data"]);

    connection.subscribe(EVT_ACTIVITY_JOIN)?.wait()?;
    thread::sleep(Duration::from_secs(15));

    connection.set_activity(None)?.wait()?;
    connection.close();
    Ok(())
}
