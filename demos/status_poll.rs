//! Example: Polling controller status while honouring backpressure
//!
//! Run with: cargo run --example status_poll
//!
//! This example demonstrates:
//! - Watching connection lifecycle events
//! - Issuing status reads on a fixed period
//! - Backing off with a `Throttle` after a `full` signal

use omron_fins_link::{
    Client, ConnectionEvent, ConnectionOptions, ConnectionPool, Endpoint, FinsError, RequestOptions,
    Throttle,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> omron_fins_link::Result<()> {
    let pool = ConnectionPool::new();
    let options = ConnectionOptions::default().with_max_queue(4);
    let client = pool.get("status-poll", Endpoint::with_default_port("192.168.1.250"), options)?;

    let mut events = client.subscribe();
    let mut throttle = Throttle::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    for round in 0..20u32 {
        tokio::select! {
            Ok(event) = events.recv() => {
                throttle.observe(&event);
                match event {
                    ConnectionEvent::Open(remote) => println!("open: {}", remote.endpoint),
                    ConnectionEvent::Close => println!("closed"),
                    ConnectionEvent::Error { error, .. } => println!("error: {error}"),
                    ConnectionEvent::Full => println!("queue full, backing off"),
                    ConnectionEvent::Initialised(_) => {}
                }
            }
            _ = ticker.tick() => {
                if let Some(left) = throttle.remaining() {
                    println!("round {round}: throttled for {left:?}");
                } else {
                    poll(&client, round, &mut throttle);
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn poll(client: &Client, round: u32, throttle: &mut Throttle) {
    let opts = RequestOptions::new().with_callback(|exchange| {
        println!("SID {}: {}", exchange.sid, exchange.outcome().status_text());
    });
    match client.status(opts, Some(serde_json::json!(round))) {
        Ok(sid) => println!("round {round}: status queued as SID {sid}"),
        Err(FinsError::QueueFull { .. }) => throttle.on_full(),
        Err(e) => println!("round {round}: {e}"),
    }
}
