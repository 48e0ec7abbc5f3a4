//! Example: Several callers writing through one pooled connection
//!
//! Run with: cargo run --example pooled_write
//!
//! This example demonstrates:
//! - Getting clients for the same PLC from a shared pool
//! - Writing words and bits, awaiting each reply
//! - Classifying the completed exchange
//! - Releasing a caller's references

use omron_fins_link::{
    CallerId, ConnectionOptions, ConnectionPool, Endpoint, NodeAddress, Outcome, RequestOptions,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> omron_fins_link::Result<()> {
    // =========================================================================
    // Shared connection
    // =========================================================================

    let pool = ConnectionPool::new();
    let endpoint = Endpoint::with_default_port("192.168.1.250");
    let options = ConnectionOptions::default()
        .with_source(NodeAddress::new(0, 1, 0))
        .with_destination(NodeAddress::new(0, 250, 0))
        .with_timeout(Duration::from_millis(1500));

    // Both callers end up on the same transport
    let recipe = pool.get("recipe-writer", endpoint.clone(), options.clone())?;
    let alarms = pool.get("alarm-ack", endpoint, options)?;
    println!("shared connection: {}", recipe.shares_connection_with(&alarms));

    // =========================================================================
    // Writing words
    // =========================================================================

    let (opts, reply) = RequestOptions::new().reply_channel();
    let sid = recipe.write(
        "D100",
        vec![1200u16, 850, 42],
        opts,
        Some(serde_json::json!({"recipe": "A7"})),
    )?;
    println!("queued write as SID {sid}");

    match reply.await {
        Ok(exchange) => match exchange.outcome() {
            Outcome::Success(response) => println!(
                "D100 written in {:?} ({})",
                exchange.time_taken.unwrap_or_default(),
                response.end_code_description
            ),
            other => println!("write failed: {}", other.status_text()),
        },
        Err(_) => println!("write was never accepted"),
    }

    // =========================================================================
    // Writing a bit with a callback
    // =========================================================================

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let opts = RequestOptions::new().with_callback(move |exchange| {
        let _ = done_tx.send(exchange.outcome().status_text());
    });
    alarms.write("W10.03", true, opts, None)?;
    println!("alarm ack: {}", done_rx.await.unwrap_or_else(|_| "dropped".into()));

    // =========================================================================
    // Cleanup
    // =========================================================================

    pool.release(&CallerId::from("recipe-writer"));
    pool.release(&CallerId::from("alarm-ack"));
    println!("stats: {:?}", alarms.stats());

    Ok(())
}
