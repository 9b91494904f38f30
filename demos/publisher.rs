//! Sample producer
//!
//! Connects a PUB socket to the hub's ingress endpoint and sends
//! `[topic, message]` once per second.
//!
//! Run with: cargo run --example publisher -- [topic] [message] [endpoint]

use std::time::Duration;

use bytes::Bytes;
use zmqhub::socket::{Context, SocketOptions, SocketType};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(zmqhub::logging::env_filter("info"))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let topic = args.get(1).cloned().unwrap_or_else(|| "demo".into());
    let message = args.get(2).cloned().unwrap_or_else(|| "hello".into());
    let endpoint = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| "tcp://127.0.0.1:5551".into());

    let ctx = Context::new();
    let socket = ctx
        .connect(SocketType::Pub, &endpoint, &SocketOptions::default())
        .await?;
    println!("PUB connected to {}", endpoint);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                socket
                    .send(vec![Bytes::from(topic.clone()), Bytes::from(message.clone())])
                    .await?;
                println!("PUB {} {}", topic, message);
            }
        }
    }

    socket.close(Duration::from_millis(100)).await;
    ctx.terminate(Duration::from_secs(1)).await;
    Ok(())
}
