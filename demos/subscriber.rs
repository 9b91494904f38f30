//! Sample consumer
//!
//! Connects a SUB socket to the hub's egress endpoint, subscribes to a
//! topic prefix (everything by default) and prints what arrives.
//!
//! Run with: cargo run --example subscriber -- [topic-prefix] [endpoint]

use std::time::Duration;

use zmqhub::socket::{Context, SocketOptions, SocketType};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(zmqhub::logging::env_filter("info"))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let prefix = args.get(1).cloned().unwrap_or_default();
    let endpoint = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "tcp://127.0.0.1:5552".into());

    let ctx = Context::new();
    let mut socket = ctx
        .connect(SocketType::Sub, &endpoint, &SocketOptions::default())
        .await?;
    socket.subscribe(prefix.clone()).await?;
    println!(
        "SUB connected to {}, topic='{}'",
        endpoint,
        if prefix.is_empty() { "*" } else { &prefix }
    );

    loop {
        let frames = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frames = socket.recv() => frames?,
        };
        let text: Vec<_> = frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        println!("RECV {:?}", text);
    }

    socket.close(Duration::ZERO).await;
    ctx.terminate(Duration::from_secs(1)).await;
    Ok(())
}
