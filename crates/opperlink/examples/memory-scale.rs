//! Drive a `Scale` against the in-memory transport.
//!
//! ```sh
//! cargo run -p opperlink --example memory-scale
//! ```

use std::sync::Arc;
use std::time::Duration;

use opperlink::device::{Scale, DEFAULT_TRANSFER_UNIT};
use opperlink::transport::MemoryTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(
        MemoryTransport::new("OPPER-M1 demo").with_responder(|_line| vec!["ATT+ACK=0\r\n".into()]),
    );

    let scale = Scale::default();
    let stream = scale.stream();
    let mut weights = stream.weights();
    let mut stable = stream.stable_weights_over(3);

    scale.connect(transport.clone()).await?;
    println!(
        "connected: transfer unit {} (default {DEFAULT_TRANSFER_UNIT})",
        scale.transfer_unit()
    );

    // Readings arrive split across notifications.
    transport.notify(b"ATT+BAT=76,0\r\nATT+WG");
    transport.notify(b"T=118.2,0,1\r\n");
    for _ in 0..3 {
        transport.notify(b"ATT+WGT=120.5,1,1\r\n");
    }

    if let Some(weight) = weights.recv().await {
        println!("first weight: {weight} g");
    }
    if let Some(weight) = stable.recv().await {
        println!("stable weight: {weight} g");
    }
    let battery = *stream.battery().borrow();
    println!("battery: {battery:?}");

    scale.set_idle(5).await?;
    println!("idle minutes now {}", *stream.idle().borrow());

    tokio::time::sleep(Duration::from_millis(50)).await;
    for line in transport.written_lines() {
        println!("sent {line}");
    }

    scale.disconnect().await?;
    Ok(())
}
