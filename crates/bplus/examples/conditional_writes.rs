//! Conditional Writes Example
//!
//! Demonstrates:
//! - Inline update decisions on the calling thread
//! - Offloaded decisions answered while the worker waits
//! - Conditional removal
//! - Filtering a range on the consuming task
//!
//! Run with: cargo run --example conditional_writes

use bplus::prelude::*;

fn parse(bytes: &[u8]) -> u64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("bplus=info")
        .init();

    println!("=== Conditional Writes Example ===\n");

    let temp_dir = tempfile::tempdir()?;
    let store: Store = Store::new();
    store.open(temp_dir.path())?;

    store.set("counter", "10")?.await?;

    // Only move forward
    let monotonic = |previous: &[u8], current: &[u8]| parse(current) > parse(previous);

    store.update("counter", "12", monotonic)?;
    match store.update("counter", "11", monotonic) {
        Err(e) if e.status() == Some(Status::UPDATE_CONFLICT) => {
            println!("✓ Stale write to counter rejected")
        }
        other => println!("unexpected: {:?}", other),
    }

    store.update_async("counter", "20", monotonic)?.await?;
    println!("counter = {:?}\n", store.get("counter")?.await?);

    // Remove only when drained
    store.set("queue:a", "0")?.await?;
    store.set("queue:b", "3")?.await?;
    for key in ["queue:a", "queue:b"] {
        let result = store
            .remove_conditional_async(key, |value| parse(value) == 0)?
            .await;
        println!("remove {} -> {:?}", key, result.map_err(|e| e.to_string()));
    }
    println!();

    // Filter on the consumer
    let records = store
        .get_filtered_range_async("", "", |key| !key.starts_with(b"queue:"))?
        .collect_records()
        .await?;
    for record in records {
        println!("  {:?} => {:?}", record.key, record.value);
    }

    store.close()?;
    Ok(())
}
