//! Basic Usage Example
//!
//! Demonstrates:
//! - Opening a store
//! - Writing and reading keys
//! - Walking a key's version history
//! - Streaming a key range
//!
//! Run with: cargo run --example basic_usage

use bplus::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("bplus=debug,bplus_lmdb=debug")
        .init();

    println!("=== Basic Usage Example ===\n");

    let temp_dir = tempfile::tempdir()?;
    let store: Store = Store::new();
    store.open(temp_dir.path().join("data"))?;

    // Writes
    store.set("account:1", "1000")?.await?;
    store.set("account:2", "2000")?.await?;
    store.set("account:1", "900")?.await?;
    store
        .bulk_set(vec![("config:version", "1.0.0"), ("config:mode", "fast")])?
        .await?;
    println!("✓ Wrote 5 values\n");

    // Reads and history
    let current = store.get_with_ref("account:1")?.await?;
    println!("account:1 = {:?}", current.value);
    let previous = store.get_previous(current.reference)?.await?;
    println!("account:1 before = {:?}\n", previous.value);

    // Range scan
    println!("Accounts:");
    let mut accounts = store.get_range("account:", "account;")?;
    while let Some(event) = accounts.next_event().await {
        match event {
            RangeEvent::Record(record) => println!("  {:?} => {:?}", record.key, record.value),
            RangeEvent::End => println!("  (end)\n"),
            RangeEvent::Error(e) => return Err(e),
        }
    }

    let reclaimed = store.compact()?.await?;
    println!("✓ Compaction reclaimed {} versions", reclaimed);

    store.close()?;
    Ok(())
}
