use chocodex_core::LedgerStore;
use chocodex_indexer::{EventProcessor, FileSource, SqliteLedgerStore, Storage};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

pub async fn handle_ingest(db_path: &Path, feed: &Path) -> anyhow::Result<()> {
    let storage = Arc::new(Storage::new(db_path).await?);
    let store = Arc::new(SqliteLedgerStore::new(storage));
    let processor = EventProcessor::new(store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!("Ingesting events from {}...", feed.display());
    let mut source = FileSource::open(feed).await?;
    let applied = processor.run(&mut source, shutdown_rx).await?;

    match store.cursor().await? {
        Some(cursor) => println!(
            "Applied {} events; cursor at slot {} tx {} log {}",
            applied, cursor.slot, cursor.tx_index, cursor.log_index
        ),
        None => println!("Applied {} events; feed was empty", applied),
    }
    Ok(())
}
