use chocodex_indexer::{api, AppState, SqliteLedgerStore, Storage};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

pub async fn handle_serve(db_path: &Path, listen: SocketAddr) -> anyhow::Result<()> {
    let storage = Arc::new(Storage::new(db_path).await?);
    let store = Arc::new(SqliteLedgerStore::new(storage));
    let state = Arc::new(AppState::new(store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!("Serving read API on http://{}", listen);
    println!("Press Ctrl-C to stop.");
    api::serve(listen, state, shutdown_rx).await?;

    println!("Shut down cleanly.");
    Ok(())
}
