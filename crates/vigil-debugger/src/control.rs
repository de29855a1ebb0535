//! The control plane thread.
//!
//! One OS thread runs a current-thread tokio runtime for its whole life. On
//! that single loop it serves protocol clients and drains the hit queue:
//! every wake-up takes all queued hits, writes them in one transaction and
//! broadcasts one `hit` message for the batch, after the write commits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use vigil_store::{PendingHit, Store, StoreOptions};

use crate::error::DebuggerError;
use crate::instrument::Instrumenter;
use crate::pipeline::QueueItem;
use crate::protocol::{HitEvent, ServerMessage};
use crate::server::{self, ServerState};

/// Broadcast messages a slow client may fall behind by before it starts
/// missing batches.
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct ControlConfig {
    pub(crate) store_dir: PathBuf,
    pub(crate) store_options: StoreOptions,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) password: Option<String>,
}

type Ready = SyncSender<Result<SocketAddr, DebuggerError>>;

/// Starts the control plane thread and waits until it is listening (or has
/// failed to start).
pub(crate) fn spawn(
    config: ControlConfig,
    instrumenter: Arc<dyn Instrumenter>,
    queue: mpsc::UnboundedReceiver<QueueItem>,
) -> Result<(JoinHandle<()>, SocketAddr), DebuggerError> {
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
    let thread = std::thread::Builder::new()
        .name("vigil-control".to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(DebuggerError::Io(err)));
                    return;
                }
            };
            runtime.block_on(run(config, instrumenter, queue, ready_tx));
        })?;

    match ready_rx.recv() {
        Ok(Ok(addr)) => Ok((thread, addr)),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => {
            let _ = thread.join();
            Err(DebuggerError::Startup(
                "control thread exited before it was ready".to_owned(),
            ))
        }
    }
}

async fn run(
    config: ControlConfig,
    instrumenter: Arc<dyn Instrumenter>,
    mut queue: mpsc::UnboundedReceiver<QueueItem>,
    ready: Ready,
) {
    let (store, listener) = match start(&config, instrumenter.as_ref()).await {
        Ok(started) => started,
        Err(err) => {
            tracing::error!(target: "vigil.control", error = %err, "control plane failed to start");
            let _ = ready.send(Err(err));
            return;
        }
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            let _ = ready.send(Err(DebuggerError::Io(err)));
            return;
        }
    };
    tracing::info!(
        target: "vigil.control",
        %addr,
        store = %store.path().display(),
        "control plane listening"
    );
    if ready.send(Ok(addr)).is_err() {
        return;
    }

    let store = Arc::new(store);
    let (hits_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ServerState {
        store: Arc::clone(&store),
        instrumenter,
        hits: hits_tx.clone(),
        password: config.password,
    });
    let server = tokio::spawn(server::serve(listener, state, shutdown_rx));

    drain(&store, &mut queue, &hits_tx).await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = server.await {
        tracing::error!(target: "vigil.control", error = %err, "protocol server task failed");
    }
    tracing::info!(target: "vigil.control", "control plane stopped");
}

async fn start(
    config: &ControlConfig,
    instrumenter: &dyn Instrumenter,
) -> Result<(Store, TcpListener), DebuggerError> {
    let store = Store::open(&config.store_dir, config.store_options)?;
    reinstrument(&store, instrumenter)?;
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    Ok((store, listener))
}

/// Arms every persisted breakpoint again. Locations that cannot be bound yet
/// are logged; the breakpoint stays stored, and a [`ProbeRegistry`] arms it
/// once its site runs.
///
/// [`ProbeRegistry`]: crate::ProbeRegistry
fn reinstrument(store: &Store, instrumenter: &dyn Instrumenter) -> Result<(), DebuggerError> {
    let breakpoints = store.list_breakpoints()?;
    let mut armed = 0usize;
    for bp in &breakpoints {
        match instrumenter.instrument(&bp.file, bp.line, bp.id) {
            Ok(()) => armed += 1,
            Err(err) => tracing::warn!(
                target: "vigil.control",
                breakpoint_id = bp.id,
                error = %err,
                "persisted breakpoint not armed yet"
            ),
        }
    }
    tracing::info!(
        target: "vigil.control",
        total = breakpoints.len(),
        armed,
        "re-instrumented persisted breakpoints"
    );
    Ok(())
}

/// Runs until the shutdown sentinel has been seen (or every sender is gone).
/// Hits queued behind the sentinel in the same wake-up are still written.
pub(crate) async fn drain(
    store: &Store,
    queue: &mut mpsc::UnboundedReceiver<QueueItem>,
    hits: &broadcast::Sender<Arc<str>>,
) {
    let mut stopping = false;
    while !stopping {
        let Some(first) = queue.recv().await else {
            break;
        };
        let mut batch = Vec::new();
        take(first, &mut batch, &mut stopping);
        while let Ok(item) = queue.try_recv() {
            take(item, &mut batch, &mut stopping);
        }
        if !batch.is_empty() {
            flush(store, batch, hits);
        }
    }
}

fn take(item: QueueItem, batch: &mut Vec<PendingHit>, stopping: &mut bool) {
    match item {
        QueueItem::Hit(hit) => batch.push(hit),
        QueueItem::Shutdown => *stopping = true,
    }
}

fn flush(store: &Store, batch: Vec<PendingHit>, hits: &broadcast::Sender<Arc<str>>) {
    let ids = match store.log_hits_batch(&batch) {
        Ok(ids) => ids,
        Err(err) => {
            tracing::error!(
                target: "vigil.control",
                dropped = batch.len(),
                error = %err,
                "failed to persist hit batch; dropping it"
            );
            return;
        }
    };
    tracing::debug!(target: "vigil.control", count = ids.len(), "persisted hit batch");

    let events = ids
        .into_iter()
        .zip(batch)
        .map(|(id, hit)| HitEvent {
            id,
            breakpoint_id: hit.breakpoint_id,
            values: hit.values,
        })
        .collect();
    let message: Arc<str> = ServerMessage::Hit { hits: events }.to_json().into();
    // An error only means no client is connected.
    let _ = hits.send(message);
}
