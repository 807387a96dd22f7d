//! The Move Queue and Dispatcher: a bounded channel of move tokens feeding
//! a fixed pool of workers through a channel-of-channels — each worker
//! publishes its own inbox to a "ready workers" channel whenever it is
//! idle, so the dispatcher never has to guess which worker is free.

use tokio::sync::{mpsc, watch};

use crate::model::MoveId;

/// Default bound on the Move Queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default worker pool size.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// One unit of dispatchable work: the move to process and the RPC method to
/// call the owning bot with.
#[derive(Debug, Clone)]
pub struct MoveToken {
    pub move_id: MoveId,
    pub rpc_method: String,
}

/// The sending half of the Move Queue, cloned freely across the worker
/// pipeline (Registration Coordinator, Boot Reconciler, and workers
/// themselves for the UNDECIDED re-queue branch).
#[derive(Clone)]
pub struct MoveQueueSender {
    inner: mpsc::Sender<MoveToken>,
}

impl MoveQueueSender {
    /// Enqueues a token, waiting for room if the queue is full
    /// (backpressure).
    pub async fn enqueue(&self, token: MoveToken) -> Result<(), MoveToken> {
        self.inner.send(token).await.map_err(|e| e.0)
    }
}

/// Owns the worker pool's shared plumbing: the move queue itself and the
/// ready-workers channel each worker re-registers on when idle. Does not
/// own the workers' business logic — see [`crate::worker`].
pub struct Dispatcher {
    move_tx: MoveQueueSender,
    shutdown_tx: watch::Sender<bool>,
}

/// Handle given to each worker task: its own inbox plus a sender clone of
/// that same inbox (so the worker can publish itself to the ready-workers
/// channel every time it goes idle), and the shutdown signal.
pub struct WorkerHandle {
    pub inbox_rx: mpsc::Receiver<MoveToken>,
    pub inbox_tx: mpsc::Sender<MoveToken>,
    pub ready_tx: mpsc::Sender<mpsc::Sender<MoveToken>>,
    pub shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Builds the queue, the ready-workers channel, and `pool_size` worker
    /// handles, then spawns the dispatch loop itself. Callers spawn one
    /// worker task per returned [`WorkerHandle`].
    pub fn new(queue_capacity: usize, pool_size: usize) -> (Self, Vec<WorkerHandle>) {
        let (move_tx, move_rx) = mpsc::channel::<MoveToken>(queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<mpsc::Sender<MoveToken>>(pool_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let (inbox_tx, inbox_rx) = mpsc::channel::<MoveToken>(1);
            handles.push(WorkerHandle {
                inbox_rx,
                inbox_tx,
                ready_tx: ready_tx.clone(),
                shutdown: shutdown_rx.clone(),
            });
        }

        tokio::spawn(dispatch_loop(move_rx, ready_rx));

        (
            Dispatcher {
                move_tx: MoveQueueSender { inner: move_tx },
                shutdown_tx,
            },
            handles,
        )
    }

    pub fn sender(&self) -> MoveQueueSender {
        self.move_tx.clone()
    }

    /// Signals every worker to stop accepting new tokens once their
    /// current move (if any) completes.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn dispatch_loop(
    mut move_rx: mpsc::Receiver<MoveToken>,
    mut ready_rx: mpsc::Receiver<mpsc::Sender<MoveToken>>,
) {
    loop {
        let Some(token) = move_rx.recv().await else {
            tracing::info!("move queue closed, dispatcher exiting");
            return;
        };
        let Some(worker_inbox) = ready_rx.recv().await else {
            tracing::warn!("no ready workers remain, dropping move token");
            return;
        };
        if worker_inbox.send(token).await.is_err() {
            tracing::warn!("ready worker's inbox closed before token delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_reaches_the_worker_that_registered_as_ready() {
        let (dispatcher, mut handles) = Dispatcher::new(DEFAULT_QUEUE_CAPACITY, 2);
        let mut first = handles.remove(0);
        let mut second = handles.remove(0);

        first.ready_tx.send(first.inbox_tx.clone()).await.unwrap();

        dispatcher
            .sender()
            .enqueue(MoveToken { move_id: MoveId(1), rpc_method: "Stub.NextMove".into() })
            .await
            .unwrap();

        let received = first.inbox_rx.recv().await.unwrap();
        assert_eq!(received.move_id, MoveId(1));

        // The second worker never registered as ready, so nothing should
        // have been routed to it.
        let nothing = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            second.inbox_rx.recv(),
        )
        .await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn second_token_waits_for_a_worker_to_re_register() {
        let (dispatcher, mut handles) = Dispatcher::new(DEFAULT_QUEUE_CAPACITY, 1);
        let mut worker = handles.remove(0);
        worker.ready_tx.send(worker.inbox_tx.clone()).await.unwrap();

        let sender = dispatcher.sender();
        sender
            .enqueue(MoveToken { move_id: MoveId(1), rpc_method: "Stub.NextMove".into() })
            .await
            .unwrap();
        sender
            .enqueue(MoveToken { move_id: MoveId(2), rpc_method: "Stub.NextMove".into() })
            .await
            .unwrap();

        let first = worker.inbox_rx.recv().await.unwrap();
        assert_eq!(first.move_id, MoveId(1));

        // No second ready-registration yet: the next token must not have
        // been delivered.
        let not_yet = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            worker.inbox_rx.recv(),
        )
        .await;
        assert!(not_yet.is_err());

        worker.ready_tx.send(worker.inbox_tx.clone()).await.unwrap();
        let second = worker.inbox_rx.recv().await.unwrap();
        assert_eq!(second.move_id, MoveId(2));
    }
}
