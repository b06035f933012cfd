//! Bounded worker pool for fire-and-forget event fan-out.
//!
//! Callers that do not need to wait for listener completion post jobs here
//! instead of awaiting a full dispatch. The pool is bounded (posting applies
//! backpressure) and must be drained on shutdown so no notification is lost
//! when the framework exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::event::error::EventError;
use crate::framework::constants::{EVENT_POOL_CAPACITY, EVENT_POOL_WORKERS};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cloneable handle to the shared worker pool. Workers are spawned lazily on
/// the first submission so construction does not require a runtime.
#[derive(Clone)]
pub struct EventWorkers {
    inner: Arc<Mutex<PoolState>>,
}

struct PoolState {
    tx: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl EventWorkers {
    pub fn new() -> Self {
        EventWorkers {
            inner: Arc::new(Mutex::new(PoolState {
                tx: None,
                handles: Vec::new(),
                shut_down: false,
            })),
        }
    }

    /// Queue a job for execution on the pool. Blocks (asynchronously) when
    /// the queue is full; fails once the pool has been shut down.
    pub async fn submit(
        &self,
        job: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), EventError> {
        let tx = {
            let mut state = self.inner.lock().await;
            if state.shut_down {
                return Err(EventError::WorkersClosed);
            }
            if state.tx.is_none() {
                state.start();
            }
            state.tx.as_ref().expect("pool just started").clone()
        };
        tx.send(Box::pin(job))
            .await
            .map_err(|_| EventError::WorkersClosed)
    }

    /// Drain the pool: stop accepting work, run everything already queued,
    /// and join the worker tasks.
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.inner.lock().await;
            state.shut_down = true;
            state.tx.take();
            std::mem::take(&mut state.handles)
        };
        for handle in handles {
            if let Err(err) = handle.await {
                log::error!("Event worker task failed during shutdown: {}", err);
            }
        }
    }
}

impl PoolState {
    fn start(&mut self) {
        let (tx, rx) = mpsc::channel::<Job>(EVENT_POOL_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..EVENT_POOL_WORKERS {
            let rx = Arc::clone(&rx);
            self.handles.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
            }));
        }
        self.tx = Some(tx);
    }
}

impl Default for EventWorkers {
    fn default() -> Self {
        Self::new()
    }
}
