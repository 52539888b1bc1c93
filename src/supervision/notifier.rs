//! Supervision Notifier
//!
//! Fan-out of supervision events with per-listener isolation: every listener
//! gets its own queue and worker task, so a slow or failing listener never
//! delays the others.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::delivery::EventListener;
use crate::domain::SupervisionEvent;

/// Identifies one registered listener pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

struct ListenerWorker {
    handle: ListenerHandle,
    tx: mpsc::UnboundedSender<SupervisionEvent>,
    depth: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

/// Queue depth and worker liveness for one listener pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ListenerDiagnostics {
    pub listener_id: u64,
    pub queue_depth: usize,
    pub worker_alive: bool,
}

#[derive(Default)]
pub struct SupervisionNotifier {
    workers: RwLock<Vec<ListenerWorker>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl SupervisionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dedicated pipeline for the listener and return its handle.
    pub async fn register_listener(
        &self,
        listener: Arc<dyn EventListener<SupervisionEvent>>,
    ) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = mpsc::unbounded_channel::<SupervisionEvent>();
        let depth = Arc::new(AtomicUsize::new(0));

        let worker_depth = Arc::clone(&depth);
        let id = handle.0;
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker_depth.fetch_sub(1, Ordering::SeqCst);
                if let Err(e) = listener.on_event(&event).await {
                    // The listener stays registered; only this delivery is lost.
                    warn!("Supervision listener {} failed: {}", id, e);
                }
            }
            debug!("Supervision listener {} worker finished", id);
        });

        self.workers.write().await.push(ListenerWorker {
            handle,
            tx,
            depth,
            worker,
        });
        handle
    }

    /// Tear down one listener pipeline. The worker drains what is already
    /// queued, then finishes.
    pub async fn unregister_listener(&self, handle: ListenerHandle) {
        let mut workers = self.workers.write().await;
        if let Some(pos) = workers.iter().position(|w| w.handle == handle) {
            let worker = workers.remove(pos);
            drop(worker.tx);
        }
    }

    /// Enqueue one event per registered listener.
    pub async fn notify(&self, event: &SupervisionEvent) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let workers = self.workers.read().await;
        for worker in workers.iter() {
            worker.depth.fetch_add(1, Ordering::SeqCst);
            if worker.tx.send(event.clone()).is_err() {
                worker.depth.fetch_sub(1, Ordering::SeqCst);
                debug!("Supervision listener {} queue closed", worker.handle.0);
            }
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn diagnostics(&self) -> Vec<ListenerDiagnostics> {
        self.workers
            .read()
            .await
            .iter()
            .map(|w| ListenerDiagnostics {
                listener_id: w.handle.0,
                queue_depth: w.depth.load(Ordering::SeqCst),
                worker_alive: !w.worker.is_finished(),
            })
            .collect()
    }

    /// Close every queue and wait for the workers to drain.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let workers = std::mem::take(&mut *self.workers.write().await);
        for worker in workers {
            drop(worker.tx);
            if let Err(e) = worker.worker.await {
                if !e.is_cancelled() {
                    warn!("Supervision listener worker panicked: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, SupervisionStatus};
    use crate::error::{Result, WardenError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    fn event(name: &str) -> SupervisionEvent {
        SupervisionEvent::new(
            EntityKind::Process,
            1,
            name,
            SupervisionStatus::Down,
            Utc::now(),
            "test",
        )
    }

    struct Recorder {
        seen: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl EventListener<SupervisionEvent> for Recorder {
        async fn on_event(&self, event: &SupervisionEvent) -> Result<()> {
            self.seen.lock().await.push(event.entity_name.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventListener<SupervisionEvent> for Failing {
        async fn on_event(&self, _event: &SupervisionEvent) -> Result<()> {
            Err(WardenError::Listener("deliberate".to_string()))
        }
    }

    #[tokio::test]
    async fn test_delivers_to_all_listeners() {
        let notifier = SupervisionNotifier::new();
        let a = Arc::new(Recorder {
            seen: AsyncMutex::new(Vec::new()),
        });
        let b = Arc::new(Recorder {
            seen: AsyncMutex::new(Vec::new()),
        });
        notifier
            .register_listener(a.clone() as Arc<dyn EventListener<SupervisionEvent>>)
            .await;
        notifier
            .register_listener(b.clone() as Arc<dyn EventListener<SupervisionEvent>>)
            .await;

        notifier.notify(&event("P1")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(a.seen.lock().await.clone(), vec!["P1".to_string()]);
        assert_eq!(b.seen.lock().await.clone(), vec!["P1".to_string()]);
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_affect_others() {
        let notifier = SupervisionNotifier::new();
        let good = Arc::new(Recorder {
            seen: AsyncMutex::new(Vec::new()),
        });
        notifier
            .register_listener(Arc::new(Failing) as Arc<dyn EventListener<SupervisionEvent>>)
            .await;
        notifier
            .register_listener(good.clone() as Arc<dyn EventListener<SupervisionEvent>>)
            .await;

        notifier.notify(&event("P1")).await;
        notifier.notify(&event("P2")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The failing listener stays registered and the good one sees both.
        assert_eq!(notifier.listener_count().await, 2);
        assert_eq!(
            good.seen.lock().await.clone(),
            vec!["P1".to_string(), "P2".to_string()]
        );
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let notifier = SupervisionNotifier::new();
        let recorder = Arc::new(Recorder {
            seen: AsyncMutex::new(Vec::new()),
        });
        let handle = notifier
            .register_listener(recorder.clone() as Arc<dyn EventListener<SupervisionEvent>>)
            .await;

        notifier.notify(&event("P1")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        notifier.unregister_listener(handle).await;
        notifier.notify(&event("P2")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(recorder.seen.lock().await.clone(), vec!["P1".to_string()]);
    }

    #[tokio::test]
    async fn test_diagnostics_report_liveness() {
        let notifier = SupervisionNotifier::new();
        notifier
            .register_listener(Arc::new(Failing) as Arc<dyn EventListener<SupervisionEvent>>)
            .await;

        let diags = notifier.diagnostics().await;
        assert_eq!(diags.len(), 1);
        assert!(diags[0].worker_alive);
        assert_eq!(diags[0].queue_depth, 0);
        notifier.shutdown().await;
    }
}
