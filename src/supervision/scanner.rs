//! Alive Timer Expiry Scanner
//!
//! Periodic sweep over the registered alive timers. An expired timer fires
//! exactly once: it is deactivated before the expiration handler runs and
//! stays inactive until the next accepted alive update reactivates it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::EntityRegistry;

use super::manager::SupervisionManager;

pub struct AliveTimerScanner {
    registry: EntityRegistry,
    manager: Arc<SupervisionManager>,
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AliveTimerScanner {
    pub fn new(
        registry: EntityRegistry,
        manager: Arc<SupervisionManager>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            manager,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting alive timer scanner, interval {:?}", self.interval);

        let registry = self.registry.clone();
        let manager = Arc::clone(&self.manager);
        let interval = self.interval;
        let running = Arc::clone(&self.running);
        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                Self::scan_once(&registry, &manager).await;
            }
            debug!("Alive timer scanner stopped");
        });
        *self.worker.lock().await = Some(handle);
    }

    async fn scan_once(registry: &EntityRegistry, manager: &SupervisionManager) {
        let now = chrono::Utc::now();
        for timer in registry.alive_timers.expired(now) {
            // Deactivate first so a slow handler cannot double-fire.
            if registry.alive_timers.deactivate(timer.id) {
                manager.on_alive_timer_expiration(timer.id).await;
            }
        }
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
        info!("Alive timer scanner stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
