//! Supervision core: state machine, event fan-out, expiry scanning and
//! quality propagation.

pub mod manager;
pub mod notifier;
pub mod propagator;
pub mod scanner;

pub use manager::{ConfigurationProvider, SupervisionManager};
pub use notifier::{ListenerDiagnostics, ListenerHandle, SupervisionNotifier};
pub use propagator::{SupervisionPropagator, TagCacheListener};
pub use scanner::AliveTimerScanner;
