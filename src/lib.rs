pub mod config;
pub mod delivery;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;
pub mod supervision;

pub use config::AppConfig;
pub use delivery::{
    DeliveryEvent, EventListener, QueuedDeliveryWrapper, SlowConsumerListener, WrapperConfig,
};
pub use diagnostics::{ChannelDepth, DiagnosticsSnapshot};
pub use domain::{
    EntityKind, EquipmentEntity, ProcessEntity, SubEquipmentEntity, Supervised, SupervisionEvent,
    SupervisionStatus,
};
pub use error::{Result, WardenError};
pub use registry::{AliveTimer, CommFaultBinding, EntityRegistry};
pub use service::Warden;
pub use session::{
    ConnectionListener, ConnectionState, MemoryTransport, SessionManager, Transport, WsTransport,
};
pub use supervision::{
    AliveTimerScanner, ConfigurationProvider, SupervisionManager, SupervisionNotifier,
    SupervisionPropagator, TagCacheListener,
};
