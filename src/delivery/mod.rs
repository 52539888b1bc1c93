pub mod listeners;
pub mod wrapper;

pub use listeners::{EventListener, ListenerRegistry};
pub use wrapper::{DeliveryEvent, QueuedDeliveryWrapper, SlowConsumerListener, WrapperConfig};
