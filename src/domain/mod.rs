pub mod entity;
pub mod event;
pub mod status;
pub mod tag;

pub use entity::*;
pub use event::*;
pub use status::*;
pub use tag::*;
