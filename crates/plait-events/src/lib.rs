//! The session event pipeline: a scoped, typed publish/subscribe bus,
//! per-post streaming proxies, the blocking confirmation gate, and the
//! terminal-animation exclusivity handshake.

pub mod animation;
pub mod bus;
pub mod confirm;
pub mod event;
pub mod proxy;

pub use animation::AnimationGate;
pub use bus::{EventBus, EventError, EventHandler, HandlerId};
pub use confirm::{ConfirmationError, ConfirmationGate};
pub use event::{Event, Scope, SessionEvent};
pub use proxy::PostProxy;
