//! WebSocket Gateway
//!
//! Connection lifecycle, room membership, throttling, and event routing
//! for the realtime delivery layer.

pub mod events;
pub mod handler;
pub mod registry;
pub mod router;
pub mod throttle;

pub use events::{ClientEvent, EventAck, Outbound, ServerEvent};
pub use registry::{ConnectionRegistry, LiveConnection};
pub use router::{EventContext, EventRouter};
pub use throttle::{ThrottleMap, ThrottleSettings};
