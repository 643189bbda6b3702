//! Real-time fan-out to connected viewers.

mod handler;
pub mod hub;

pub use handler::ws_handler;
pub use hub::{
    ConnectionId, DeliveryReport, Hub, HubConfig, Outbound, Registry, Subscription, Viewer,
};
