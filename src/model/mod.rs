pub mod client;
pub mod connector;
pub mod protocol;

pub use client::{ModelClient, ModelEvent, ModelEventSink, ModelSessionOptions};
pub use connector::{ModelConnector, WebSocketConnector};
