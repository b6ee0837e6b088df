pub mod bridge;
pub mod events;
pub mod registry;
pub mod session;

pub use bridge::{CallBridge, CallServices};
pub use events::{CallEventSink, FunctionExecutor, TracingEventSink, UnavailableFunctions};
pub use registry::CallRegistry;
