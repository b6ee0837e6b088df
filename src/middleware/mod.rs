pub mod logging;

pub use logging::ConnectionLogging;
