pub mod protocol;
pub mod session;
pub mod socket;

pub use socket::media_stream;
