pub mod backoff;
pub mod connection;
pub mod status;

pub use backoff::{Backoff, ReconnectPolicy};
pub use connection::ConnectionState;
pub use status::{StatusBoard, StatusChange};
