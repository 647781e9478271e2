pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteStore;
pub use protocol::{Request, Response};
pub use server::{ServedStore, process_connection, serve};

// Re-export Bytes for convenience
pub use bytes::Bytes;
