//! Read and write pumps for the WebSocket transport.

pub(crate) mod read;
pub(crate) mod write;
