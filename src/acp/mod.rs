//! Agent stdio wire layer.
//!
//! Newline-delimited JSON-RPC 2.0 over a duplex byte stream:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a line cap.
//! - `messages`: request/response/notification envelopes.
//! - `reader`: inbound line framing task and line classification.
//! - `writer`: shared, lock-serialised outbound writer.
//! - `transport`: the stream pair bound into the protocol client.

pub mod codec;
pub mod messages;
pub mod reader;
pub mod transport;
pub mod writer;

pub use transport::Transport;
