//! kRPC Transport Layer
//!
//! This module provides the TCP connections and codec used to talk to a kRPC
//! server.
//!
//! # Architecture
//!
//! A client holds two sockets to the same server:
//! - **RPC connection**: request/response procedure calls
//! - **Stream connection**: server-pushed stream updates
//! - **Wire Format**: `[uvarint length] + [protobuf message]`
//!
//! Both open with a handshake. The RPC handshake hands back a client
//! identifier which the stream handshake must present.
//!
//! # Components
//!
//! - **[`ProtobufCodec`]**: Encode/decode protocol messages, framed or bare
//! - **[`TcpTransport`]**: Connecting, framing and handshakes
//! - **[`RpcConnection`]** / **[`StreamConnection`]**: The two handshaken sockets
//!
//! # Message Size Limits
//!
//! Incoming messages larger than 100 MB are rejected before any buffer is
//! allocated for them.
//!
//! # Example
//!
//! ```no_run
//! use krpc_common::pb;
//! use krpc_common::transport::{RpcConnection, StreamConnection, TcpTransport};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpTransport::new();
//! let mut rpc = RpcConnection::open(&transport, "127.0.0.1:50000", "example").await?;
//! let _stream = StreamConnection::open(&transport, "127.0.0.1:50001", rpc.client_id()).await?;
//!
//! let call = pb::ProcedureCall {
//!     service: "KRPC".to_string(),
//!     procedure: "GetStatus".to_string(),
//!     ..Default::default()
//! };
//! let response = rpc.send_request(&pb::Request { calls: vec![call] }).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod tcp;

pub use codec::{ProtobufCodec, MAX_MESSAGE_SIZE};
pub use tcp::{RpcConnection, StreamConnection, TcpTransport, DEFAULT_CONNECT_TIMEOUT};

#[cfg(test)]
mod tests;
