//! kRPC Common Types and Transport
//!
//! This crate provides the protocol definitions, primitive wire encodings and
//! TCP transport shared by the kRPC client.
//!
//! # Overview
//!
//! kRPC exposes a game's scripting API as remote procedures. A client calls
//! them over one TCP connection and receives continuously updated results
//! ("streams") over a second one. Everything on the wire is protobuf:
//!
//! - **Protocol Layer**: Handshake, call, stream and reflection messages plus error types
//! - **Wire Layer**: Bare scalar encodings used for argument and result payloads
//! - **Transport Layer**: Varint-framed TCP connections with handshakes
//!
//! # Components
//!
//! - [`protocol`] - Protocol messages (re-exported as [`pb`]) and [`KrpcError`]
//! - [`wire`] - Varint, fixed-width and length-delimited scalar codecs
//! - [`transport`] - TCP transport and codec implementations
//!
//! # Example
//!
//! ```
//! use krpc_common::{pb, wire};
//!
//! let mut value = Vec::new();
//! wire::encode_int32(42, &mut value);
//!
//! let call = pb::ProcedureCall {
//!     service: "SpaceCenter".to_string(),
//!     procedure: "WarpTo".to_string(),
//!     arguments: vec![pb::Argument { position: 0, value }],
//!     ..Default::default()
//! };
//! assert_eq!(call.arguments[0].value, vec![0x2a]);
//! ```

pub mod protocol;
pub mod transport;
pub mod wire;

pub use protocol::messages as pb;
pub use protocol::{KrpcError, Result, RpcErrorDetails};
