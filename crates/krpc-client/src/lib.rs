//! kRPC Client
//!
//! Calls procedures on a kRPC server and subscribes to their results as
//! streams.
//!
//! # Overview
//!
//! The server describes its services at runtime, so this crate works with
//! dynamic [`Value`]s checked against [`TypeDescriptor`]s instead of
//! generated bindings:
//!
//! - **Types**: canonical descriptors interned in a [`TypeRegistry`], plus
//!   coercion between compatible values
//! - **Encoding**: values to argument/result bytes and back
//! - **Calls**: binding positional and keyword arguments to a
//!   [`ProcedureSignature`], then one request/response exchange
//! - **Streams**: deduplicated server-pushed results kept current by a
//!   background reader
//!
//! # Components
//!
//! - [`client`] - [`Client`], the entry point
//! - [`config`] - [`ClientConfig`] from code, JSON or the environment
//! - [`types`] / [`value`] / [`encoding`] - the type system and its codec
//! - [`procedure`] / [`catalog`] / [`builtin`] - procedure signatures and the
//!   reflected service catalog
//! - [`call`] / [`streaming`] - call execution and stream management
//!
//! # Example
//!
//! ```no_run
//! use krpc_client::{Arguments, Client, ClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::named("clock"));
//! client.connect().await?;
//! client.load_services().await?;
//!
//! let ut = client.open_stream("SpaceCenter", "get_UT", Arguments::new()).await?;
//! println!("universal time: {}", ut.get()?);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod call;
pub mod catalog;
pub mod client;
pub mod config;
pub mod encoding;
pub mod procedure;
pub mod streaming;
pub mod types;
pub mod value;

pub use call::{Arguments, CallExecutor};
pub use catalog::{ServiceCatalog, ServiceInfo};
pub use client::Client;
pub use config::ClientConfig;
pub use procedure::{MemberKind, ProcedureSignature};
pub use streaming::Stream;
pub use types::{TypeDescriptor, TypeKind, TypeRegistry};
pub use value::{ProtocolMessage, RemoteObject, Value};

pub use krpc_common::{pb, KrpcError, Result, RpcErrorDetails};
