pub mod error;
pub mod messages;


pub use error::{KrpcError, Result, RpcErrorDetails};
