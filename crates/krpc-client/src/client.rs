use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use krpc_common::transport::{RpcConnection, StreamConnection, TcpTransport};
use krpc_common::{pb, KrpcError, Result};

use crate::call::{Arguments, CallExecutor};
use crate::catalog::ServiceCatalog;
use crate::config::ClientConfig;
use crate::procedure::ProcedureSignature;
use crate::streaming::{Stream, StreamManager};
use crate::types::TypeRegistry;
use crate::value::{ProtocolMessage, Value};

/// kRPC client
///
/// Holds one RPC connection for calls and one stream connection for stream
/// updates. All methods take `&self`, so a client can be shared between
/// tasks behind an `Arc`; calls are sent one at a time.
///
/// # Example
///
/// ```no_run
/// use krpc_client::{Arguments, Client, ClientConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new(ClientConfig::named("autopilot"));
/// client.connect().await?;
/// client.load_services().await?;
///
/// let ut = client.invoke("SpaceCenter", "get_UT", Arguments::new()).await?;
/// println!("universal time: {}", ut);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
    transport: TcpTransport,
    executor: Arc<CallExecutor>,
    streams: StreamManager<CallExecutor>,
    catalog: RwLock<ServiceCatalog>,
    /// Serializes connect and close
    lifecycle: tokio::sync::Mutex<()>,
}

impl Client {
    /// Creates a disconnected client with its own type registry.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::new()))
    }

    /// Creates a disconnected client that interns types in `registry`.
    pub fn with_registry(config: ClientConfig, registry: Arc<TypeRegistry>) -> Self {
        let transport = TcpTransport::with_connect_timeout(config.connect_timeout());
        let call_timeout = config.call_timeout_ms.map(Duration::from_millis);
        let executor = Arc::new(CallExecutor::new(registry, call_timeout));
        let catalog = ServiceCatalog::with_builtins(executor.krpc());

        Self {
            config,
            transport,
            streams: StreamManager::new(Arc::clone(&executor)),
            executor,
            catalog: RwLock::new(catalog),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.executor.registry()
    }

    pub fn is_connected(&self) -> bool {
        self.executor.is_connected()
    }

    /// Opens the RPC connection, then the stream connection bound to it.
    ///
    /// # Errors
    ///
    /// `Connection` if the client is already connected, a socket cannot be
    /// opened or the server rejects a handshake. Nothing stays open on failure.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.executor.is_connected() {
            return Err(KrpcError::Connection("already connected".to_string()));
        }

        let rpc_addr = self.config.rpc_address();
        let rpc = RpcConnection::open(&self.transport, &rpc_addr, &self.config.name).await?;

        let stream_addr = self.config.stream_address();
        let stream =
            match StreamConnection::open(&self.transport, &stream_addr, rpc.client_id()).await {
                Ok(stream) => stream,
                Err(e) => {
                    rpc.shutdown().await;
                    return Err(e);
                }
            };

        self.executor.attach(rpc).await;
        self.streams.start_reader(stream).await;
        tracing::info!("Connected to kRPC server at {}", rpc_addr);
        Ok(())
    }

    /// Stops the stream reader, removes every stream and closes both
    /// connections.
    ///
    /// Returns `false` if there was nothing to close. Streams obtained from
    /// this client report `StreamRemoved` afterwards.
    pub async fn close(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let reader_stopped = self.streams.stop_reader().await;
        self.streams.remove_all().await;
        let detached = self.executor.detach().await;

        let closed = reader_stopped || detached;
        if closed {
            tracing::info!("Disconnected from kRPC server");
        }
        closed
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Looks up a procedure signature in the loaded catalog.
    pub fn describe(&self, service: &str, procedure: &str) -> Result<Arc<ProcedureSignature>> {
        self.catalog().describe(service, procedure)
    }

    /// Read access to the service catalog.
    pub fn catalog(&self) -> RwLockReadGuard<'_, ServiceCatalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls `service.procedure` with `args`.
    ///
    /// Returns [`Value::Null`] for procedures without a return value.
    pub async fn invoke(&self, service: &str, procedure: &str, args: Arguments) -> Result<Value> {
        let signature = self.describe(service, procedure)?;
        self.executor.invoke(&signature, &args).await
    }

    /// Fetches the server's services and adds them to the catalog.
    pub async fn load_services(&self) -> Result<()> {
        let services = self.get_services().await?;
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        catalog.load(&services, self.executor.registry())?;
        tracing::info!("Loaded {} services", services.services.len());
        Ok(())
    }

    pub async fn get_status(&self) -> Result<pb::Status> {
        match self.call_builtin(&self.executor.krpc().get_status).await? {
            Value::Message(ProtocolMessage::Status(status)) => Ok(status),
            other => Err(unexpected("GetStatus", &other)),
        }
    }

    pub async fn get_services(&self) -> Result<pb::Services> {
        match self.call_builtin(&self.executor.krpc().get_services).await? {
            Value::Message(ProtocolMessage::Services(services)) => Ok(services),
            other => Err(unexpected("GetServices", &other)),
        }
    }

    /// Identifier the server assigned to this client.
    pub async fn get_client_id(&self) -> Result<Vec<u8>> {
        match self.call_builtin(&self.executor.krpc().get_client_id).await? {
            Value::Bytes(id) => Ok(id),
            other => Err(unexpected("GetClientID", &other)),
        }
    }

    pub async fn get_client_name(&self) -> Result<String> {
        match self.call_builtin(&self.executor.krpc().get_client_name).await? {
            Value::String(name) => Ok(name),
            other => Err(unexpected("GetClientName", &other)),
        }
    }

    async fn call_builtin(&self, signature: &ProcedureSignature) -> Result<Value> {
        self.executor.invoke(signature, &Arguments::new()).await
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Opens a stream of `service.procedure(args)`.
    ///
    /// Streaming a call that already has a live stream returns that stream.
    /// The returned stream holds the call's current value straight away.
    pub async fn open_stream(
        &self,
        service: &str,
        procedure: &str,
        args: Arguments,
    ) -> Result<Stream> {
        let signature = self.describe(service, procedure)?;
        let call = self.executor.build_call(&signature, &args)?;

        let executor = &self.executor;
        let initial_call = call.clone();
        let return_type = signature.return_type.clone();
        self.streams
            .create(&signature, call, move || async move {
                executor.execute(initial_call, return_type.as_ref()).await
            })
            .await
    }

    /// Removes a stream. Returns `false` if it was already removed.
    pub async fn remove_stream(&self, stream: &Stream) -> Result<bool> {
        self.streams.remove(stream).await
    }

    pub async fn start_stream(&self, stream: &Stream) -> Result<()> {
        self.streams.start(stream).await
    }

    /// Sets how often the server sends updates for `stream`, in hertz.
    pub async fn set_stream_rate(&self, stream: &Stream, rate: f32) -> Result<()> {
        self.streams.set_rate(stream, rate).await
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

fn unexpected(procedure: &str, value: &Value) -> KrpcError {
    KrpcError::InvalidResponse(format!("{} returned {}", procedure, value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = Client::new(ClientConfig::named("test"));
        assert!(!client.is_connected());
        assert_eq!(client.config().name, "test");
        assert_eq!(client.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let client = Client::new(ClientConfig::default());
        assert!(!client.close().await);
    }

    #[tokio::test]
    async fn test_invoke_without_connect() {
        let client = Client::new(ClientConfig::default());
        let result = client.invoke("KRPC", "GetStatus", Arguments::new()).await;
        assert!(matches!(result, Err(KrpcError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unknown_procedure_before_load() {
        let client = Client::new(ClientConfig::default());
        let result = client.invoke("SpaceCenter", "get_UT", Arguments::new()).await;
        assert!(matches!(result, Err(KrpcError::UnknownProcedure(_))));
    }

    #[tokio::test]
    async fn test_shared_registry() {
        let registry = Arc::new(TypeRegistry::new());
        let client = Client::with_registry(ClientConfig::default(), Arc::clone(&registry));
        assert!(Arc::ptr_eq(client.registry(), &registry));
        assert!(client.describe("KRPC", "AddStream").is_ok());
    }
}
