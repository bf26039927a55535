use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use krpc_common::transport::RpcConnection;
use krpc_common::{pb, KrpcError, Result, RpcErrorDetails};
use tokio::sync::Mutex;

use crate::builtin::KrpcProcedures;
use crate::encoding;
use crate::procedure::{Parameter, ProcedureSignature};
use crate::streaming::StreamControl;
use crate::types::{TypeDescriptor, TypeRegistry};
use crate::value::{ProtocolMessage, Value};

/// Positional and keyword arguments for a call.
///
/// # Example
///
/// ```rust
/// use krpc_client::Arguments;
///
/// let args = Arguments::new().arg(3).kwarg("max_rails_rate", 100000.0);
/// assert_eq!(args.positional().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument, replacing an earlier one with the same name.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: BTreeMap::new(),
        }
    }
}

/// Executes procedure calls over the RPC connection.
///
/// Binding arguments is purely local; [`execute`](Self::execute) holds the
/// connection for the whole request/response exchange, so concurrent callers
/// are served one at a time.
pub struct CallExecutor {
    registry: Arc<TypeRegistry>,
    krpc: KrpcProcedures,
    connection: Mutex<Option<RpcConnection>>,
    connected: AtomicBool,
    call_timeout: Option<Duration>,
}

impl CallExecutor {
    pub fn new(registry: Arc<TypeRegistry>, call_timeout: Option<Duration>) -> Self {
        let krpc = KrpcProcedures::new(&registry);
        Self {
            registry,
            krpc,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Signatures of the built-in `KRPC` procedures.
    pub fn krpc(&self) -> &KrpcProcedures {
        &self.krpc
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Starts sending calls over `connection`.
    pub async fn attach(&self, connection: RpcConnection) {
        let mut guard = self.connection.lock().await;
        *guard = Some(connection);
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Closes the RPC connection once any in-flight call has finished.
    ///
    /// Returns `false` if there was no connection.
    pub async fn detach(&self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => {
                connection.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Binds `args` to the signature's parameters and encodes them.
    ///
    /// Arguments equal to a parameter's default are left out, keeping the
    /// positions of the others. Every binding error is raised here, before
    /// anything is sent.
    pub fn build_call(
        &self,
        signature: &ProcedureSignature,
        args: &Arguments,
    ) -> Result<pb::ProcedureCall> {
        let params = &signature.parameters;
        let positional = args.positional();
        let keyword = args.keyword();

        if positional.len() > params.len() {
            return Err(KrpcError::ArgumentCount {
                actual: positional.len(),
                required: signature.required_count(),
                max: params.len(),
            });
        }

        let mut arguments = Vec::new();
        for (position, param) in params.iter().enumerate() {
            let value = match (positional.get(position), keyword.get(&param.name)) {
                (Some(_), Some(_)) => {
                    return Err(KrpcError::AmbiguousArgument(param.name.clone()));
                }
                (Some(value), None) | (None, Some(value)) => value,
                (None, None) if param.default.is_some() => continue,
                (None, None) => return Err(KrpcError::MissingArgument(param.name.clone())),
            };

            let type_error = |_| KrpcError::ArgumentType {
                name: param.name.clone(),
                expected: param.ty.to_string(),
                actual: format!("{} of type {}", value, value.type_name()),
            };

            // Enum tags pass coercion unchecked; the encoder resolves them.
            let coerced = self.registry.coerce(value, &param.ty).map_err(type_error)?;
            if equals_default(&coerced, param) {
                continue;
            }

            arguments.push(pb::Argument {
                position: position as u32,
                value: encoding::encode(&coerced, &param.ty).map_err(type_error)?,
            });
        }

        let unknown: Vec<String> = keyword
            .keys()
            .filter(|name| !params.iter().any(|p| &p.name == *name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(KrpcError::UnknownKeyword(unknown));
        }

        Ok(pb::ProcedureCall {
            service: signature.service.clone(),
            procedure: signature.name.clone(),
            arguments,
            ..Default::default()
        })
    }

    /// Sends a single call and decodes its result.
    ///
    /// Returns [`Value::Null`] when `return_type` is `None`.
    pub async fn execute(
        &self,
        call: pb::ProcedureCall,
        return_type: Option<&TypeDescriptor>,
    ) -> Result<Value> {
        tracing::debug!("Calling {}.{}", call.service, call.procedure);
        let request = pb::Request { calls: vec![call] };

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(KrpcError::NotConnected)?;

        let outcome = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, connection.send_request(&request))
                .await
                .ok(),
            None => Some(connection.send_request(&request).await),
        };

        let Some(result) = outcome else {
            // The response may still arrive, so the socket is out of step.
            let limit = self.call_timeout.unwrap_or_default();
            tracing::warn!(
                "Call timed out after {}ms, closing RPC connection",
                limit.as_millis()
            );
            self.connected.store(false, Ordering::SeqCst);
            if let Some(connection) = guard.take() {
                connection.shutdown().await;
            }
            return Err(KrpcError::Timeout(limit.as_millis() as u64));
        };
        drop(guard);

        let response = result.map_err(|e| self.map_transport_error(e))?;
        response_value(response, return_type)
    }

    /// Binds arguments, then executes the call.
    pub async fn invoke(&self, signature: &ProcedureSignature, args: &Arguments) -> Result<Value> {
        let call = self.build_call(signature, args)?;
        self.execute(call, signature.return_type.as_ref()).await
    }

    fn map_transport_error(&self, err: KrpcError) -> KrpcError {
        match err {
            KrpcError::Connection(_) | KrpcError::Io(_) if !self.is_connected() => {
                KrpcError::NotConnected
            }
            other => other,
        }
    }
}

impl StreamControl for CallExecutor {
    async fn add_stream(&self, call: &pb::ProcedureCall, start: bool) -> Result<u64> {
        let args = Arguments::new()
            .arg(ProtocolMessage::ProcedureCall(call.clone()))
            .arg(start);
        match self.invoke(&self.krpc.add_stream, &args).await? {
            Value::Message(ProtocolMessage::Stream(stream)) => Ok(stream.id),
            other => Err(KrpcError::InvalidResponse(format!(
                "AddStream returned {}",
                other.type_name()
            ))),
        }
    }

    async fn start_stream(&self, id: u64) -> Result<()> {
        self.invoke(&self.krpc.start_stream, &Arguments::new().arg(id))
            .await
            .map(drop)
    }

    async fn set_stream_rate(&self, id: u64, rate: f32) -> Result<()> {
        let args = Arguments::new().arg(id).arg(rate);
        self.invoke(&self.krpc.set_stream_rate, &args).await.map(drop)
    }

    async fn remove_stream(&self, id: u64) -> Result<()> {
        self.invoke(&self.krpc.remove_stream, &Arguments::new().arg(id))
            .await
            .map(drop)
    }
}

/// Extracts the single result of a response.
fn response_value(response: pb::Response, return_type: Option<&TypeDescriptor>) -> Result<Value> {
    if let Some(error) = &response.error {
        return Err(RpcErrorDetails::from(error).into());
    }

    let [result]: [pb::ProcedureResult; 1] = response.results.try_into().map_err(
        |results: Vec<pb::ProcedureResult>| {
            KrpcError::InvalidResponse(format!("expected exactly one result, got {}", results.len()))
        },
    )?;

    if let Some(error) = &result.error {
        return Err(RpcErrorDetails::from(error).into());
    }

    match return_type {
        Some(ty) => encoding::decode(&result.value, ty),
        None => Ok(Value::Null),
    }
}

/// Whether `value` is the parameter's default and may be left out.
fn equals_default(value: &Value, param: &Parameter) -> bool {
    let Some(default) = &param.default else {
        return false;
    };
    match encoding::decode(default, &param.ty) {
        Ok(decoded) => decoded == *value,
        Err(_) => encoding::encode(value, &param.ty).is_ok_and(|bytes| bytes == *default),
    }
}
