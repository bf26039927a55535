//! In-process mock kRPC server for integration tests.
//!
//! Serves the RPC and stream handshakes on loopback ports, implements the
//! built-in stream procedures and forwards every other call to a test-supplied
//! handler. Stream updates are pushed explicitly by the test.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use krpc_client::ClientConfig;
use krpc_common::pb::{self, TypeCode};
use krpc_common::transport::TcpTransport;
use krpc_common::wire;
use prost::Message;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const CLIENT_ID: &[u8] = &[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04];

pub type Handler = Arc<dyn Fn(&pb::ProcedureCall) -> pb::ProcedureResult + Send + Sync>;

/// Enables log output for a test run, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Results
// ============================================================================

pub fn ok_value(value: Vec<u8>) -> pb::ProcedureResult {
    pb::ProcedureResult { error: None, value }
}

pub fn ok_empty() -> pb::ProcedureResult {
    ok_value(Vec::new())
}

pub fn ok_double(value: f64) -> pb::ProcedureResult {
    let mut bytes = Vec::new();
    wire::encode_double(value, &mut bytes);
    ok_value(bytes)
}

pub fn error_result(service: &str, name: &str, description: &str) -> pb::ProcedureResult {
    pb::ProcedureResult {
        error: Some(pb::Error {
            service: service.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            stack_trace: String::new(),
        }),
        value: Vec::new(),
    }
}

pub fn double_update(id: u64, value: f64) -> pb::StreamUpdate {
    pb::StreamUpdate {
        results: vec![pb::StreamResult {
            id,
            result: Some(ok_double(value)),
        }],
    }
}

// ============================================================================
// Reflection
// ============================================================================

pub fn parameter(name: &str, code: TypeCode, default: Option<Vec<u8>>) -> pb::Parameter {
    pb::Parameter {
        name: name.to_string(),
        ty: Some(pb::Type::of(code)),
        default_value: default,
        nullable: false,
    }
}

pub fn procedure(name: &str, parameters: Vec<pb::Parameter>, ret: Option<TypeCode>) -> pb::Procedure {
    pb::Procedure {
        name: name.to_string(),
        parameters,
        return_type: ret.map(pb::Type::of),
        ..Default::default()
    }
}

/// The `Test` service the integration suite calls into:
///
/// - `Add(a: int32, b: int32 = 1) -> int32`
/// - `get_Counter() -> double`
/// - `set_Throttle(value: float)`
/// - `Boom()`
pub fn test_services() -> pb::Services {
    let mut one = Vec::new();
    wire::encode_int32(1, &mut one);

    pb::Services {
        services: vec![pb::Service {
            name: "Test".to_string(),
            procedures: vec![
                procedure(
                    "Add",
                    vec![
                        parameter("a", TypeCode::Int32, None),
                        parameter("b", TypeCode::Int32, Some(one)),
                    ],
                    Some(TypeCode::Int32),
                ),
                procedure("get_Counter", vec![], Some(TypeCode::Double)),
                procedure(
                    "set_Throttle",
                    vec![parameter("value", TypeCode::Float, None)],
                    None,
                ),
                procedure("Boom", vec![], None),
            ],
            documentation: "Procedures for integration tests".to_string(),
            ..Default::default()
        }],
    }
}

/// Handler for [`test_services`]. `Add` treats a missing `b` as its default.
pub fn test_handler(counter: f64) -> Handler {
    Arc::new(move |call: &pb::ProcedureCall| match call.procedure.as_str() {
        "Add" => {
            let mut args = [0i32, 1];
            for arg in &call.arguments {
                args[arg.position as usize] = wire::decode_int32(&arg.value).unwrap_or_default();
            }
            let mut bytes = Vec::new();
            wire::encode_int32(args[0] + args[1], &mut bytes);
            ok_value(bytes)
        }
        "get_Counter" => ok_double(counter),
        "set_Throttle" => ok_empty(),
        "Boom" => error_result("Test", "CustomException", "it broke"),
        other => error_result("", "", &format!("Procedure not found: {}", other)),
    })
}

// ============================================================================
// Server
// ============================================================================

#[derive(Clone)]
pub struct MockOptions {
    pub handler: Handler,
    pub services: pb::Services,
    /// Rejects every RPC handshake with this message
    pub reject_rpc: Option<String>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            handler: test_handler(1.0),
            services: test_services(),
            reject_rpc: None,
        }
    }
}

struct State {
    options: MockOptions,
    stream_ids: Mutex<HashMap<Vec<u8>, u64>>,
    next_stream_id: AtomicU64,
    removed: Mutex<Vec<u64>>,
    calls: Mutex<Vec<pb::ProcedureCall>>,
    stream_client: tokio::sync::Mutex<Option<TcpStream>>,
}

pub struct MockServer {
    pub rpc_port: u16,
    pub stream_port: u16,
    state: Arc<State>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rpc_port = rpc.local_addr().unwrap().port();
        let stream_port = stream.local_addr().unwrap().port();

        let state = Arc::new(State {
            options,
            stream_ids: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU64::new(1),
            removed: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            stream_client: tokio::sync::Mutex::new(None),
        });

        let tasks = vec![
            tokio::spawn(accept_rpc(rpc, Arc::clone(&state))),
            tokio::spawn(accept_stream(stream, Arc::clone(&state))),
        ];

        Self {
            rpc_port,
            stream_port,
            state,
            tasks,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            name: "integration".to_string(),
            host: "127.0.0.1".to_string(),
            rpc_port: self.rpc_port,
            stream_port: self.stream_port,
            ..Default::default()
        }
    }

    /// Ids passed to `KRPC.RemoveStream`, in order.
    pub fn removed_streams(&self) -> Vec<u64> {
        self.state.removed.lock().unwrap().clone()
    }

    /// Every call received, built-in ones included.
    pub fn calls(&self) -> Vec<pb::ProcedureCall> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Sends an update over the stream connection, once one is open.
    pub async fn push_update(&self, update: &pb::StreamUpdate) {
        eventually(|| self.state.stream_client.try_lock().is_ok_and(|c| c.is_some())).await;
        let mut client = self.state.stream_client.lock().await;
        let socket = client.as_mut().unwrap();
        TcpTransport::send_message(socket, update).await.unwrap();
    }

    /// Closes the stream connection from the server side.
    pub async fn drop_stream_client(&self) {
        eventually(|| self.state.stream_client.try_lock().is_ok_and(|c| c.is_some())).await;
        let socket = self.state.stream_client.lock().await.take();
        if let Some(mut socket) = socket {
            let _ = socket.shutdown().await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn accept_rpc(listener: TcpListener, state: Arc<State>) {
    while let Ok((socket, _)) = listener.accept().await {
        tokio::spawn(serve_rpc(socket, Arc::clone(&state)));
    }
}

async fn accept_stream(listener: TcpListener, state: Arc<State>) {
    while let Ok((mut socket, _)) = listener.accept().await {
        let Ok(request) =
            TcpTransport::receive_message::<_, pb::ConnectionRequest>(&mut socket).await
        else {
            continue;
        };

        let accepted = request.kind == pb::ConnectionType::Stream as i32
            && request.client_identifier == CLIENT_ID;
        let response = if accepted {
            handshake_ok()
        } else {
            handshake_rejected("expected a stream connection for a known client")
        };
        if TcpTransport::send_message(&mut socket, &response).await.is_ok() && accepted {
            *state.stream_client.lock().await = Some(socket);
        }
    }
}

async fn serve_rpc(mut socket: TcpStream, state: Arc<State>) {
    let Ok(request) = TcpTransport::receive_message::<_, pb::ConnectionRequest>(&mut socket).await
    else {
        return;
    };

    let rejection = match &state.options.reject_rpc {
        Some(message) => Some(message.clone()),
        None if request.kind != pb::ConnectionType::Rpc as i32 => {
            Some("expected an RPC connection".to_string())
        }
        None => None,
    };
    if let Some(message) = rejection {
        let _ = TcpTransport::send_message(&mut socket, &handshake_rejected(&message)).await;
        return;
    }
    if TcpTransport::send_message(&mut socket, &handshake_ok()).await.is_err() {
        return;
    }

    while let Ok(request) = TcpTransport::receive_message::<_, pb::Request>(&mut socket).await {
        let results = request.calls.iter().map(|call| state.execute(call)).collect();
        let response = pb::Response {
            error: None,
            results,
        };
        if TcpTransport::send_message(&mut socket, &response).await.is_err() {
            return;
        }
    }
}

fn handshake_ok() -> pb::ConnectionResponse {
    pb::ConnectionResponse {
        status: pb::ConnectionStatus::Ok as i32,
        message: String::new(),
        client_identifier: CLIENT_ID.to_vec(),
    }
}

fn handshake_rejected(message: &str) -> pb::ConnectionResponse {
    pb::ConnectionResponse {
        status: pb::ConnectionStatus::WrongType as i32,
        message: message.to_string(),
        client_identifier: Vec::new(),
    }
}

impl State {
    fn execute(&self, call: &pb::ProcedureCall) -> pb::ProcedureResult {
        self.calls.lock().unwrap().push(call.clone());
        if call.service != "KRPC" {
            return (self.options.handler)(call);
        }

        let first_arg = call
            .arguments
            .iter()
            .find(|a| a.position == 0)
            .map(|a| a.value.as_slice())
            .unwrap_or_default();

        match call.procedure.as_str() {
            "GetClientID" => {
                let mut bytes = Vec::new();
                wire::encode_bytes(CLIENT_ID, &mut bytes);
                ok_value(bytes)
            }
            "GetClientName" => {
                let mut bytes = Vec::new();
                wire::encode_string("integration", &mut bytes);
                ok_value(bytes)
            }
            "GetServices" => ok_value(self.options.services.encode_to_vec()),
            "GetStatus" => ok_value(
                pb::Status {
                    version: "0.5.4".to_string(),
                    ..Default::default()
                }
                .encode_to_vec(),
            ),
            "AddStream" => {
                let Ok(inner) = pb::ProcedureCall::decode(first_arg) else {
                    return error_result("KRPC", "ArgumentException", "malformed call");
                };
                let mut ids = self.stream_ids.lock().unwrap();
                let id = *ids
                    .entry(inner.encode_to_vec())
                    .or_insert_with(|| self.next_stream_id.fetch_add(1, Ordering::SeqCst));
                ok_value(pb::Stream { id }.encode_to_vec())
            }
            "RemoveStream" => {
                let id = wire::decode_uint64(first_arg).unwrap_or_default();
                self.removed.lock().unwrap().push(id);
                self.stream_ids.lock().unwrap().retain(|_, v| *v != id);
                ok_empty()
            }
            "StartStream" | "SetStreamRate" => ok_empty(),
            other => error_result("", "", &format!("Procedure not found: KRPC.{}", other)),
        }
    }
}
