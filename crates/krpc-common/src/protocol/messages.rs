//! kRPC protocol messages.
//!
//! These mirror the server's protobuf schema field-for-field so that the
//! derived `prost` encoders produce the exact bytes the server expects.
//! They are written by hand with `prost` derives rather than generated by a
//! build script, since the schema is small and fixed.

// ============================================================================
// Handshake
// ============================================================================

/// Which of the two client connections a handshake is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionType {
    Rpc = 0,
    Stream = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionStatus {
    Ok = 0,
    MalformedMessage = 1,
    Timeout = 2,
    WrongType = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionRequest {
    #[prost(enumeration = "ConnectionType", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub client_name: String,
    #[prost(bytes = "vec", tag = "3")]
    pub client_identifier: Vec<u8>,
}

impl ConnectionRequest {
    pub fn rpc(client_name: impl Into<String>) -> Self {
        Self {
            kind: ConnectionType::Rpc as i32,
            client_name: client_name.into(),
            client_identifier: Vec::new(),
        }
    }

    pub fn stream(client_identifier: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ConnectionType::Stream as i32,
            client_name: String::new(),
            client_identifier: client_identifier.into(),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionResponse {
    #[prost(enumeration = "ConnectionStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", tag = "3")]
    pub client_identifier: Vec<u8>,
}

// ============================================================================
// Calls
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(message, repeated, tag = "1")]
    pub calls: Vec<ProcedureCall>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProcedureCall {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub procedure: String,
    #[prost(message, repeated, tag = "3")]
    pub arguments: Vec<Argument>,
    #[prost(uint32, tag = "4")]
    pub service_id: u32,
    #[prost(uint32, tag = "5")]
    pub procedure_id: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Argument {
    #[prost(uint32, tag = "1")]
    pub position: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(message, optional, tag = "1")]
    pub error: Option<Error>,
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<ProcedureResult>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProcedureResult {
    #[prost(message, optional, tag = "1")]
    pub error: Option<Error>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub stack_trace: String,
}

// ============================================================================
// Streams
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamUpdate {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<StreamResult>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamResult {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, optional, tag = "2")]
    pub result: Option<ProcedureResult>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Stream {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

// ============================================================================
// Reflection
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct Services {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<Service>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub procedures: Vec<Procedure>,
    #[prost(message, repeated, tag = "3")]
    pub classes: Vec<Class>,
    #[prost(message, repeated, tag = "4")]
    pub enumerations: Vec<Enumeration>,
    #[prost(message, repeated, tag = "5")]
    pub exceptions: Vec<Exception>,
    #[prost(string, tag = "6")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Procedure {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub parameters: Vec<Parameter>,
    #[prost(message, optional, tag = "3")]
    pub return_type: Option<Type>,
    #[prost(bool, tag = "4")]
    pub return_is_nullable: bool,
    #[prost(string, tag = "5")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Parameter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub ty: Option<Type>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub default_value: Option<Vec<u8>>,
    #[prost(bool, tag = "4")]
    pub nullable: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Class {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Enumeration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<EnumerationValue>,
    #[prost(string, tag = "3")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnumerationValue {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub value: i32,
    #[prost(string, tag = "3")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Exception {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub documentation: String,
}

// ============================================================================
// Types
// ============================================================================

/// Wire code of a type descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TypeCode {
    None = 0,

    Double = 1,
    Float = 2,
    Int32 = 3,
    Int64 = 4,
    Uint32 = 5,
    Uint64 = 6,
    Bool = 7,
    String = 8,
    Bytes = 9,

    Class = 100,
    Enumeration = 101,

    ProcedureCall = 201,
    Stream = 202,
    Status = 203,
    Services = 204,
    Request = 205,
    Response = 206,
    Argument = 207,
    Error = 208,

    Tuple = 300,
    List = 301,
    Set = 302,
    Dictionary = 303,
}

#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub service: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(message, repeated, tag = "4")]
    pub types: Vec<Type>,
}

impl Type {
    /// A bare type with no service, name or nested types.
    pub fn of(code: TypeCode) -> Self {
        Self {
            code: code as i32,
            ..Default::default()
        }
    }

    /// A class or enumeration type owned by `service`.
    pub fn named(code: TypeCode, service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            service: service.into(),
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// A collection type over `types`.
    pub fn nested(code: TypeCode, types: Vec<Type>) -> Self {
        Self {
            code: code as i32,
            types,
            ..Default::default()
        }
    }
}

// ============================================================================
// Collection envelopes
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct List {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Set {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Tuple {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Dictionary {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<DictionaryEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DictionaryEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

// ============================================================================
// Server status
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(uint64, tag = "2")]
    pub bytes_read: u64,
    #[prost(uint64, tag = "3")]
    pub bytes_written: u64,
    #[prost(float, tag = "4")]
    pub bytes_read_rate: f32,
    #[prost(float, tag = "5")]
    pub bytes_written_rate: f32,
    #[prost(uint64, tag = "6")]
    pub rpcs_executed: u64,
    #[prost(float, tag = "7")]
    pub rpc_rate: f32,
    #[prost(bool, tag = "8")]
    pub one_rpc_per_update: bool,
    #[prost(uint32, tag = "9")]
    pub max_time_per_update: u32,
    #[prost(bool, tag = "10")]
    pub adaptive_rate_control: bool,
    #[prost(bool, tag = "11")]
    pub blocking_recv: bool,
    #[prost(uint32, tag = "12")]
    pub recv_timeout: u32,
    #[prost(float, tag = "13")]
    pub time_per_rpc_update: f32,
    #[prost(float, tag = "14")]
    pub poll_time_per_rpc_update: f32,
    #[prost(float, tag = "15")]
    pub exec_time_per_rpc_update: f32,
    #[prost(uint32, tag = "16")]
    pub stream_rpcs: u32,
    #[prost(uint64, tag = "17")]
    pub stream_rpcs_executed: u64,
    #[prost(float, tag = "18")]
    pub stream_rpc_rate: f32,
    #[prost(float, tag = "19")]
    pub time_per_stream_update: f32,
}
