//! Signatures of the server's built-in `KRPC` service.
//!
//! These are known up front so a client can query status, fetch the service
//! catalog and manage streams before (or without) loading reflection data.

use std::sync::Arc;

use krpc_common::wire;

use crate::procedure::{MemberKind, Parameter, ProcedureSignature};
use crate::types::{MessageKind, TypeDescriptor, TypeRegistry, ValueKind};

pub const KRPC_SERVICE: &str = "KRPC";

#[derive(Debug, Clone)]
pub struct KrpcProcedures {
    pub get_status: Arc<ProcedureSignature>,
    pub get_services: Arc<ProcedureSignature>,
    pub get_client_id: Arc<ProcedureSignature>,
    pub get_client_name: Arc<ProcedureSignature>,
    /// `AddStream(call, start = true) -> Stream`
    pub add_stream: Arc<ProcedureSignature>,
    pub start_stream: Arc<ProcedureSignature>,
    pub set_stream_rate: Arc<ProcedureSignature>,
    pub remove_stream: Arc<ProcedureSignature>,
}

impl KrpcProcedures {
    pub fn new(registry: &TypeRegistry) -> Self {
        let uint64 = registry.value(ValueKind::UInt64);
        let stream_id = || param("id", &uint64, None);

        let mut start_default = Vec::new();
        wire::encode_bool(true, &mut start_default);

        Self {
            get_status: signature(
                "GetStatus",
                vec![],
                Some(registry.message(MessageKind::Status)),
            ),
            get_services: signature(
                "GetServices",
                vec![],
                Some(registry.message(MessageKind::Services)),
            ),
            get_client_id: signature(
                "GetClientID",
                vec![],
                Some(registry.value(ValueKind::Bytes)),
            ),
            get_client_name: signature(
                "GetClientName",
                vec![],
                Some(registry.value(ValueKind::String)),
            ),
            add_stream: signature(
                "AddStream",
                vec![
                    param("call", &registry.message(MessageKind::ProcedureCall), None),
                    param("start", &registry.value(ValueKind::Bool), Some(start_default)),
                ],
                Some(registry.message(MessageKind::Stream)),
            ),
            start_stream: signature("StartStream", vec![stream_id()], None),
            set_stream_rate: signature(
                "SetStreamRate",
                vec![stream_id(), param("rate", &registry.value(ValueKind::Float), None)],
                None,
            ),
            remove_stream: signature("RemoveStream", vec![stream_id()], None),
        }
    }

    pub fn all(&self) -> [&Arc<ProcedureSignature>; 8] {
        [
            &self.get_status,
            &self.get_services,
            &self.get_client_id,
            &self.get_client_name,
            &self.add_stream,
            &self.start_stream,
            &self.set_stream_rate,
            &self.remove_stream,
        ]
    }
}

fn param(name: &str, ty: &TypeDescriptor, default: Option<Vec<u8>>) -> Parameter {
    Parameter {
        name: name.to_string(),
        ty: ty.clone(),
        default,
        nullable: false,
    }
}

fn signature(
    name: &str,
    parameters: Vec<Parameter>,
    return_type: Option<TypeDescriptor>,
) -> Arc<ProcedureSignature> {
    Arc::new(ProcedureSignature {
        service: KRPC_SERVICE.to_string(),
        name: name.to_string(),
        parameters,
        return_type,
        return_nullable: false,
        member_kind: MemberKind::Plain,
        documentation: String::new(),
    })
}
