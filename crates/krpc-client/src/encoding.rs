//! Recursive value codec.
//!
//! Scalars use the bare encodings in [`krpc_common::wire`]. Collections are
//! wrapped in the protocol's envelope messages with every element encoded on
//! its own against the element type, so nothing but the [`TypeDescriptor`]
//! is needed to read a value back.

use krpc_common::{pb, wire, KrpcError, Result};
use prost::Message;

use crate::types::{MessageKind, TypeDescriptor, TypeKind, ValueKind};
use crate::value::{ProtocolMessage, RemoteObject, Value};

/// Encodes an already coerced value as type `ty`.
pub fn encode(value: &Value, ty: &TypeDescriptor) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match (ty.kind(), value) {
        (TypeKind::Value(kind), _) => encode_scalar(*kind, value, ty, &mut buf)?,
        (TypeKind::Message(kind), Value::Message(message)) if message.kind() == *kind => {
            buf = encode_message(message);
        }
        (TypeKind::Class { .. }, Value::Null) => wire::encode_uint64(0, &mut buf),
        (TypeKind::Class { .. }, Value::Object(object)) => wire::encode_uint64(object.id, &mut buf),
        (TypeKind::Enum { .. }, Value::Enum(name)) => {
            let number = ty.enum_values()?.value_of(name).ok_or_else(|| {
                KrpcError::InvalidType(format!("{} has no value named {}", ty, name))
            })?;
            wire::encode_int32(number, &mut buf);
        }
        (TypeKind::List(elem), Value::List(items)) => {
            buf = pb::List { items: encode_items(items, elem)? }.encode_to_vec();
        }
        (TypeKind::Set(elem), Value::Set(items)) => {
            buf = pb::Set { items: encode_items(items, elem)? }.encode_to_vec();
        }
        (TypeKind::Tuple(elems), Value::Tuple(items)) if items.len() == elems.len() => {
            let items = items
                .iter()
                .zip(elems)
                .map(|(item, elem)| encode(item, elem))
                .collect::<Result<Vec<_>>>()?;
            buf = pb::Tuple { items }.encode_to_vec();
        }
        (TypeKind::Dictionary(key_ty, value_ty), Value::Dictionary(entries)) => {
            let entries = entries
                .iter()
                .map(|(k, v)| -> Result<pb::DictionaryEntry> {
                    Ok(pb::DictionaryEntry {
                        key: encode(k, key_ty)?,
                        value: encode(v, value_ty)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            buf = pb::Dictionary { entries }.encode_to_vec();
        }
        _ => return Err(mismatch(value, ty)),
    }
    Ok(buf)
}

/// Decodes bytes produced by the server for type `ty`.
pub fn decode(data: &[u8], ty: &TypeDescriptor) -> Result<Value> {
    let value = match ty.kind() {
        TypeKind::Value(kind) => decode_scalar(*kind, data)?,
        TypeKind::Message(kind) => Value::Message(decode_message(*kind, data)?),
        TypeKind::Class { service, name } => match wire::decode_uint64(data)? {
            0 => Value::Null,
            id => Value::Object(RemoteObject::new(format!("{}.{}", service, name), id)),
        },
        TypeKind::Enum { .. } => {
            let number = wire::decode_int32(data)?;
            let name = ty.enum_values()?.name_of(number).ok_or_else(|| {
                KrpcError::InvalidResponse(format!("{} has no value {}", ty, number))
            })?;
            Value::Enum(name.to_string())
        }
        TypeKind::List(elem) => Value::List(decode_items(&pb::List::decode(data)?.items, elem)?),
        TypeKind::Set(elem) => Value::Set(decode_items(&pb::Set::decode(data)?.items, elem)?),
        TypeKind::Tuple(elems) => {
            let tuple = pb::Tuple::decode(data)?;
            if tuple.items.len() != elems.len() {
                return Err(KrpcError::InvalidResponse(format!(
                    "{} expects {} elements, got {}",
                    ty,
                    elems.len(),
                    tuple.items.len()
                )));
            }
            Value::Tuple(
                tuple
                    .items
                    .iter()
                    .zip(elems)
                    .map(|(item, elem)| decode(item, elem))
                    .collect::<Result<_>>()?,
            )
        }
        TypeKind::Dictionary(key_ty, value_ty) => Value::Dictionary(
            pb::Dictionary::decode(data)?
                .entries
                .iter()
                .map(|entry| -> Result<(Value, Value)> {
                    Ok((decode(&entry.key, key_ty)?, decode(&entry.value, value_ty)?))
                })
                .collect::<Result<_>>()?,
        ),
    };
    Ok(value)
}

fn encode_scalar(
    kind: ValueKind,
    value: &Value,
    ty: &TypeDescriptor,
    buf: &mut Vec<u8>,
) -> Result<()> {
    match (kind, value) {
        (ValueKind::Double, Value::Double(v)) => wire::encode_double(*v, buf),
        (ValueKind::Float, Value::Float(v)) => wire::encode_float(*v, buf),
        (ValueKind::Int32, Value::Int32(v)) => wire::encode_int32(*v, buf),
        (ValueKind::Int64, Value::Int64(v)) => wire::encode_int64(*v, buf),
        (ValueKind::UInt32, Value::UInt32(v)) => wire::encode_uint32(*v, buf),
        (ValueKind::UInt64, Value::UInt64(v)) => wire::encode_uint64(*v, buf),
        (ValueKind::Bool, Value::Bool(v)) => wire::encode_bool(*v, buf),
        (ValueKind::String, Value::String(v)) => wire::encode_string(v, buf),
        (ValueKind::Bytes, Value::Bytes(v)) => wire::encode_bytes(v, buf),
        _ => return Err(mismatch(value, ty)),
    }
    Ok(())
}

fn decode_scalar(kind: ValueKind, data: &[u8]) -> Result<Value> {
    Ok(match kind {
        ValueKind::Double => Value::Double(wire::decode_double(data)?),
        ValueKind::Float => Value::Float(wire::decode_float(data)?),
        ValueKind::Int32 => Value::Int32(wire::decode_int32(data)?),
        ValueKind::Int64 => Value::Int64(wire::decode_int64(data)?),
        ValueKind::UInt32 => Value::UInt32(wire::decode_uint32(data)?),
        ValueKind::UInt64 => Value::UInt64(wire::decode_uint64(data)?),
        ValueKind::Bool => Value::Bool(wire::decode_bool(data)?),
        ValueKind::String => Value::String(wire::decode_string(data)?),
        ValueKind::Bytes => Value::Bytes(wire::decode_bytes(data)?),
    })
}

fn encode_message(message: &ProtocolMessage) -> Vec<u8> {
    match message {
        ProtocolMessage::ProcedureCall(m) => m.encode_to_vec(),
        ProtocolMessage::Stream(m) => m.encode_to_vec(),
        ProtocolMessage::Status(m) => m.encode_to_vec(),
        ProtocolMessage::Services(m) => m.encode_to_vec(),
        ProtocolMessage::Request(m) => m.encode_to_vec(),
        ProtocolMessage::Response(m) => m.encode_to_vec(),
        ProtocolMessage::Argument(m) => m.encode_to_vec(),
        ProtocolMessage::Error(m) => m.encode_to_vec(),
    }
}

fn decode_message(kind: MessageKind, data: &[u8]) -> Result<ProtocolMessage> {
    Ok(match kind {
        MessageKind::ProcedureCall => ProtocolMessage::ProcedureCall(pb::ProcedureCall::decode(data)?),
        MessageKind::Stream => ProtocolMessage::Stream(pb::Stream::decode(data)?),
        MessageKind::Status => ProtocolMessage::Status(pb::Status::decode(data)?),
        MessageKind::Services => ProtocolMessage::Services(pb::Services::decode(data)?),
        MessageKind::Request => ProtocolMessage::Request(pb::Request::decode(data)?),
        MessageKind::Response => ProtocolMessage::Response(pb::Response::decode(data)?),
        MessageKind::Argument => ProtocolMessage::Argument(pb::Argument::decode(data)?),
        MessageKind::Error => ProtocolMessage::Error(pb::Error::decode(data)?),
    })
}

fn encode_items(items: &[Value], elem: &TypeDescriptor) -> Result<Vec<Vec<u8>>> {
    items.iter().map(|item| encode(item, elem)).collect()
}

fn decode_items(items: &[Vec<u8>], elem: &TypeDescriptor) -> Result<Vec<Value>> {
    items.iter().map(|item| decode(item, elem)).collect()
}

fn mismatch(value: &Value, ty: &TypeDescriptor) -> KrpcError {
    KrpcError::Coercion {
        value: format!("{} of type {}", value, value.type_name()),
        ty: ty.to_string(),
    }
}
