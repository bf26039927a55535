//! Dynamic values exchanged with the server.
//!
//! Procedures are discovered at runtime, so arguments and results are carried
//! as a [`Value`] tree instead of generated Rust types. A [`TypeDescriptor`]
//! decides how a value is coerced and encoded.
//!
//! [`TypeDescriptor`]: crate::types::TypeDescriptor

use std::fmt;

use krpc_common::pb;

use crate::types::MessageKind;

/// Reference to an object living on the server.
///
/// Two handles are equal when they name the same class and object id; the
/// handle does not keep the server object alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObject {
    /// `"{service}.{class}"`, e.g. `"SpaceCenter.Vessel"`
    pub class_tag: String,
    pub id: u64,
}

impl RemoteObject {
    pub fn new(class_tag: impl Into<String>, id: u64) -> Self {
        Self {
            class_tag: class_tag.into(),
            id,
        }
    }
}

impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} #{}>", self.class_tag, self.id)
    }
}

/// One of the fixed protocol messages a procedure can take or return.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    ProcedureCall(pb::ProcedureCall),
    Stream(pb::Stream),
    Status(pb::Status),
    Services(pb::Services),
    Request(pb::Request),
    Response(pb::Response),
    Argument(pb::Argument),
    Error(pb::Error),
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::ProcedureCall(_) => MessageKind::ProcedureCall,
            ProtocolMessage::Stream(_) => MessageKind::Stream,
            ProtocolMessage::Status(_) => MessageKind::Status,
            ProtocolMessage::Services(_) => MessageKind::Services,
            ProtocolMessage::Request(_) => MessageKind::Request,
            ProtocolMessage::Response(_) => MessageKind::Response,
            ProtocolMessage::Argument(_) => MessageKind::Argument,
            ProtocolMessage::Error(_) => MessageKind::Error,
        }
    }
}

/// A dynamically typed kRPC value.
///
/// Sets and dictionaries keep their elements in a `Vec` (values such as
/// doubles are neither `Hash` nor `Ord`) and compare without regard to order.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Symbolic enumeration member, e.g. `"Flight"`
    Enum(String),
    Object(RemoteObject),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(Value, Value)>),
    Tuple(Vec<Value>),
    Message(ProtocolMessage),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Double(_) => "double",
            Value::Float(_) => "float",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Dictionary(_) => "dictionary",
            Value::Tuple(_) => "tuple",
            Value::Message(_) => "message",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            Value::Float(v) => Some(v as f64),
            Value::Int32(v) => Some(v as f64),
            Value::Int64(v) => Some(v as f64),
            Value::UInt32(v) => Some(v as f64),
            Value::UInt64(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::UInt32(v) => Some(v as i64),
            Value::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt32(v) => Some(v as u64),
            Value::UInt64(v) => Some(v),
            Value::Int32(v) => u64::try_from(v).ok(),
            Value::Int64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&RemoteObject> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Elements of a list, set or tuple.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&ProtocolMessage> {
        match self {
            Value::Message(message) => Some(message),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => same_elements(a, b),
            (Value::Dictionary(a), Value::Dictionary(b)) => same_elements(a, b),
            (Value::Message(a), Value::Message(b)) => a == b,
            _ => false,
        }
    }
}

/// Order-independent comparison that also respects duplicate counts.
fn same_elements<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|x| {
        match b
            .iter()
            .enumerate()
            .position(|(i, y)| !used[i] && x == y)
        {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl fmt::Display for Value {
    /// Canonical text form; scalars render as their plain value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T>(
            f: &mut fmt::Formatter<'_>,
            items: &[T],
            mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
        ) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                each(f, item)?;
            }
            Ok(())
        }

        match self {
            Value::Null => f.write_str("null"),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(s) | Value::Enum(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "{:02x?}", b),
            Value::Object(object) => write!(f, "{}", object),
            Value::List(items) => {
                f.write_str("[")?;
                join(f, items, |f, v| write!(f, "{}", v))?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                join(f, items, |f, v| write!(f, "{}", v))?;
                f.write_str(")")
            }
            Value::Set(items) => {
                f.write_str("{")?;
                join(f, items, |f, v| write!(f, "{}", v))?;
                f.write_str("}")
            }
            Value::Dictionary(entries) => {
                f.write_str("{")?;
                join(f, entries, |f, (k, v)| write!(f, "{} => {}", k, v))?;
                f.write_str("}")
            }
            Value::Message(message) => write!(f, "{:?}", message.kind()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    f64 => Double,
    f32 => Float,
    i32 => Int32,
    i64 => Int64,
    u32 => UInt32,
    u64 => UInt64,
    bool => Bool,
    String => String,
    &str => String,
    RemoteObject => Object,
    Vec<Value> => List,
    ProtocolMessage => Message,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
