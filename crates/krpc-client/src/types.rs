//! Type descriptors and the registry that interns them.
//!
//! A [`TypeDescriptor`] is built from the server's `Type` message and decides
//! how a [`Value`] is coerced, encoded and decoded. The [`TypeRegistry`] hands
//! out exactly one descriptor per canonical type, so descriptors compare by
//! identity.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use krpc_common::pb::{self, TypeCode};
use krpc_common::{KrpcError, Result};

use crate::value::Value;

// ============================================================================
// Kinds
// ============================================================================

/// Scalar protobuf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Bool,
    String,
    Bytes,
}

impl ValueKind {
    pub fn code(self) -> TypeCode {
        match self {
            ValueKind::Double => TypeCode::Double,
            ValueKind::Float => TypeCode::Float,
            ValueKind::Int32 => TypeCode::Int32,
            ValueKind::Int64 => TypeCode::Int64,
            ValueKind::UInt32 => TypeCode::Uint32,
            ValueKind::UInt64 => TypeCode::Uint64,
            ValueKind::Bool => TypeCode::Bool,
            ValueKind::String => TypeCode::String,
            ValueKind::Bytes => TypeCode::Bytes,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Double => "double",
            ValueKind::Float => "float",
            ValueKind::Int32 => "int32",
            ValueKind::Int64 => "int64",
            ValueKind::UInt32 => "uint32",
            ValueKind::UInt64 => "uint64",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ValueKind::Bool | ValueKind::String | ValueKind::Bytes)
    }
}

/// Protocol messages that can appear as parameter or return types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ProcedureCall,
    Stream,
    Status,
    Services,
    Request,
    Response,
    Argument,
    Error,
}

impl MessageKind {
    pub fn code(self) -> TypeCode {
        match self {
            MessageKind::ProcedureCall => TypeCode::ProcedureCall,
            MessageKind::Stream => TypeCode::Stream,
            MessageKind::Status => TypeCode::Status,
            MessageKind::Services => TypeCode::Services,
            MessageKind::Request => TypeCode::Request,
            MessageKind::Response => TypeCode::Response,
            MessageKind::Argument => TypeCode::Argument,
            MessageKind::Error => TypeCode::Error,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::ProcedureCall => "KRPC.ProcedureCall",
            MessageKind::Stream => "KRPC.Stream",
            MessageKind::Status => "KRPC.Status",
            MessageKind::Services => "KRPC.Services",
            MessageKind::Request => "KRPC.Request",
            MessageKind::Response => "KRPC.Response",
            MessageKind::Argument => "KRPC.Argument",
            MessageKind::Error => "KRPC.Error",
        }
    }
}

/// Name/value table of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumValues {
    by_name: BTreeMap<String, i32>,
    by_value: BTreeMap<i32, String>,
}

impl EnumValues {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (name, value) in values {
            let name = name.into();
            table.by_value.insert(value, name.clone());
            table.by_name.insert(name, value);
        }
        table
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl From<&pb::Enumeration> for EnumValues {
    fn from(enumeration: &pb::Enumeration) -> Self {
        Self::new(enumeration.values.iter().map(|v| (v.name.clone(), v.value)))
    }
}

#[derive(Debug)]
pub enum TypeKind {
    Value(ValueKind),
    Message(MessageKind),
    Class {
        service: String,
        name: String,
    },
    /// Values are bound once, after the descriptor is created.
    Enum {
        service: String,
        name: String,
        values: OnceLock<EnumValues>,
    },
    List(TypeDescriptor),
    Set(TypeDescriptor),
    Dictionary(TypeDescriptor, TypeDescriptor),
    Tuple(Vec<TypeDescriptor>),
}

// ============================================================================
// Descriptor
// ============================================================================

struct TypeNode {
    proto: pb::Type,
    kind: TypeKind,
}

/// Canonical description of a value's shape.
///
/// Cheap to clone. Equality and hashing are by identity: the registry
/// returns the same instance for the same type, so `==` means "same type".
#[derive(Clone)]
pub struct TypeDescriptor(Arc<TypeNode>);

impl TypeDescriptor {
    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    /// The canonical `Type` message this descriptor was interned under.
    pub fn proto(&self) -> &pb::Type {
        &self.0.proto
    }

    /// `"{service}.{class}"` for class types.
    pub fn class_tag(&self) -> Option<String> {
        match self.kind() {
            TypeKind::Class { service, name } => Some(format!("{}.{}", service, name)),
            _ => None,
        }
    }

    /// The bound value table of an enumeration type.
    ///
    /// # Errors
    ///
    /// - `InvalidType` if this is not an enumeration
    /// - `EnumNotBound` if [`set_values`](Self::set_values) has not been called yet
    pub fn enum_values(&self) -> Result<&EnumValues> {
        match self.kind() {
            TypeKind::Enum { values, .. } => values
                .get()
                .ok_or_else(|| KrpcError::EnumNotBound(self.to_string())),
            _ => Err(KrpcError::InvalidType(format!("{} is not an enumeration", self))),
        }
    }

    /// Binds the value table of an enumeration type.
    ///
    /// Binding again with an identical table is a no-op; a different table is
    /// rejected.
    pub fn set_values(&self, table: EnumValues) -> Result<()> {
        let TypeKind::Enum { values, .. } = self.kind() else {
            return Err(KrpcError::InvalidType(format!("{} is not an enumeration", self)));
        };
        let bound = values.get_or_init(|| table.clone());
        if *bound == table {
            Ok(())
        } else {
            Err(KrpcError::InvalidType(format!(
                "{} is already bound to different values",
                self
            )))
        }
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TypeKind::Value(kind) => f.write_str(kind.name()),
            TypeKind::Message(kind) => f.write_str(kind.name()),
            TypeKind::Class { service, name } => write!(f, "Class({}.{})", service, name),
            TypeKind::Enum { service, name, .. } => write!(f, "Enum({}.{})", service, name),
            TypeKind::List(elem) => write!(f, "List({})", elem),
            TypeKind::Set(elem) => write!(f, "Set({})", elem),
            TypeKind::Dictionary(key, value) => write!(f, "Dictionary({},{})", key, value),
            TypeKind::Tuple(elems) => {
                f.write_str("Tuple(")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", elem)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDescriptor({})", self)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Interning cache of type descriptors.
///
/// Each client owns one; pass a shared `Arc<TypeRegistry>` to several
/// clients to share enum bindings between them.
#[derive(Default)]
pub struct TypeRegistry {
    cache: Mutex<HashMap<pb::Type, TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor for a `Type` message, creating it on first use.
    ///
    /// # Errors
    ///
    /// `InvalidType` when the code is unknown, a class or enumeration lacks
    /// its service or name, or a collection has the wrong number of nested
    /// types (list and set take one, dictionary two, tuple at least one).
    pub fn get_or_create(&self, ty: &pb::Type) -> Result<TypeDescriptor> {
        if let Some(found) = self.lookup(ty) {
            return Ok(found);
        }

        let code = TypeCode::try_from(ty.code)
            .map_err(|_| KrpcError::InvalidType(format!("unknown type code {}", ty.code)))?;

        let descriptor = match code {
            TypeCode::None => {
                return Err(KrpcError::InvalidType("type code NONE".to_string()));
            }
            TypeCode::Double => self.value(ValueKind::Double),
            TypeCode::Float => self.value(ValueKind::Float),
            TypeCode::Int32 => self.value(ValueKind::Int32),
            TypeCode::Int64 => self.value(ValueKind::Int64),
            TypeCode::Uint32 => self.value(ValueKind::UInt32),
            TypeCode::Uint64 => self.value(ValueKind::UInt64),
            TypeCode::Bool => self.value(ValueKind::Bool),
            TypeCode::String => self.value(ValueKind::String),
            TypeCode::Bytes => self.value(ValueKind::Bytes),
            TypeCode::ProcedureCall => self.message(MessageKind::ProcedureCall),
            TypeCode::Stream => self.message(MessageKind::Stream),
            TypeCode::Status => self.message(MessageKind::Status),
            TypeCode::Services => self.message(MessageKind::Services),
            TypeCode::Request => self.message(MessageKind::Request),
            TypeCode::Response => self.message(MessageKind::Response),
            TypeCode::Argument => self.message(MessageKind::Argument),
            TypeCode::Error => self.message(MessageKind::Error),
            TypeCode::Class | TypeCode::Enumeration => {
                if ty.service.is_empty() || ty.name.is_empty() {
                    return Err(KrpcError::InvalidType(format!(
                        "{:?} type requires a service and a name",
                        code
                    )));
                }
                if code == TypeCode::Class {
                    self.class(&ty.service, &ty.name)
                } else {
                    self.enumeration(&ty.service, &ty.name)
                }
            }
            TypeCode::List | TypeCode::Set => {
                let [elem] = ty.types.as_slice() else {
                    return Err(arity_error(code, "exactly 1", ty.types.len()));
                };
                let elem = self.get_or_create(elem)?;
                if code == TypeCode::List {
                    self.list(&elem)
                } else {
                    self.set(&elem)
                }
            }
            TypeCode::Dictionary => {
                let [key, value] = ty.types.as_slice() else {
                    return Err(arity_error(code, "exactly 2", ty.types.len()));
                };
                let key = self.get_or_create(key)?;
                let value = self.get_or_create(value)?;
                self.dictionary(&key, &value)
            }
            TypeCode::Tuple => {
                if ty.types.is_empty() {
                    return Err(arity_error(code, "at least 1", 0));
                }
                let elems = ty
                    .types
                    .iter()
                    .map(|t| self.get_or_create(t))
                    .collect::<Result<Vec<_>>>()?;
                self.tuple(&elems)
            }
        };

        Ok(descriptor)
    }

    pub fn value(&self, kind: ValueKind) -> TypeDescriptor {
        self.intern(pb::Type::of(kind.code()), || TypeKind::Value(kind))
    }

    pub fn message(&self, kind: MessageKind) -> TypeDescriptor {
        self.intern(pb::Type::of(kind.code()), || TypeKind::Message(kind))
    }

    pub fn class(&self, service: &str, name: &str) -> TypeDescriptor {
        self.intern(pb::Type::named(TypeCode::Class, service, name), || {
            TypeKind::Class {
                service: service.to_string(),
                name: name.to_string(),
            }
        })
    }

    /// An enumeration type; its values are bound separately.
    pub fn enumeration(&self, service: &str, name: &str) -> TypeDescriptor {
        self.intern(pb::Type::named(TypeCode::Enumeration, service, name), || {
            TypeKind::Enum {
                service: service.to_string(),
                name: name.to_string(),
                values: OnceLock::new(),
            }
        })
    }

    pub fn list(&self, elem: &TypeDescriptor) -> TypeDescriptor {
        let proto = pb::Type::nested(TypeCode::List, vec![elem.proto().clone()]);
        self.intern(proto, || TypeKind::List(elem.clone()))
    }

    pub fn set(&self, elem: &TypeDescriptor) -> TypeDescriptor {
        let proto = pb::Type::nested(TypeCode::Set, vec![elem.proto().clone()]);
        self.intern(proto, || TypeKind::Set(elem.clone()))
    }

    pub fn dictionary(&self, key: &TypeDescriptor, value: &TypeDescriptor) -> TypeDescriptor {
        let proto = pb::Type::nested(
            TypeCode::Dictionary,
            vec![key.proto().clone(), value.proto().clone()],
        );
        self.intern(proto, || TypeKind::Dictionary(key.clone(), value.clone()))
    }

    pub fn tuple(&self, elems: &[TypeDescriptor]) -> TypeDescriptor {
        let proto = pb::Type::nested(
            TypeCode::Tuple,
            elems.iter().map(|e| e.proto().clone()).collect(),
        );
        self.intern(proto, || TypeKind::Tuple(elems.to_vec()))
    }

    /// Converts `value` into a value of type `ty`.
    ///
    /// Rules, first match wins:
    /// 1. a symbolic enum value passes for an enumeration type
    /// 2. a value whose variant already matches passes
    /// 3. `Null` becomes a null object of any class type
    /// 4. a remote object passes for a class type with the same tag
    /// 5. list/set/tuple targets map their elements (a tuple needs the exact count)
    /// 6. dictionary targets map keys and values
    /// 7. numbers and numeric strings convert to numeric types when in range
    /// 8. scalars are stringified for a string type
    ///
    /// Anything else is a `Coercion` error naming the original value and type.
    pub fn coerce(&self, value: &Value, ty: &TypeDescriptor) -> Result<Value> {
        coerce_value(value, ty).ok_or_else(|| KrpcError::Coercion {
            value: value.to_string(),
            ty: ty.to_string(),
        })
    }

    /// Number of interned descriptors.
    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<pb::Type, TypeDescriptor>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, ty: &pb::Type) -> Option<TypeDescriptor> {
        self.cache().get(ty).cloned()
    }

    fn intern(&self, proto: pb::Type, kind: impl FnOnce() -> TypeKind) -> TypeDescriptor {
        self.cache()
            .entry(proto)
            .or_insert_with_key(|proto| {
                TypeDescriptor(Arc::new(TypeNode {
                    proto: proto.clone(),
                    kind: kind(),
                }))
            })
            .clone()
    }
}

fn arity_error(code: TypeCode, expected: &str, actual: usize) -> KrpcError {
    KrpcError::InvalidType(format!(
        "{:?} type requires {} nested type(s), got {}",
        code, expected, actual
    ))
}

// ============================================================================
// Coercion
// ============================================================================

fn coerce_value(value: &Value, ty: &TypeDescriptor) -> Option<Value> {
    if let (TypeKind::Enum { .. }, Value::Enum(_)) = (ty.kind(), value) {
        return Some(value.clone());
    }
    if matches_natively(value, ty) {
        return Some(value.clone());
    }

    match (ty.kind(), value) {
        (TypeKind::Class { .. }, Value::Null) => Some(Value::Null),
        (TypeKind::Class { .. }, Value::Object(object)) => {
            (ty.class_tag().as_deref() == Some(object.class_tag.as_str())).then(|| value.clone())
        }
        (TypeKind::List(elem), _) => coerce_items(value.as_slice()?, elem).map(Value::List),
        (TypeKind::Set(elem), _) => coerce_items(value.as_slice()?, elem).map(Value::Set),
        (TypeKind::Tuple(elems), _) => {
            let items = value.as_slice()?;
            if items.len() != elems.len() {
                return None;
            }
            items
                .iter()
                .zip(elems)
                .map(|(item, elem)| coerce_value(item, elem))
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple)
        }
        (TypeKind::Dictionary(key_ty, value_ty), Value::Dictionary(entries)) => entries
            .iter()
            .map(|(k, v)| Some((coerce_value(k, key_ty)?, coerce_value(v, value_ty)?)))
            .collect::<Option<Vec<_>>>()
            .map(Value::Dictionary),
        (TypeKind::Value(kind), _) if kind.is_numeric() => numeric_to(*kind, as_number(value)?),
        (TypeKind::Value(ValueKind::String), _) if is_scalar(value) => {
            Some(Value::String(value.to_string()))
        }
        _ => None,
    }
}

fn coerce_items(items: &[Value], elem: &TypeDescriptor) -> Option<Vec<Value>> {
    items.iter().map(|item| coerce_value(item, elem)).collect()
}

fn matches_natively(value: &Value, ty: &TypeDescriptor) -> bool {
    match (ty.kind(), value) {
        (TypeKind::Value(kind), _) => matches!(
            (kind, value),
            (ValueKind::Double, Value::Double(_))
                | (ValueKind::Float, Value::Float(_))
                | (ValueKind::Int32, Value::Int32(_))
                | (ValueKind::Int64, Value::Int64(_))
                | (ValueKind::UInt32, Value::UInt32(_))
                | (ValueKind::UInt64, Value::UInt64(_))
                | (ValueKind::Bool, Value::Bool(_))
                | (ValueKind::String, Value::String(_))
                | (ValueKind::Bytes, Value::Bytes(_))
        ),
        (TypeKind::Message(kind), Value::Message(message)) => message.kind() == *kind,
        _ => false,
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Double(_)
            | Value::Float(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::UInt32(_)
            | Value::UInt64(_)
            | Value::Bool(_)
    )
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Floats truncate toward zero; non-finite floats have no integer value.
    fn as_int(self) -> Option<i128> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) => f.is_finite().then(|| f.trunc() as i128),
        }
    }
}

fn as_number(value: &Value) -> Option<Number> {
    match value {
        Value::Double(v) => Some(Number::Float(*v)),
        Value::Float(v) => Some(Number::Float(*v as f64)),
        Value::Int32(v) => Some(Number::Int(*v as i128)),
        Value::Int64(v) => Some(Number::Int(*v as i128)),
        Value::UInt32(v) => Some(Number::Int(*v as i128)),
        Value::UInt64(v) => Some(Number::Int(*v as i128)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i128>().map(Number::Int).ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Number::Float)
            })
        }
        _ => None,
    }
}

fn numeric_to(kind: ValueKind, number: Number) -> Option<Value> {
    match kind {
        ValueKind::Double => Some(Value::Double(number.as_f64())),
        ValueKind::Float => {
            let v = number.as_f64();
            (!v.is_finite() || v.abs() <= f32::MAX as f64).then(|| Value::Float(v as f32))
        }
        ValueKind::Int32 => i32::try_from(number.as_int()?).ok().map(Value::Int32),
        ValueKind::Int64 => i64::try_from(number.as_int()?).ok().map(Value::Int64),
        ValueKind::UInt32 => u32::try_from(number.as_int()?).ok().map(Value::UInt32),
        ValueKind::UInt64 => u64::try_from(number.as_int()?).ok().map(Value::UInt64),
        ValueKind::Bool | ValueKind::String | ValueKind::Bytes => None,
    }
}
