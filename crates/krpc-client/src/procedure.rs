//! Procedure signatures and procedure-name parsing.
//!
//! The server flattens classes and properties into plain procedure names:
//!
//! ```text
//! WarpTo                  plain procedure
//! get_ActiveVessel        service property getter
//! set_ActiveVessel        service property setter
//! Vessel_Recover          class method
//! Vessel_get_Name         class property getter
//! Vessel_set_Name         class property setter
//! Vessel_static_Launch    static class method
//! ```

use krpc_common::{pb, KrpcError, Result};

use crate::types::{TypeDescriptor, TypeRegistry};

/// What a procedure stands for in the service's object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Plain,
    PropertyGetter,
    PropertySetter,
    ClassMethod,
    ClassStaticMethod,
    ClassPropertyGetter,
    ClassPropertySetter,
}

impl MemberKind {
    pub fn is_setter(self) -> bool {
        matches!(self, MemberKind::PropertySetter | MemberKind::ClassPropertySetter)
    }

    pub fn is_class_member(self) -> bool {
        matches!(
            self,
            MemberKind::ClassMethod
                | MemberKind::ClassStaticMethod
                | MemberKind::ClassPropertyGetter
                | MemberKind::ClassPropertySetter
        )
    }
}

/// A procedure name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureName {
    pub kind: MemberKind,
    /// Method or property name
    pub member: String,
    /// Owning class, for class members
    pub class: Option<String>,
}

impl ProcedureName {
    /// Parses a procedure name.
    ///
    /// # Errors
    ///
    /// `InvalidProcedureName` for an empty name, more than three `_`-separated
    /// parts, or a three-part name whose middle part is not `get`, `set` or
    /// `static`.
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(KrpcError::InvalidProcedureName(
                "Procedure name is empty".to_string(),
            ));
        }

        let parts: Vec<&str> = name.split('_').collect();
        let (kind, class, member) = match parts.as_slice() {
            [member] => (MemberKind::Plain, None, member),
            ["get", member] => (MemberKind::PropertyGetter, None, member),
            ["set", member] => (MemberKind::PropertySetter, None, member),
            [class, member] => (MemberKind::ClassMethod, Some(class), member),
            [class, "get", member] => (MemberKind::ClassPropertyGetter, Some(class), member),
            [class, "set", member] => (MemberKind::ClassPropertySetter, Some(class), member),
            [class, "static", member] => (MemberKind::ClassStaticMethod, Some(class), member),
            _ => return Err(KrpcError::InvalidProcedureName(name.to_string())),
        };

        Ok(Self {
            kind,
            member: member.to_string(),
            class: class.map(|c| c.to_string()),
        })
    }
}

/// A parameter as declared by the server.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeDescriptor,
    /// Encoded default value; parameters with one may be omitted
    pub default: Option<Vec<u8>>,
    pub nullable: bool,
}

/// Everything needed to bind arguments to a procedure and decode its result.
#[derive(Debug, Clone)]
pub struct ProcedureSignature {
    pub service: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeDescriptor>,
    pub return_nullable: bool,
    pub member_kind: MemberKind,
    pub documentation: String,
}

impl ProcedureSignature {
    /// Builds a signature from a reflected `Procedure`, interning its types.
    pub fn from_proto(
        service: &str,
        procedure: &pb::Procedure,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let member_kind = ProcedureName::parse(&procedure.name)?.kind;

        let parameters = procedure
            .parameters
            .iter()
            .map(|param| -> Result<Parameter> {
                let ty = param.ty.as_ref().ok_or_else(|| {
                    KrpcError::InvalidType(format!(
                        "parameter {} of {}.{} has no type",
                        param.name, service, procedure.name
                    ))
                })?;
                Ok(Parameter {
                    name: param.name.clone(),
                    ty: registry.get_or_create(ty)?,
                    default: param.default_value.clone(),
                    nullable: param.nullable,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let return_type = procedure
            .return_type
            .as_ref()
            .map(|ty| registry.get_or_create(ty))
            .transpose()?;

        Ok(Self {
            service: service.to_string(),
            name: procedure.name.clone(),
            parameters,
            return_type,
            return_nullable: procedure.return_is_nullable,
            member_kind,
            documentation: procedure.documentation.clone(),
        })
    }

    /// Number of leading parameters that have no default value.
    pub fn required_count(&self) -> usize {
        self.parameters
            .iter()
            .position(|p| p.default.is_some())
            .unwrap_or(self.parameters.len())
    }

    /// `"{service}.{procedure}"`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }
}
