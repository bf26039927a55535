use std::collections::BTreeMap;
use std::sync::Arc;

use krpc_common::{pb, KrpcError, Result};

use crate::builtin::{KrpcProcedures, KRPC_SERVICE};
use crate::procedure::ProcedureSignature;
use crate::types::{EnumValues, TypeDescriptor, TypeRegistry};

/// One service as reflected by the server.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub name: String,
    pub documentation: String,
    pub procedures: BTreeMap<String, Arc<ProcedureSignature>>,
    pub classes: BTreeMap<String, TypeDescriptor>,
    pub enumerations: BTreeMap<String, TypeDescriptor>,
    pub exceptions: Vec<String>,
}

/// Known services and their procedure signatures.
///
/// Starts out with the built-in `KRPC` procedures. [`load`](Self::load)
/// adds everything the server reports through `GetServices`, binding
/// enumeration values in the type registry on the way.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: BTreeMap<String, ServiceInfo>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding only the built-in `KRPC` procedures.
    pub fn with_builtins(krpc: &KrpcProcedures) -> Self {
        let service = ServiceInfo {
            name: KRPC_SERVICE.to_string(),
            procedures: krpc
                .all()
                .into_iter()
                .map(|sig| (sig.name.clone(), Arc::clone(sig)))
                .collect(),
            ..Default::default()
        };
        let mut catalog = Self::new();
        catalog.services.insert(service.name.clone(), service);
        catalog
    }

    /// Registers every service in a `GetServices` reply.
    ///
    /// Nothing is replaced unless the whole reply is valid. Services already
    /// known are replaced by the reflected version.
    pub fn load(&mut self, services: &pb::Services, registry: &TypeRegistry) -> Result<()> {
        let loaded = services
            .services
            .iter()
            .map(|service| Self::reflect(service, registry))
            .collect::<Result<Vec<_>>>()?;

        for service in loaded {
            tracing::debug!(
                "Loaded service {} ({} procedures, {} classes, {} enumerations)",
                service.name,
                service.procedures.len(),
                service.classes.len(),
                service.enumerations.len()
            );
            self.services.insert(service.name.clone(), service);
        }
        Ok(())
    }

    fn reflect(service: &pb::Service, registry: &TypeRegistry) -> Result<ServiceInfo> {
        let name = service.name.as_str();

        // Enumerations are bound before procedures so default values of enum
        // parameters can be decoded as soon as the signature exists.
        let mut enumerations = BTreeMap::new();
        for enumeration in &service.enumerations {
            let ty = registry.enumeration(name, &enumeration.name);
            ty.set_values(EnumValues::from(enumeration))?;
            enumerations.insert(enumeration.name.clone(), ty);
        }

        let classes = service
            .classes
            .iter()
            .map(|class| (class.name.clone(), registry.class(name, &class.name)))
            .collect();

        let procedures = service
            .procedures
            .iter()
            .map(|procedure| {
                ProcedureSignature::from_proto(name, procedure, registry)
                    .map(|sig| (procedure.name.clone(), Arc::new(sig)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(ServiceInfo {
            name: name.to_string(),
            documentation: service.documentation.clone(),
            procedures,
            classes,
            enumerations,
            exceptions: service.exceptions.iter().map(|e| e.name.clone()).collect(),
        })
    }

    /// Looks up a procedure's signature.
    pub fn describe(&self, service: &str, procedure: &str) -> Result<Arc<ProcedureSignature>> {
        self.services
            .get(service)
            .and_then(|s| s.procedures.get(procedure))
            .cloned()
            .ok_or_else(|| KrpcError::UnknownProcedure(format!("{}.{}", service, procedure)))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn class(&self, service: &str, name: &str) -> Option<TypeDescriptor> {
        self.services.get(service)?.classes.get(name).cloned()
    }

    pub fn enumeration(&self, service: &str, name: &str) -> Option<TypeDescriptor> {
        self.services.get(service)?.enumerations.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::MemberKind;
    use krpc_common::pb::TypeCode;

    fn space_center() -> pb::Service {
        pb::Service {
            name: "SpaceCenter".to_string(),
            procedures: vec![
                pb::Procedure {
                    name: "get_ActiveVessel".to_string(),
                    return_type: Some(pb::Type::named(TypeCode::Class, "SpaceCenter", "Vessel")),
                    ..Default::default()
                },
                pb::Procedure {
                    name: "Vessel_get_Situation".to_string(),
                    parameters: vec![pb::Parameter {
                        name: "this".to_string(),
                        ty: Some(pb::Type::named(TypeCode::Class, "SpaceCenter", "Vessel")),
                        ..Default::default()
                    }],
                    return_type: Some(pb::Type::named(
                        TypeCode::Enumeration,
                        "SpaceCenter",
                        "VesselSituation",
                    )),
                    ..Default::default()
                },
            ],
            classes: vec![pb::Class {
                name: "Vessel".to_string(),
                documentation: String::new(),
            }],
            enumerations: vec![pb::Enumeration {
                name: "VesselSituation".to_string(),
                values: vec![
                    pb::EnumerationValue {
                        name: "PreLaunch".to_string(),
                        value: 0,
                        documentation: String::new(),
                    },
                    pb::EnumerationValue {
                        name: "Orbiting".to_string(),
                        value: 1,
                        documentation: String::new(),
                    },
                ],
                documentation: String::new(),
            }],
            exceptions: vec![],
            documentation: "Space center".to_string(),
        }
    }

    #[test]
    fn test_builtins_are_described() {
        let registry = TypeRegistry::new();
        let catalog = ServiceCatalog::with_builtins(&KrpcProcedures::new(&registry));

        let sig = catalog.describe("KRPC", "GetStatus").unwrap();
        assert_eq!(sig.full_name(), "KRPC.GetStatus");
        assert_eq!(catalog.service_names().collect::<Vec<_>>(), vec!["KRPC"]);
    }

    #[test]
    fn test_unknown_procedure() {
        let catalog = ServiceCatalog::new();
        match catalog.describe("SpaceCenter", "WarpTo") {
            Err(KrpcError::UnknownProcedure(name)) => assert_eq!(name, "SpaceCenter.WarpTo"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_registers_types_and_procedures() {
        let registry = TypeRegistry::new();
        let mut catalog = ServiceCatalog::new();
        let services = pb::Services {
            services: vec![space_center()],
        };
        catalog.load(&services, &registry).unwrap();

        let situation = catalog.enumeration("SpaceCenter", "VesselSituation").unwrap();
        assert_eq!(situation.enum_values().unwrap().value_of("Orbiting"), Some(1));
        assert_eq!(
            catalog.class("SpaceCenter", "Vessel").unwrap(),
            registry.class("SpaceCenter", "Vessel")
        );

        let sig = catalog.describe("SpaceCenter", "Vessel_get_Situation").unwrap();
        assert_eq!(sig.member_kind, MemberKind::ClassPropertyGetter);
        assert_eq!(sig.return_type.as_ref(), Some(&situation));

        let service = catalog.service("SpaceCenter").unwrap();
        assert_eq!(service.documentation, "Space center");
    }

    #[test]
    fn test_invalid_reply_changes_nothing() {
        let registry = TypeRegistry::new();
        let mut catalog = ServiceCatalog::new();

        let mut broken = space_center();
        broken.procedures.push(pb::Procedure {
            name: "a_b_c_d".to_string(),
            ..Default::default()
        });
        let services = pb::Services {
            services: vec![broken],
        };

        assert!(catalog.load(&services, &registry).is_err());
        assert!(catalog.service("SpaceCenter").is_none());
    }
}
