//! Unit loading
//!
//! Links a compiled unit against the runtime: constants become values,
//! host references resolve to native members, and every call site gets
//! its own cache cell. Loading a type unit attaches its method bodies to
//! the declared deftype and registers its protocol implementations.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use kdn::{Keyword, Symbol};
use kir_core::{Constant, HostKind, HostRef, Unit, UnitKind};
use log::debug;

use crate::cache::CallSiteCache;
use crate::classes::HostMember;
use crate::error::LoadError;
use crate::protocol::{Dispatcher, ProtocolMethod};
use crate::runtime::Runtime;
use crate::value::{Closure, TypeRef, Value};

pub struct KeywordSiteCell {
    pub keyword: Keyword,
    pub cache: CallSiteCache,
}

pub struct ProtocolSiteCell {
    pub method: Arc<ProtocolMethod>,
    pub cache: CallSiteCache,
    /// Protocol generation the cached entry was resolved under
    pub generation: AtomicU32,
}

/// A unit linked against a runtime
pub struct LoadedUnit {
    pub unit: Arc<Unit>,
    pub constants: Vec<Value>,
    /// Resolved host members, parallel to `constants`
    pub hosts: Vec<Option<HostMember>>,
    pub keyword_sites: Vec<KeywordSiteCell>,
    pub protocol_sites: Vec<ProtocolSiteCell>,
    pub children: Vec<Arc<LoadedUnit>>,
}

impl LoadedUnit {
    pub fn name(&self) -> &str {
        &self.unit.name
    }
}

impl Runtime {
    /// Link `unit` and its nested units
    pub fn load(&self, unit: Arc<Unit>) -> Result<Arc<LoadedUnit>, LoadError> {
        let mut constants = Vec::with_capacity(unit.constants.len());
        let mut hosts = Vec::with_capacity(unit.constants.len());
        for constant in &unit.constants {
            let (value, host) = self.link_constant(constant)?;
            constants.push(value);
            hosts.push(host);
        }

        let keyword_sites = unit
            .keyword_sites
            .iter()
            .map(|s| KeywordSiteCell {
                keyword: s.keyword.clone(),
                cache: CallSiteCache::new(),
            })
            .collect();

        let mut protocol_sites = Vec::with_capacity(unit.protocol_sites.len());
        for site in &unit.protocol_sites {
            let method = self.protocol_method(&site.method_var)?;
            protocol_sites.push(ProtocolSiteCell {
                generation: AtomicU32::new(method.protocol.generation()),
                method,
                cache: CallSiteCache::new(),
            });
        }

        let mut children = Vec::with_capacity(unit.children.len());
        for child in &unit.children {
            children.push(self.load(child.clone())?);
        }

        let loaded = Arc::new(LoadedUnit {
            unit: unit.clone(),
            constants,
            hosts,
            keyword_sites,
            protocol_sites,
            children,
        });

        if let UnitKind::Type { name, protocols } = &unit.kind {
            self.attach_type(&loaded, name, protocols)?;
        }
        debug!(
            "loaded unit {} ({} methods, {} constants)",
            unit.name,
            unit.methods.len(),
            unit.constants.len()
        );
        Ok(loaded)
    }

    /// A function value for a loaded unit without captures
    pub fn instantiate(&self, unit: &Arc<LoadedUnit>) -> Value {
        Value::Fn(Arc::new(Closure {
            unit: unit.clone(),
            fields: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    fn link_constant(
        &self,
        constant: &Constant,
    ) -> Result<(Value, Option<HostMember>), LoadError> {
        Ok(match constant {
            Constant::Form(form) => (Value::from_form(form), None),
            Constant::Var(sym) => (Value::Var(self.link_var(sym)?), None),
            Constant::Type(name) => {
                let class = self
                    .classes
                    .lookup(name)
                    .ok_or_else(|| LoadError::UnknownType(name.clone()))?;
                (
                    Value::Type(TypeRef {
                        id: class.id,
                        name: class.name.clone(),
                    }),
                    None,
                )
            }
            Constant::Host(host) => (
                Value::string(&host.member),
                Some(self.link_host(host)?),
            ),
        })
    }

    fn link_var(&self, sym: &Symbol) -> Result<Arc<crate::namespace::Var>, LoadError> {
        let ns = sym
            .ns()
            .ok_or_else(|| LoadError::UnknownNamespace(sym.to_string()))?;
        let ns = self
            .find_ns(ns)
            .ok_or_else(|| LoadError::UnknownNamespace(ns.to_string()))?;
        Ok(ns.intern(sym.name()))
    }

    fn link_host(&self, host: &HostRef) -> Result<HostMember, LoadError> {
        let missing = || LoadError::UnknownHostMember {
            class: host.class.clone(),
            member: host.member.clone(),
        };
        let class = self.classes.lookup(&host.class).ok_or_else(missing)?;
        let name = if host.kind == HostKind::Constructor {
            "new"
        } else {
            host.member.as_str()
        };
        self.classes
            .find_members(&class, host.kind, name)
            .into_iter()
            .find(|m| m.params == host.params && m.ret == host.ret)
            .ok_or_else(missing)
    }

    fn protocol_method(&self, sym: &Symbol) -> Result<Arc<ProtocolMethod>, LoadError> {
        let var = self.link_var(sym)?;
        match var.root() {
            Some(Value::ProtocolMethod(m)) => Ok(m),
            _ => Err(LoadError::NotAProtocolMethod(sym.to_string())),
        }
    }

    fn attach_type(
        &self,
        loaded: &Arc<LoadedUnit>,
        name: &str,
        protocols: &[Symbol],
    ) -> Result<(), LoadError> {
        let class = self
            .classes
            .lookup(name)
            .ok_or_else(|| LoadError::UnknownType(name.to_string()))?;
        let typedef = class
            .deftype
            .clone()
            .ok_or_else(|| LoadError::UnknownType(name.to_string()))?;
        *typedef.methods.write() = Some(loaded.clone());

        for proto_sym in protocols {
            let var = self.link_var(proto_sym)?;
            let protocol = match var.root() {
                Some(Value::Protocol(p)) => p,
                _ => return Err(LoadError::UnknownType(proto_sym.to_string())),
            };
            for method in protocol.methods.iter() {
                if loaded.unit.methods.iter().any(|m| m.name == **method) {
                    let d = self.dispatchers.register(Dispatcher::Method {
                        unit: loaded.clone(),
                        name: method.clone(),
                    });
                    protocol.register(method, class.id, d);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdn::Form;
    use kir_core::{HostType, MethodBuilder, Op, Prim, ProtocolSite};

    use crate::runtime::USER_NS;

    fn unit_with(constants: Vec<Constant>) -> Unit {
        let mut b = MethodBuilder::new("invoke", 0, false);
        b.emit(Op::Nil);
        b.emit(Op::Return);
        Unit {
            name: "test$fn".to_string(),
            kind: UnitKind::Fn { once: false },
            methods: vec![b.finish()],
            closed_over: Vec::new(),
            constants,
            keyword_sites: Vec::new(),
            protocol_sites: Vec::new(),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_links_forms_and_vars() {
        let rt = Runtime::new();
        let sym = Symbol::qualified(USER_NS, "fresh");
        let unit = unit_with(vec![Constant::Form(Form::Long(3)), Constant::Var(sym.clone())]);
        let loaded = rt.load(Arc::new(unit)).unwrap();
        assert_eq!(loaded.constants[0].as_long(), Some(3));
        assert!(matches!(loaded.constants[1], Value::Var(_)));
        assert!(loaded.hosts.iter().all(Option::is_none));
        assert!(rt.resolve_var(&sym).is_some());
    }

    #[test]
    fn test_unknown_type_fails() {
        let rt = Runtime::new();
        let unit = unit_with(vec![Constant::Type("NoSuchType".to_string())]);
        let err = rt.load(Arc::new(unit)).err();
        assert_eq!(err, Some(LoadError::UnknownType("NoSuchType".to_string())));
    }

    #[test]
    fn test_unqualified_var_fails() {
        let rt = Runtime::new();
        let unit = unit_with(vec![Constant::Var(Symbol::new("loose"))]);
        assert!(matches!(
            rt.load(Arc::new(unit)),
            Err(LoadError::UnknownNamespace(_))
        ));
    }

    #[test]
    fn test_host_signature_must_match() {
        let rt = Runtime::new();
        let host = |member: &str, ret: HostType| {
            Constant::Host(HostRef {
                class: "Numbers".to_string(),
                member: member.to_string(),
                kind: HostKind::StaticMethod,
                params: vec![HostType::Prim(Prim::Long)],
                ret,
            })
        };

        let ok = rt
            .load(Arc::new(unit_with(vec![host("inc", HostType::Prim(Prim::Long))])))
            .unwrap();
        assert!(ok.hosts[0].is_some());

        let err = rt
            .load(Arc::new(unit_with(vec![host("inc", HostType::Prim(Prim::Double))])))
            .err();
        assert_eq!(
            err,
            Some(LoadError::UnknownHostMember {
                class: "Numbers".to_string(),
                member: "inc".to_string(),
            })
        );
    }

    #[test]
    fn test_protocol_site_needs_protocol_method() {
        let rt = Runtime::new();
        rt.intern(USER_NS, "plain").bind_root(Value::Long(1));
        let mut unit = unit_with(Vec::new());
        unit.protocol_sites.push(ProtocolSite {
            method_var: Symbol::qualified(USER_NS, "plain"),
        });
        let err = rt.load(Arc::new(unit)).err();
        assert_eq!(
            err,
            Some(LoadError::NotAProtocolMethod(format!("{}/plain", USER_NS)))
        );
    }

    #[test]
    fn test_children_load_with_parent() {
        let rt = Runtime::new();
        let mut parent = unit_with(Vec::new());
        parent.children.push(Arc::new(unit_with(vec![Constant::Form(Form::Nil)])));
        let loaded = rt.load(Arc::new(parent)).unwrap();
        assert_eq!(loaded.children.len(), 1);
        assert!(loaded.children[0].constants[0].is_nil());
        assert_eq!(loaded.name(), "test$fn");
    }
}
