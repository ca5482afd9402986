//! Protocols and the dispatcher table
//!
//! A protocol maps (method, class) pairs to dispatcher ids. Dispatchers
//! live in an append-only table so call-site caches can refer to them by
//! a plain integer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kdn::Symbol;
use parking_lot::RwLock;

use crate::classes::ClassTable;
use crate::error::Thrown;
use crate::loader::LoadedUnit;
use crate::value::Value;

pub struct Protocol {
    /// Qualified name of the protocol var
    pub name: Symbol,
    pub methods: Vec<Arc<str>>,
    impls: RwLock<HashMap<(Arc<str>, u32), u32>>,
    /// Bumped on every registration; call sites cached under an older
    /// generation must dispatch afresh
    generation: AtomicU32,
}

impl Protocol {
    pub fn new(name: Symbol, methods: Vec<Arc<str>>) -> Self {
        Self {
            name,
            methods,
            impls: RwLock::new(HashMap::new()),
            generation: AtomicU32::new(0),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| &**m == name)
    }

    pub fn register(&self, method: &str, type_id: u32, dispatcher: u32) {
        let mut impls = self.impls.write();
        impls.insert((Arc::from(method), type_id), dispatcher);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Dispatcher for `method` on `type_id`, searching supertypes when the
    /// class itself has no implementation
    pub fn find(&self, method: &str, type_id: u32, classes: &ClassTable) -> Option<u32> {
        let impls = self.impls.read();
        if let Some(d) = impls.get(&(Arc::from(method), type_id)) {
            return Some(*d);
        }
        impls
            .iter()
            .filter(|((m, t), _)| &**m == method && classes.is_subclass(type_id, *t))
            .min_by_key(|((_, t), _)| std::cmp::Reverse(*t))
            .map(|(_, d)| *d)
    }

    pub fn extends(&self, type_id: u32, classes: &ClassTable) -> bool {
        self.methods
            .iter()
            .all(|m| self.find(m, type_id, classes).is_some())
    }

    pub fn missing(&self, method: &str, target: &Value) -> Thrown {
        Thrown::illegal_argument(format!(
            "No implementation of method: :{} of protocol: #'{} found for class: {}",
            method,
            self.name,
            target.class_name()
        ))
    }
}

/// The callable value bound to a protocol method var
pub struct ProtocolMethod {
    pub protocol: Arc<Protocol>,
    pub name: Arc<str>,
}

/// What a call site does once its receiver class is known
pub enum Dispatcher {
    /// Generic keyword lookup
    Lookup,
    /// Read a deftype field directly
    Field(u16),
    /// Call a function with the receiver as first argument
    Fn(Value),
    /// Run the deftype method body of that name with the receiver as `this`
    Method { unit: Arc<LoadedUnit>, name: Arc<str> },
}

pub struct DispatcherTable {
    entries: RwLock<Vec<Arc<Dispatcher>>>,
    fields: RwLock<HashMap<(u32, u16), u32>>,
}

impl DispatcherTable {
    pub const LOOKUP: u32 = 0;

    pub fn new() -> Self {
        Self {
            entries: RwLock::new(vec![Arc::new(Dispatcher::Lookup)]),
            fields: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, dispatcher: Dispatcher) -> u32 {
        let mut entries = self.entries.write();
        entries.push(Arc::new(dispatcher));
        (entries.len() - 1) as u32
    }

    /// Shared field dispatcher for (class, field index)
    pub fn field(&self, type_id: u32, index: u16) -> u32 {
        if let Some(id) = self.fields.read().get(&(type_id, index)) {
            return *id;
        }
        let id = self.register(Dispatcher::Field(index));
        *self.fields.write().entry((type_id, index)).or_insert(id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Dispatcher>> {
        self.entries.read().get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for DispatcherTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::class_id;

    #[test]
    fn test_field_dispatchers_are_shared() {
        let table = DispatcherTable::new();
        let a = table.field(70, 1);
        let b = table.field(70, 1);
        let c = table.field(71, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_find_falls_back_to_supertypes() {
        let classes = ClassTable::new();
        let p = Protocol::new(Symbol::qualified("user", "Shape"), vec![Arc::from("area")]);
        p.register("area", class_id::NUMBER, 5);
        assert_eq!(p.find("area", class_id::LONG, &classes), Some(5));
        p.register("area", class_id::LONG, 6);
        assert_eq!(p.find("area", class_id::LONG, &classes), Some(6));
        assert_eq!(p.find("area", class_id::STRING, &classes), None);
    }

    #[test]
    fn test_register_bumps_generation() {
        let p = Protocol::new(Symbol::qualified("user", "Shape"), vec![Arc::from("area")]);
        assert_eq!(p.generation(), 0);
        p.register("area", class_id::LONG, 5);
        p.register("area", class_id::LONG, 6);
        assert_eq!(p.generation(), 2);
        assert_eq!(p.find("area", class_id::LONG, &ClassTable::new()), Some(6));
    }

    #[test]
    fn test_missing_message() {
        let p = Protocol::new(Symbol::qualified("user", "Shape"), vec![Arc::from("area")]);
        let err = p.missing("area", &Value::string("x"));
        assert_eq!(
            err.message(),
            Some("No implementation of method: :area of protocol: #'user/Shape found for class: String")
        );
    }
}
