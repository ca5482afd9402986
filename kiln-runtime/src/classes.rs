//! Class table
//!
//! Every runtime type has a numeric id. Built-in classes have fixed ids so
//! values can report their type without touching the table; deftypes are
//! assigned ids as they are defined. Host members hang off their class.

use std::collections::HashMap;
use std::sync::Arc;

use kir_core::{HostKind, HostType};
use parking_lot::RwLock;

use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::{Slot, TypeDef};

/// Fixed ids of the built-in classes
pub mod class_id {
    pub const OBJECT: u32 = 1;
    pub const NIL: u32 = 2;
    pub const BOOLEAN: u32 = 3;
    pub const NUMBER: u32 = 4;
    pub const LONG: u32 = 5;
    pub const DOUBLE: u32 = 6;
    pub const CHARACTER: u32 = 7;
    pub const STRING: u32 = 8;
    pub const KEYWORD: u32 = 9;
    pub const SYMBOL: u32 = 10;
    pub const LIST: u32 = 11;
    pub const VECTOR: u32 = 12;
    pub const MAP: u32 = 13;
    pub const SET: u32 = 14;
    pub const IFN: u32 = 15;
    pub const FN: u32 = 16;
    pub const NATIVE_FN: u32 = 17;
    pub const VAR: u32 = 18;
    pub const CLASS: u32 = 19;
    pub const PROTOCOL: u32 = 20;
    pub const PROTOCOL_METHOD: u32 = 21;
    pub const THROWABLE: u32 = 22;
    pub const EXCEPTION: u32 = 23;
    pub const RUNTIME_EXCEPTION: u32 = 24;
    pub const ILLEGAL_ARGUMENT: u32 = 25;
    pub const ILLEGAL_STATE: u32 = 26;
    pub const ARITHMETIC: u32 = 27;
    pub const CLASS_CAST: u32 = 28;
    pub const UNSUPPORTED: u32 = 29;
    pub const INDEX_OUT_OF_BOUNDS: u32 = 30;
    pub const NULL_POINTER: u32 = 31;
    pub const EXCEPTION_INFO: u32 = 32;
    pub const ARITY: u32 = 33;
    pub const MATH: u32 = 34;
    pub const NUMBERS: u32 = 35;
    pub const RT: u32 = 36;
    pub const UTIL: u32 = 37;
    pub const STRING_BUILDER: u32 = 38;
    pub const SYSTEM: u32 = 39;
    pub const INTEGER: u32 = 40;
    pub const SEQUENTIAL: u32 = 41;
    pub const ERROR: u32 = 42;
    pub const STACK_OVERFLOW: u32 = 43;

    /// First id handed out to deftypes
    pub const FIRST_USER: u32 = 64;

    /// (id, name, direct supertypes)
    pub const BUILTINS: &[(u32, &str, &[u32])] = &[
        (OBJECT, "Object", &[]),
        (NIL, "nil", &[]),
        (BOOLEAN, "Boolean", &[OBJECT]),
        (NUMBER, "Number", &[OBJECT]),
        (LONG, "Long", &[NUMBER]),
        (DOUBLE, "Double", &[NUMBER]),
        (CHARACTER, "Character", &[OBJECT]),
        (STRING, "String", &[OBJECT]),
        (KEYWORD, "Keyword", &[IFN]),
        (SYMBOL, "Symbol", &[OBJECT]),
        (LIST, "PersistentList", &[SEQUENTIAL]),
        (VECTOR, "PersistentVector", &[SEQUENTIAL, IFN]),
        (MAP, "PersistentMap", &[IFN]),
        (SET, "PersistentSet", &[IFN]),
        (IFN, "IFn", &[OBJECT]),
        (FN, "Fn", &[IFN]),
        (NATIVE_FN, "NativeFn", &[IFN]),
        (VAR, "Var", &[IFN]),
        (CLASS, "Class", &[OBJECT]),
        (PROTOCOL, "Protocol", &[OBJECT]),
        (PROTOCOL_METHOD, "ProtocolMethod", &[IFN]),
        (THROWABLE, "Throwable", &[OBJECT]),
        (EXCEPTION, "Exception", &[THROWABLE]),
        (RUNTIME_EXCEPTION, "RuntimeException", &[EXCEPTION]),
        (ILLEGAL_ARGUMENT, "IllegalArgumentException", &[RUNTIME_EXCEPTION]),
        (ILLEGAL_STATE, "IllegalStateException", &[RUNTIME_EXCEPTION]),
        (ARITHMETIC, "ArithmeticException", &[RUNTIME_EXCEPTION]),
        (CLASS_CAST, "ClassCastException", &[RUNTIME_EXCEPTION]),
        (UNSUPPORTED, "UnsupportedOperationException", &[RUNTIME_EXCEPTION]),
        (INDEX_OUT_OF_BOUNDS, "IndexOutOfBoundsException", &[RUNTIME_EXCEPTION]),
        (NULL_POINTER, "NullPointerException", &[RUNTIME_EXCEPTION]),
        (EXCEPTION_INFO, "ExceptionInfo", &[RUNTIME_EXCEPTION]),
        (ARITY, "ArityException", &[ILLEGAL_ARGUMENT]),
        (MATH, "Math", &[OBJECT]),
        (NUMBERS, "Numbers", &[OBJECT]),
        (RT, "RT", &[OBJECT]),
        (UTIL, "Util", &[OBJECT]),
        (STRING_BUILDER, "StringBuilder", &[OBJECT]),
        (SYSTEM, "System", &[OBJECT]),
        (INTEGER, "Integer", &[NUMBER]),
        (SEQUENTIAL, "Sequential", &[OBJECT]),
        (ERROR, "Error", &[THROWABLE]),
        (STACK_OVERFLOW, "StackOverflowError", &[ERROR]),
    ];

    pub fn name(id: u32) -> Option<&'static str> {
        BUILTINS
            .iter()
            .find(|(i, _, _)| *i == id)
            .map(|(_, name, _)| *name)
    }

    pub fn supers(id: u32) -> &'static [u32] {
        BUILTINS
            .iter()
            .find(|(i, _, _)| *i == id)
            .map(|(_, _, supers)| *supers)
            .unwrap_or(&[])
    }
}

/// Native implementation of a host member. Receivers come first for
/// instance methods; static fields take no arguments.
pub type HostFn = fn(&Runtime, &[Slot]) -> Result<Slot>;

/// A host method, constructor or static field
#[derive(Clone)]
pub struct HostMember {
    pub name: &'static str,
    pub kind: HostKind,
    pub params: Vec<HostType>,
    pub ret: HostType,
    pub func: HostFn,
}

impl HostMember {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl std::fmt::Debug for HostMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A class: a built-in, a host class, or a deftype
#[derive(Debug)]
pub struct Class {
    pub id: u32,
    pub name: Arc<str>,
    pub supers: Vec<u32>,
    pub members: Vec<HostMember>,
    pub deftype: Option<Arc<TypeDef>>,
}

impl Class {
    pub fn members<'a>(
        &'a self,
        kind: HostKind,
        name: &'a str,
    ) -> impl Iterator<Item = &'a HostMember> + 'a {
        self.members
            .iter()
            .filter(move |m| m.kind == kind && m.name == name)
    }

    pub fn has_member(&self, kind: HostKind, name: &str) -> bool {
        self.members(kind, name).next().is_some()
    }
}

/// All classes known to a runtime
pub struct ClassTable {
    by_id: RwLock<Vec<Option<Arc<Class>>>>,
    by_name: RwLock<HashMap<Arc<str>, u32>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(Vec::new()),
            by_name: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        let id = class.id as usize;
        let mut by_id = self.by_id.write();
        if by_id.len() <= id {
            by_id.resize(id + 1, None);
        }
        by_id[id] = Some(class.clone());
        self.by_name.write().insert(class.name.clone(), class.id);
        class
    }

    /// Next free deftype id
    pub(crate) fn next_id(&self) -> u32 {
        (self.by_id.read().len() as u32).max(class_id::FIRST_USER)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Class>> {
        self.by_id.read().get(id as usize).cloned().flatten()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Class>> {
        let id = *self.by_name.read().get(name)?;
        self.get(id)
    }

    pub fn name_of(&self, id: u32) -> String {
        match self.get(id) {
            Some(class) => class.name.to_string(),
            None => class_id::name(id).unwrap_or("Object").to_string(),
        }
    }

    /// True when `id` is `target` or inherits from it
    pub fn is_subclass(&self, id: u32, target: u32) -> bool {
        if id == target || (target == class_id::OBJECT && id != class_id::NIL) {
            return true;
        }
        let supers = match self.get(id) {
            Some(class) => class.supers.clone(),
            None => class_id::supers(id).to_vec(),
        };
        supers.into_iter().any(|s| self.is_subclass(s, target))
    }

    /// Find a member on a class or its supertypes
    pub fn find_members(&self, class: &Class, kind: HostKind, name: &str) -> Vec<HostMember> {
        let mut found: Vec<HostMember> = class.members(kind, name).cloned().collect();
        if kind == HostKind::Method {
            for s in &class.supers {
                if let Some(parent) = self.get(*s) {
                    for m in self.find_members(&parent, kind, name) {
                        if !found.iter().any(|f| f.params == m.params) {
                            found.push(m);
                        }
                    }
                }
            }
        }
        found
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassTable {
        let table = ClassTable::new();
        for (id, name, supers) in class_id::BUILTINS {
            table.insert(Class {
                id: *id,
                name: Arc::from(*name),
                supers: supers.to_vec(),
                members: Vec::new(),
                deftype: None,
            });
        }
        table
    }

    #[test]
    fn test_exception_hierarchy() {
        let t = table();
        assert!(t.is_subclass(class_id::ARITY, class_id::RUNTIME_EXCEPTION));
        assert!(t.is_subclass(class_id::EXCEPTION_INFO, class_id::THROWABLE));
        assert!(!t.is_subclass(class_id::EXCEPTION, class_id::RUNTIME_EXCEPTION));
        assert!(t.is_subclass(class_id::LONG, class_id::NUMBER));
        assert!(!t.is_subclass(class_id::NIL, class_id::OBJECT));
    }

    #[test]
    fn test_lookup_by_name() {
        let t = table();
        assert_eq!(t.lookup("Long").map(|c| c.id), Some(class_id::LONG));
        assert!(t.lookup("Nope").is_none());
        assert_eq!(t.next_id(), class_id::FIRST_USER);
    }
}
