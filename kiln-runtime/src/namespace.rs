//! Namespaces, vars and thread-local dynamic bindings

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use kdn::Symbol;
use parking_lot::RwLock;

use crate::error::{Result, Thrown};
use crate::value::Value;

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BINDINGS: RefCell<Vec<HashMap<u64, Value>>> = const { RefCell::new(Vec::new()) };
}

/// Replacement of a var call by a static host call at a fixed arity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inline {
    pub class: &'static str,
    pub method: &'static str,
    pub arities: &'static [usize],
}

impl Inline {
    pub fn applies(&self, argc: usize) -> bool {
        self.arities.contains(&argc)
    }
}

/// A named, namespace-qualified mutable reference
pub struct Var {
    pub id: u64,
    pub ns: Arc<str>,
    pub name: Arc<str>,
    root: RwLock<Option<Value>>,
    meta: RwLock<IndexMap<Arc<str>, Value>>,
    dynamic: AtomicBool,
    macro_flag: AtomicBool,
    inline: RwLock<Option<Inline>>,
}

impl Var {
    pub fn new(ns: &str, name: &str) -> Self {
        Self {
            id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
            ns: Arc::from(ns),
            name: Arc::from(name),
            root: RwLock::new(None),
            meta: RwLock::new(IndexMap::new()),
            dynamic: AtomicBool::new(false),
            macro_flag: AtomicBool::new(false),
            inline: RwLock::new(None),
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::qualified(&*self.ns, &*self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.root.read().is_some() || self.thread_value().is_some()
    }

    pub fn root(&self) -> Option<Value> {
        self.root.read().clone()
    }

    pub fn bind_root(&self, value: Value) {
        *self.root.write() = Some(value);
    }

    fn thread_value(&self) -> Option<Value> {
        if !self.is_dynamic() {
            return None;
        }
        BINDINGS.with(|frames| {
            frames
                .borrow()
                .iter()
                .rev()
                .find_map(|frame| frame.get(&self.id).cloned())
        })
    }

    /// Current value: the innermost thread binding, else the root
    pub fn get(&self) -> Result<Value> {
        if let Some(v) = self.thread_value() {
            return Ok(v);
        }
        self.root().ok_or_else(|| {
            Thrown::illegal_state(format!("Attempting to call unbound fn: #'{}/{}", self.ns, self.name))
        })
    }

    /// `set!` on a thread-bound var
    pub fn set(&self, value: Value) -> Result<Value> {
        let id = self.id;
        let updated = BINDINGS.with(|frames| {
            let mut frames = frames.borrow_mut();
            match frames.iter_mut().rev().find(|f| f.contains_key(&id)) {
                Some(frame) => {
                    frame.insert(id, value.clone());
                    true
                }
                None => false,
            }
        });
        if updated {
            Ok(value)
        } else {
            Err(Thrown::illegal_state(format!(
                "Can't change/establish root binding of: {} with set",
                self.name
            )))
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.load(Ordering::Relaxed)
    }

    pub fn set_dynamic(&self, dynamic: bool) {
        self.dynamic.store(dynamic, Ordering::Relaxed);
    }

    pub fn is_macro(&self) -> bool {
        self.macro_flag.load(Ordering::Relaxed)
    }

    pub fn set_macro(&self, flag: bool) {
        self.macro_flag.store(flag, Ordering::Relaxed);
    }

    pub fn inline(&self) -> Option<Inline> {
        *self.inline.read()
    }

    pub fn set_inline(&self, inline: Inline) {
        *self.inline.write() = Some(inline);
    }

    /// Look up an unqualified keyword in the var's metadata
    pub fn meta_get(&self, key: &str) -> Option<Value> {
        self.meta.read().get(key).cloned()
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.meta_get(key).map(|v| v.is_truthy()).unwrap_or(false)
    }

    pub fn meta(&self) -> Value {
        Value::map(
            self.meta
                .read()
                .iter()
                .map(|(k, v)| (Value::keyword(k), v.clone())),
        )
    }

    /// Replace the metadata from a map value; `:dynamic` and `:macro`
    /// update the corresponding flags
    pub fn set_meta(&self, meta: &Value) {
        let mut entries = IndexMap::new();
        if let Value::Map(map) = meta {
            for (k, v) in map.iter() {
                if let Value::Keyword(kw) = k {
                    if kw.ns().is_none() {
                        entries.insert(Arc::from(kw.name()), v.clone());
                    }
                }
            }
        }
        self.set_dynamic(entries.get("dynamic").map(Value::is_truthy).unwrap_or(false));
        if entries.get("macro").map(Value::is_truthy).unwrap_or(false) {
            self.set_macro(true);
        }
        *self.meta.write() = entries;
    }

    pub fn insert_meta(&self, key: &str, value: Value) {
        self.meta.write().insert(Arc::from(key), value);
    }
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#'{}/{}", self.ns, self.name)
    }
}

/// Push a frame of thread bindings. Only dynamic vars may be bound.
pub fn push_bindings(bindings: Vec<(Arc<Var>, Value)>) -> Result<()> {
    let mut frame = HashMap::new();
    for (var, value) in bindings {
        if !var.is_dynamic() {
            return Err(Thrown::illegal_state(format!(
                "Can't dynamically bind non-dynamic var: {}/{}",
                var.ns, var.name
            )));
        }
        frame.insert(var.id, value);
    }
    BINDINGS.with(|frames| frames.borrow_mut().push(frame));
    Ok(())
}

pub fn pop_bindings() -> Result<()> {
    BINDINGS.with(|frames| match frames.borrow_mut().pop() {
        Some(_) => Ok(()),
        None => Err(Thrown::illegal_state("Pop without matching push")),
    })
}

/// A mapping from names to vars
pub struct Namespace {
    pub name: Arc<str>,
    mappings: RwLock<IndexMap<Arc<str>, Arc<Var>>>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            mappings: RwLock::new(IndexMap::new()),
        }
    }

    /// Find or create the var `name` in this namespace
    pub fn intern(&self, name: &str) -> Arc<Var> {
        if let Some(var) = self.mappings.read().get(name) {
            return var.clone();
        }
        self.mappings
            .write()
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(Var::new(&self.name, name)))
            .clone()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Var>> {
        self.mappings.read().get(name).cloned()
    }

    pub fn vars(&self) -> Vec<Arc<Var>> {
        self.mappings.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let ns = Namespace::new("user");
        let a = ns.intern("x");
        let b = ns.intern("x");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.symbol().to_string(), "user/x");
    }

    #[test]
    fn test_thread_bindings_shadow_root() {
        let var = Arc::new(Var::new("user", "*depth*"));
        var.set_dynamic(true);
        var.bind_root(Value::Long(0));
        push_bindings(vec![(var.clone(), Value::Long(1))]).unwrap();
        assert_eq!(var.get().unwrap(), Value::Long(1));
        var.set(Value::Long(2)).unwrap();
        assert_eq!(var.get().unwrap(), Value::Long(2));
        pop_bindings().unwrap();
        assert_eq!(var.get().unwrap(), Value::Long(0));
    }

    #[test]
    fn test_set_without_binding_fails() {
        let var = Var::new("user", "x");
        var.set_dynamic(true);
        let err = var.set(Value::Long(1)).unwrap_err();
        assert_eq!(
            err.message(),
            Some("Can't change/establish root binding of: x with set")
        );
    }

    #[test]
    fn test_binding_non_dynamic_var_fails() {
        let var = Arc::new(Var::new("user", "y"));
        assert!(push_bindings(vec![(var, Value::Nil)]).is_err());
    }

    #[test]
    fn test_meta_sets_flags() {
        let var = Var::new("user", "m");
        var.set_meta(&Value::map([
            (Value::keyword("macro"), Value::Bool(true)),
            (Value::keyword("dynamic"), Value::Bool(true)),
        ]));
        assert!(var.is_macro());
        assert!(var.is_dynamic());
        assert!(var.meta_flag("macro"));
    }
}
