//! The runtime instance
//!
//! Owns namespaces, the class table and the dispatcher table. Compiled
//! code runs against a `&Runtime`; nothing here is global except the
//! thread-local dynamic binding stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use kdn::Symbol;
use kir_core::Capture;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::classes::{Class, ClassTable};
use crate::namespace::{Namespace, Var};
use crate::protocol::DispatcherTable;
use crate::value::{TypeDef, Value};
use crate::{core, host, macros};

pub const CORE_NS: &str = "kiln.core";
pub const USER_NS: &str = "user";

/// Default native stack budget for VM calls; fits a 2 MiB thread stack
pub const DEFAULT_STACK_BUDGET: usize = 1 << 20;

enum Output {
    Stdout,
    Capture(String),
}

pub struct Runtime {
    namespaces: RwLock<IndexMap<Arc<str>, Arc<Namespace>>>,
    current: RwLock<Arc<Namespace>>,
    pub classes: ClassTable,
    pub dispatchers: DispatcherTable,
    output: Mutex<Output>,
    stack_budget: AtomicUsize,
}

impl Runtime {
    /// A runtime with the core library installed and `user` as the
    /// current namespace
    pub fn new() -> Self {
        let core_ns = Arc::new(Namespace::new(CORE_NS));
        let user_ns = Arc::new(Namespace::new(USER_NS));
        let mut namespaces = IndexMap::new();
        namespaces.insert(core_ns.name.clone(), core_ns);
        namespaces.insert(user_ns.name.clone(), user_ns.clone());

        let rt = Self {
            namespaces: RwLock::new(namespaces),
            current: RwLock::new(user_ns),
            classes: ClassTable::new(),
            dispatchers: DispatcherTable::new(),
            output: Mutex::new(Output::Stdout),
            stack_budget: AtomicUsize::new(DEFAULT_STACK_BUDGET),
        };
        host::install(&rt.classes);
        core::install(&rt);
        macros::install(&rt);
        debug!("runtime ready");
        rt
    }

    // ========== Namespaces ==========

    pub fn core_ns(&self) -> Arc<Namespace> {
        self.find_or_create_ns(CORE_NS)
    }

    pub fn current_ns(&self) -> Arc<Namespace> {
        self.current.read().clone()
    }

    pub fn find_ns(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(name).cloned()
    }

    pub fn find_or_create_ns(&self, name: &str) -> Arc<Namespace> {
        if let Some(ns) = self.find_ns(name) {
            return ns;
        }
        self.namespaces
            .write()
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(Namespace::new(name)))
            .clone()
    }

    /// Switch the current namespace, creating it if needed
    pub fn set_current_ns(&self, name: &str) -> Arc<Namespace> {
        let ns = self.find_or_create_ns(name);
        *self.current.write() = ns.clone();
        ns
    }

    /// Resolve a symbol to a var: qualified symbols name their namespace,
    /// others look in the current namespace and then in the core library
    pub fn resolve_var(&self, sym: &Symbol) -> Option<Arc<Var>> {
        match sym.ns() {
            Some(ns) => self.find_ns(ns)?.find(sym.name()),
            None => self
                .current_ns()
                .find(sym.name())
                .or_else(|| self.core_ns().find(sym.name())),
        }
    }

    pub fn intern(&self, ns: &str, name: &str) -> Arc<Var> {
        self.find_or_create_ns(ns).intern(name)
    }

    /// Value of a core var, for natives that call back into the library
    pub fn core_value(&self, name: &str) -> Option<Value> {
        self.core_ns().find(name).and_then(|v| v.root())
    }

    // ========== Types ==========

    /// Declare a deftype with the given fields and return its class.
    /// Redefinition creates a fresh class under the same name.
    pub fn declare_type(&self, name: &str, fields: Vec<Capture>) -> Arc<Class> {
        self.declare_class(name, fields, false)
    }

    /// Declare the anonymous type behind a `reify*`; its fields are the
    /// closed-over locals and can't be reached by name
    pub fn declare_reified(&self, name: &str, fields: Vec<Capture>) -> Arc<Class> {
        self.declare_class(name, fields, true)
    }

    fn declare_class(&self, name: &str, fields: Vec<Capture>, reified: bool) -> Arc<Class> {
        let id = self.classes.next_id();
        let def = Arc::new(TypeDef {
            id,
            name: Arc::from(name),
            fields,
            reified,
            methods: RwLock::new(None),
        });
        debug!("declared type {} as class {}", name, id);
        self.classes.insert(Class {
            id,
            name: Arc::from(name),
            supers: vec![crate::classes::class_id::OBJECT],
            members: Vec::new(),
            deftype: Some(def),
        })
    }

    pub fn is_instance(&self, value: &Value, class: u32) -> bool {
        self.classes.is_subclass(value.type_id(), class)
    }

    // ========== Calls ==========

    /// Bytes of native stack a thread may use for nested calls before
    /// they fail with `StackOverflowError`
    pub fn stack_budget(&self) -> usize {
        self.stack_budget.load(Ordering::Relaxed)
    }

    /// Raise the budget for threads spawned with a larger stack
    pub fn set_stack_budget(&self, bytes: usize) {
        self.stack_budget.store(bytes, Ordering::Relaxed);
    }

    // ========== Output ==========

    /// Send subsequent output to an in-memory buffer
    pub fn capture_output(&self) {
        *self.output.lock() = Output::Capture(String::new());
    }

    /// Drain captured output
    pub fn take_output(&self) -> String {
        match &mut *self.output.lock() {
            Output::Capture(buf) => std::mem::take(buf),
            Output::Stdout => String::new(),
        }
    }

    pub fn write_out(&self, text: &str) {
        match &mut *self.output.lock() {
            Output::Capture(buf) => buf.push_str(text),
            Output::Stdout => {
                use std::io::Write;
                let mut out = std::io::stdout();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_falls_back_to_core() {
        let rt = Runtime::new();
        let plus = rt.resolve_var(&Symbol::new("+")).unwrap();
        assert_eq!(&*plus.ns, CORE_NS);
        let mine = rt.intern(USER_NS, "+");
        let resolved = rt.resolve_var(&Symbol::new("+")).unwrap();
        assert!(Arc::ptr_eq(&mine, &resolved));
    }

    #[test]
    fn test_declare_type_assigns_fresh_ids() {
        let rt = Runtime::new();
        let a = rt.declare_type("Point", vec![]);
        let b = rt.declare_type("Point", vec![]);
        assert_ne!(a.id, b.id);
        assert_eq!(rt.classes.lookup("Point").map(|c| c.id), Some(b.id));
    }

    #[test]
    fn test_reified_fields_have_no_names() {
        let rt = Runtime::new();
        let field = Capture {
            name: "x".to_string(),
            prim: None,
            mutable: false,
        };
        let named = rt.declare_type("Named", vec![field.clone()]);
        let reified = rt.declare_reified("user$reify__1", vec![field]);
        assert_eq!(named.deftype.as_ref().and_then(|d| d.field_index("x")), Some(0));
        assert_eq!(reified.deftype.as_ref().and_then(|d| d.field_index("x")), None);
    }

    #[test]
    fn test_captured_output() {
        let rt = Runtime::new();
        rt.capture_output();
        rt.write_out("hello");
        assert_eq!(rt.take_output(), "hello");
        assert_eq!(rt.take_output(), "");
    }
}
