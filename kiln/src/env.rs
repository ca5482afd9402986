//! Local bindings, method frames and closure objects
//!
//! All three live in arenas on the compile context and are addressed by
//! id. A binding belongs to exactly one method frame; a method frame
//! belongs to one object (a fn or a deftype) and points at the method it
//! is nested in, which is how closure capture walks outward.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use kdn::Symbol;
use kir_core::Prim;

use crate::path::PathId;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(BindingId);
arena_id!(UseId);
arena_id!(MethodId);
arena_id!(ObjId);

/// Compile-time record of a local
#[derive(Debug, Clone)]
pub struct LocalBinding {
    pub name: Symbol,
    /// Slot in the owning method; 0 is `this`
    pub idx: u16,
    pub tag: Option<String>,
    pub prim: Option<Prim>,
    pub is_arg: bool,
    pub method: Option<MethodId>,
    /// Clear root in force when the binding was created
    pub clear_root: Option<PathId>,
    pub can_be_cleared: bool,
    /// Assignable deftype field
    pub mutable: bool,
    /// A recur passed a value of the wrong kind for this primitive loop local
    pub recur_mismatch: bool,
    pub used_in_catch_finally: bool,
}

/// One reference to a local
#[derive(Debug, Clone)]
pub struct UseSite {
    pub binding: BindingId,
    pub path: Option<PathId>,
    pub should_clear: bool,
}

/// One arity of a fn, or one method of a deftype
#[derive(Debug)]
pub struct MethodFrame {
    pub obj: ObjId,
    pub parent: Option<MethodId>,
    pub locals: HashSet<BindingId>,
    /// Highest slot handed out, for `max_locals`
    pub max_slot: u16,
    /// Clearing candidates per binding, in analysis order
    pub clear_sites: HashMap<BindingId, Vec<UseId>>,
}

impl MethodFrame {
    pub fn new(obj: ObjId, parent: Option<MethodId>) -> Self {
        Self {
            obj,
            parent,
            locals: HashSet::new(),
            max_slot: 0,
            clear_sites: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Fn,
    Type,
    /// Fields are copies of captured locals and never assignable
    Reify,
}

/// The unit under construction for a fn or deftype
#[derive(Debug)]
pub struct ObjFrame {
    pub name: String,
    pub kind: ObjKind,
    pub once: bool,
    /// Closed-over bindings in capture order; for a deftype, its fields
    pub closes: IndexSet<BindingId>,
}

impl ObjFrame {
    pub fn new(name: impl Into<String>, kind: ObjKind, once: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            once,
            closes: IndexSet::new(),
        }
    }

    pub fn field_index(&self, binding: BindingId) -> Option<u16> {
        self.closes.get_index_of(&binding).map(|i| i as u16)
    }
}
