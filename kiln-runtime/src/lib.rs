//! kiln-runtime: the object model and VM compiled kiln code runs on
//!
//! Provides:
//! - `Value` and the unboxed `Slot` cells used by the VM
//! - Namespaces, vars and thread-local dynamic bindings
//! - The host class registry that interop calls resolve against
//! - Protocols, deftypes and the dispatcher table
//! - Single-slot inline caches for keyword and protocol call sites
//! - The loader and the stack interpreter for `kir_core::Unit`s
//! - The `kiln.core` library: natives and built-in macros
//!
//! # Architecture
//!
//! ```text
//! kir_core::Unit
//!     |
//!     v
//! Runtime::load (links constants, host members, call-site caches)
//!     |
//!     v
//! LoadedUnit --instantiate--> Value::Fn
//!     |
//!     v
//! Runtime::invoke (VM: Slot stack, handlers, dispatch)
//! ```

pub mod cache;
pub mod classes;
pub mod coll;
pub mod core;
pub mod error;
pub mod host;
pub mod loader;
pub mod macros;
pub mod namespace;
pub mod numbers;
pub mod protocol;
pub mod runtime;
pub mod value;
mod vm;

pub use cache::{CacheStats, CallSiteCache};
pub use classes::{class_id, Class, ClassTable, HostMember};
pub use error::{LoadError, Result, Thrown};
pub use loader::LoadedUnit;
pub use namespace::{Inline, Namespace, Var};
pub use protocol::{Dispatcher, DispatcherTable, Protocol, ProtocolMethod};
pub use runtime::{Runtime, CORE_NS, DEFAULT_STACK_BUDGET, USER_NS};
pub use value::{NativeFn, NativeKind, Slot, TypeDef, TypeRef, Value};
