//! Runtime values
//!
//! `Value` is the boxed representation every object-typed expression
//! produces. `Slot` is what lives on the VM operand stack and in locals:
//! either a boxed value or one of the unboxed primitives.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use kdn::hash;
use kdn::{Form, Keyword, Meta, Symbol};
use kir_core::{Capture, Prim};
use parking_lot::{Mutex, RwLock};

use crate::classes::class_id;
use crate::error::{Result, Thrown};
use crate::loader::LoadedUnit;
use crate::namespace::Var;
use crate::protocol::{Protocol, ProtocolMethod};
use crate::runtime::Runtime;

/// Native function entry point
pub type NativeFnPtr = fn(&Runtime, &[Value]) -> Result<Value>;

/// Native macro entry point: receives the whole form and its arguments
pub type NativeMacroPtr = fn(&Form, &[Form]) -> std::result::Result<Form, String>;

#[derive(Clone, Copy)]
pub enum NativeKind {
    Fn(NativeFnPtr),
    Macro(NativeMacroPtr),
}

/// A function implemented in Rust
pub struct NativeFn {
    pub name: &'static str,
    pub kind: NativeKind,
}

/// A compiled function instance with its captured fields
pub struct Closure {
    pub unit: Arc<LoadedUnit>,
    pub fields: Mutex<Vec<Slot>>,
}

impl Closure {
    pub fn name(&self) -> &str {
        &self.unit.unit.name
    }
}

/// A deftype definition. Fields are known when the form is analyzed;
/// method bodies attach when the compiled type unit is loaded.
pub struct TypeDef {
    pub id: u32,
    pub name: Arc<str>,
    pub fields: Vec<Capture>,
    /// Fields hold the locals a `reify*` closed over and have no names to
    /// look up
    pub reified: bool,
    pub methods: RwLock<Option<Arc<LoadedUnit>>>,
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("reified", &self.reified)
            .field("loaded", &self.methods.read().is_some())
            .finish()
    }
}

impl TypeDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        if self.reified {
            return None;
        }
        self.fields.iter().position(|f| f.name == name)
    }
}

/// An instance of a deftype
pub struct Instance {
    pub ty: Arc<TypeDef>,
    pub fields: Mutex<Vec<Slot>>,
}

/// Mutable host objects
pub enum HostObject {
    StringBuilder(Mutex<String>),
}

impl HostObject {
    pub fn class(&self) -> u32 {
        match self {
            HostObject::StringBuilder(_) => class_id::STRING_BUILDER,
        }
    }
}

/// A thrown or throwable exception object
pub struct ExceptionObj {
    pub class: u32,
    pub message: Option<String>,
    pub data: Value,
    pub cause: Option<Value>,
}

impl fmt::Display for ExceptionObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = class_id::name(self.class).unwrap_or("Exception");
        match &self.message {
            Some(m) => write!(f, "{}: {}", name, m),
            None => write!(f, "{}", name),
        }
    }
}

/// A reference to a class as a first-class value
#[derive(Clone, Debug)]
pub struct TypeRef {
    pub id: u32,
    pub name: Arc<str>,
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    Char(char),
    Str(Arc<str>),
    Keyword(Keyword),
    Symbol(Symbol),
    List(Arc<Vec<Value>>),
    Vector(Arc<Vec<Value>>),
    Map(Arc<IndexMap<Value, Value>>),
    Set(Arc<IndexSet<Value>>),
    Fn(Arc<Closure>),
    Native(Arc<NativeFn>),
    Var(Arc<Var>),
    Type(TypeRef),
    Protocol(Arc<Protocol>),
    ProtocolMethod(Arc<ProtocolMethod>),
    Instance(Arc<Instance>),
    Host(Arc<HostObject>),
    Exception(Arc<ExceptionObj>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(Keyword::parse(name))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Arc::new(items))
    }

    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Map(Arc::new(pairs.into_iter().collect()))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Class id of this value
    pub fn type_id(&self) -> u32 {
        match self {
            Value::Nil => class_id::NIL,
            Value::Bool(_) => class_id::BOOLEAN,
            Value::Long(_) => class_id::LONG,
            Value::Double(_) => class_id::DOUBLE,
            Value::Char(_) => class_id::CHARACTER,
            Value::Str(_) => class_id::STRING,
            Value::Keyword(_) => class_id::KEYWORD,
            Value::Symbol(_) => class_id::SYMBOL,
            Value::List(_) => class_id::LIST,
            Value::Vector(_) => class_id::VECTOR,
            Value::Map(_) => class_id::MAP,
            Value::Set(_) => class_id::SET,
            Value::Fn(_) => class_id::FN,
            Value::Native(_) => class_id::NATIVE_FN,
            Value::Var(_) => class_id::VAR,
            Value::Type(_) => class_id::CLASS,
            Value::Protocol(_) => class_id::PROTOCOL,
            Value::ProtocolMethod(_) => class_id::PROTOCOL_METHOD,
            Value::Instance(i) => i.ty.id,
            Value::Host(h) => h.class(),
            Value::Exception(e) => e.class,
        }
    }

    /// Class name used in diagnostics
    pub fn class_name(&self) -> String {
        match self {
            Value::Instance(i) => i.ty.name.to_string(),
            other => class_id::name(other.type_id())
                .unwrap_or("Object")
                .to_string(),
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a seqable value; `None` for non-seqables
    pub fn items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Nil => Some(Vec::new()),
            Value::List(items) | Value::Vector(items) => Some(items.as_ref().clone()),
            Value::Set(items) => Some(items.iter().cloned().collect()),
            Value::Map(map) => Some(
                map.iter()
                    .map(|(k, v)| Value::vector(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            Value::Str(s) => Some(s.chars().map(Value::Char).collect()),
            _ => None,
        }
    }

    /// Seqable elements or a ClassCastException
    pub fn seq_items(&self) -> Result<Vec<Value>> {
        self.items().ok_or_else(|| Thrown::class_cast(self, "ISeq"))
    }

    /// `=` semantics
    pub fn equiv(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a) | Value::Vector(a), Value::List(b) | Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equiv(y))
            }
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a.id == b.id,
            _ => self.identical(other),
        }
    }

    /// `identical?` semantics; scalars compare by value
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Fn(a), Value::Fn(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Var(a), Value::Var(b)) => Arc::ptr_eq(a, b),
            (Value::Protocol(a), Value::Protocol(b)) => Arc::ptr_eq(a, b),
            (Value::ProtocolMethod(a), Value::ProtocolMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) | (Value::Vector(a), Value::Vector(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a.id == b.id,
            _ => false,
        }
    }

    /// Hash consistent with `equiv` and with `Form::hasheq`
    pub fn hasheq(&self) -> i32 {
        match self {
            Value::Nil => 0,
            Value::Bool(b) => hash::hash_bool(*b),
            Value::Long(n) => hash::hash_long(*n),
            Value::Double(d) => hash::hash_double(*d),
            Value::Char(c) => *c as i32,
            Value::Str(s) => hash::hash_str(s),
            Value::Keyword(k) => hash::hash_keyword(k.ns(), k.name()),
            Value::Symbol(s) => hash::hash_symbol(s.ns(), s.name()),
            Value::List(items) | Value::Vector(items) => {
                hash::hash_ordered(items.iter().map(Value::hasheq))
            }
            Value::Set(items) => hash::hash_unordered(items.iter().map(Value::hasheq)),
            Value::Map(map) => hash::hash_unordered(
                map.iter()
                    .map(|(k, v)| hash::hash_ordered([k.hasheq(), v.hasheq()].into_iter())),
            ),
            Value::Type(t) => t.id as i32,
            Value::Fn(a) => Arc::as_ptr(a) as usize as i32,
            Value::Native(a) => Arc::as_ptr(a) as usize as i32,
            Value::Var(a) => Arc::as_ptr(a) as usize as i32,
            Value::Protocol(a) => Arc::as_ptr(a) as usize as i32,
            Value::ProtocolMethod(a) => Arc::as_ptr(a) as usize as i32,
            Value::Instance(a) => Arc::as_ptr(a) as usize as i32,
            Value::Host(a) => Arc::as_ptr(a) as usize as i32,
            Value::Exception(a) => Arc::as_ptr(a) as usize as i32,
        }
    }

    /// `str` rendering: strings and chars print raw, nil prints empty
    pub fn to_str(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Str(s) => s.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Host(h) => match h.as_ref() {
                HostObject::StringBuilder(buf) => buf.lock().clone(),
            },
            Value::Exception(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Convert reader data to a value. Collection metadata is not carried.
    pub fn from_form(form: &Form) -> Value {
        match form {
            Form::Nil => Value::Nil,
            Form::Bool(b) => Value::Bool(*b),
            Form::Long(n) => Value::Long(*n),
            Form::Double(d) => Value::Double(*d),
            Form::Char(c) => Value::Char(*c),
            Form::Str(s) => Value::Str(s.clone()),
            Form::Keyword(k) => Value::Keyword(k.clone()),
            Form::Symbol(s) => Value::Symbol(s.clone()),
            Form::List(items) => Value::list(items.iter().map(Value::from_form).collect()),
            Form::Vector(items) => Value::vector(items.iter().map(Value::from_form).collect()),
            Form::Map(pairs) => Value::map(
                pairs
                    .iter()
                    .map(|(k, v)| (Value::from_form(k), Value::from_form(v))),
            ),
            Form::Set(items) => Value::Set(Arc::new(items.iter().map(Value::from_form).collect())),
        }
    }

    /// Convert a value back to code, as when a macro returns its expansion
    pub fn to_form(&self) -> std::result::Result<Form, String> {
        Ok(match self {
            Value::Nil => Form::Nil,
            Value::Bool(b) => Form::Bool(*b),
            Value::Long(n) => Form::Long(*n),
            Value::Double(d) => Form::Double(*d),
            Value::Char(c) => Form::Char(*c),
            Value::Str(s) => Form::Str(s.clone()),
            Value::Keyword(k) => Form::Keyword(k.clone()),
            Value::Symbol(s) => Form::Symbol(s.clone()),
            Value::List(items) => Form::list(to_forms(items)?),
            Value::Vector(items) => Form::vector(to_forms(items)?),
            Value::Set(items) => Form::set(
                items
                    .iter()
                    .map(Value::to_form)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Map(map) => Form::map(
                map.iter()
                    .map(|(k, v)| Ok((k.to_form()?, v.to_form()?)))
                    .collect::<std::result::Result<_, String>>()?,
            ),
            other => return Err(format!("Can't embed object in code: {}", other)),
        })
    }

    /// Metadata map of a value, as a value
    pub fn meta_to_value(meta: &Meta) -> Value {
        Value::from_form(&meta.to_form())
    }
}

fn to_forms(items: &[Value]) -> std::result::Result<Vec<Form>, String> {
    items.iter().map(Value::to_form).collect()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equiv(other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hasheq());
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", Form::Double(*d)),
            Value::Char(c) => write!(f, "{}", Form::Char(*c)),
            Value::Str(s) => kdn::write_escaped(f, s),
            Value::Keyword(k) => write!(f, "{}", k),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::List(items) => write_seq(f, "(", items, ")"),
            Value::Vector(items) => write_seq(f, "[", items, "]"),
            Value::Set(items) => {
                let items: Vec<Value> = items.iter().cloned().collect();
                write_seq(f, "#{", &items, "}")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Fn(c) => write!(f, "#object[Fn {}]", c.name()),
            Value::Native(n) => write!(f, "#object[NativeFn {}]", n.name),
            Value::Var(v) => write!(f, "#'{}/{}", v.ns, v.name),
            Value::Type(t) => write!(f, "{}", t.name),
            Value::Protocol(p) => write!(f, "#object[Protocol {}]", p.name),
            Value::ProtocolMethod(m) => write!(f, "#object[ProtocolMethod {}]", m.name),
            Value::Instance(i) => write!(f, "#object[{}]", i.ty.name),
            Value::Host(h) => match h.as_ref() {
                HostObject::StringBuilder(buf) => write!(f, "{}", buf.lock()),
            },
            Value::Exception(e) => write!(f, "#error[{}]", e),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// An operand stack or local variable slot
#[derive(Clone, Debug)]
pub enum Slot {
    Obj(Value),
    Long(i64),
    Double(f64),
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Obj(Value::Nil)
    }
}

impl Slot {
    pub fn prim(&self) -> Option<Prim> {
        match self {
            Slot::Obj(_) => None,
            Slot::Long(_) => Some(Prim::Long),
            Slot::Double(_) => Some(Prim::Double),
            Slot::Int(_) => Some(Prim::Int),
            Slot::Float(_) => Some(Prim::Float),
            Slot::Bool(_) => Some(Prim::Bool),
        }
    }

    /// Box the slot. Ints and floats widen to longs and doubles.
    pub fn into_value(self) -> Value {
        match self {
            Slot::Obj(v) => v,
            Slot::Long(n) => Value::Long(n),
            Slot::Double(d) => Value::Double(d),
            Slot::Int(n) => Value::Long(n as i64),
            Slot::Float(x) => Value::Double(x as f64),
            Slot::Bool(b) => Value::Bool(b),
        }
    }

    /// Unbox a value to the given primitive kind
    pub fn unbox(value: Value, prim: Prim) -> Result<Slot> {
        let number = |v: &Value| match v {
            Value::Long(n) => Ok((Some(*n), *n as f64)),
            Value::Double(d) => Ok((None, *d)),
            Value::Char(c) if prim.is_integral() => Ok((Some(*c as i64), *c as u32 as f64)),
            other => Err(Thrown::class_cast(other, "Number")),
        };
        Ok(match prim {
            Prim::Bool => match value {
                Value::Bool(b) => Slot::Bool(b),
                other => return Err(Thrown::class_cast(&other, "Boolean")),
            },
            Prim::Long => match number(&value)? {
                (Some(n), _) => Slot::Long(n),
                (None, d) => Slot::Long(d as i64),
            },
            Prim::Int => match number(&value)? {
                (Some(n), _) => Slot::Int(n as i32),
                (None, d) => Slot::Int(d as i32),
            },
            Prim::Double => Slot::Double(number(&value)?.1),
            Prim::Float => Slot::Float(number(&value)?.1 as f32),
        })
    }

    /// Primitive-to-primitive conversion
    pub fn convert(self, to: Prim) -> Result<Slot> {
        Ok(match (self, to) {
            (Slot::Long(n), Prim::Long) => Slot::Long(n),
            (Slot::Int(n), Prim::Long) => Slot::Long(n as i64),
            (Slot::Long(n), Prim::Int) => Slot::Int(n as i32),
            (Slot::Long(n), Prim::Double) => Slot::Double(n as f64),
            (Slot::Long(n), Prim::Float) => Slot::Float(n as f32),
            (Slot::Int(n), Prim::Int) => Slot::Int(n),
            (Slot::Int(n), Prim::Double) => Slot::Double(n as f64),
            (Slot::Int(n), Prim::Float) => Slot::Float(n as f32),
            (Slot::Double(d), Prim::Double) => Slot::Double(d),
            (Slot::Double(d), Prim::Long) => Slot::Long(d as i64),
            (Slot::Double(d), Prim::Int) => Slot::Int(d as i32),
            (Slot::Double(d), Prim::Float) => Slot::Float(d as f32),
            (Slot::Float(x), Prim::Double) => Slot::Double(x as f64),
            (Slot::Float(x), Prim::Float) => Slot::Float(x),
            (Slot::Float(x), Prim::Long) => Slot::Long(x as i64),
            (Slot::Float(x), Prim::Int) => Slot::Int(x as i32),
            (Slot::Bool(b), Prim::Bool) => Slot::Bool(b),
            (Slot::Obj(v), p) => Slot::unbox(v, p)?,
            (other, p) => {
                return Err(Thrown::class_cast(
                    &other.into_value(),
                    p.boxed_class(),
                ))
            }
        })
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Slot::Long(n) => Some(*n),
            Slot::Int(n) => Some(*n as i64),
            Slot::Obj(Value::Long(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Slot::Double(d) => Some(*d),
            Slot::Float(x) => Some(*x as f64),
            Slot::Long(n) => Some(*n as f64),
            Slot::Int(n) => Some(*n as f64),
            Slot::Obj(Value::Double(d)) => Some(*d),
            Slot::Obj(Value::Long(n)) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Slot::Int(n) => Some(*n),
            Slot::Long(n) => Some(*n as i32),
            Slot::Obj(Value::Long(n)) => Some(*n as i32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Slot::Bool(b) => Some(*b),
            Slot::Obj(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as an object; primitives are boxed
    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }
}
