//! kIR instruction set and compiled unit definitions

use std::sync::Arc;

use kdn::{Form, Keyword, Symbol};

/// Primitive (unboxed) value kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prim {
    Long,
    Double,
    Int,
    Float,
    Bool,
}

impl Prim {
    pub fn name(self) -> &'static str {
        match self {
            Prim::Long => "long",
            Prim::Double => "double",
            Prim::Int => "int",
            Prim::Float => "float",
            Prim::Bool => "boolean",
        }
    }

    /// Resolve a type hint name to a primitive kind
    pub fn from_name(name: &str) -> Option<Prim> {
        match name {
            "long" => Some(Prim::Long),
            "double" => Some(Prim::Double),
            "int" => Some(Prim::Int),
            "float" => Some(Prim::Float),
            "boolean" => Some(Prim::Bool),
            _ => None,
        }
    }

    /// Boxed host class for this primitive
    pub fn boxed_class(self) -> &'static str {
        match self {
            Prim::Long => "Long",
            Prim::Double => "Double",
            Prim::Int => "Integer",
            Prim::Float => "Float",
            Prim::Bool => "Boolean",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Prim::Long | Prim::Int)
    }
}

impl std::fmt::Display for Prim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Symbolic jump target, resolved through `MethodCode::labels`
pub type Label = u32;

/// Stack machine instructions
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    // Constants
    Const(u32),
    Nil,
    PushBool(bool),
    PushLong(i64),
    PushDouble(f64),
    PushInt(i32),
    Pop,
    Dup,

    // Primitive conversions
    Box(Prim),
    Unbox(Prim),
    Convert { from: Prim, to: Prim },

    // Locals and captured fields
    Load(u16),
    LoadClear(u16),
    Store(u16),
    Clear(u16),
    LoadThis,
    LoadField(u16),
    LoadFieldClear(u16),
    StoreField(u16),
    /// Pop a value and a closure; store the value into that closure's field
    InitField(u16),

    // Vars (constant index of the var)
    VarGet(u32),
    VarSet(u32),
    VarDef { var: u32, init: bool, meta: Option<u32> },

    // Control flow
    Jump(Label),
    JumpIfFalsy(Label),
    JumpIfFalse(Label),
    JumpIfNotEquiv(Label),
    JumpIfNotIdentical(Label),
    Hash,
    ShiftMask { shift: u8, mask: u32 },
    TableSwitch { low: i32, targets: Vec<Label>, default: Label },
    LookupSwitch { keys: Vec<i32>, targets: Vec<Label>, default: Label },

    // Calls and host interop (host members are constant indices)
    Invoke(u16),
    InvokeStatic { method: u32, argc: u16 },
    InvokeVirtual { method: u32, argc: u16 },
    InvokeReflective { member: u32, argc: u16 },
    InvokeStaticReflective { class: u32, member: u32, argc: u16 },
    GetStatic(u32),
    GetField { ty: u32, index: u16 },
    GetFieldReflective(u32),
    New { ctor: u32, argc: u16 },
    NewReflective { class: u32, argc: u16 },
    NewInstance { ty: u32, argc: u16 },
    NewFn { unit: u32, captured: u16 },

    // Inline-cached dispatch
    KeywordInvoke { site: u32 },
    ProtocolInvoke { site: u32, argc: u16 },

    InstanceOf(u32),
    MakeVector(u16),
    MakeMap(u16),
    MakeSet(u16),
    Throw,
    Return,
}

impl Op {
    /// (values popped, values pushed) on the fall-through path
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Op::Const(_)
            | Op::Nil
            | Op::PushBool(_)
            | Op::PushLong(_)
            | Op::PushDouble(_)
            | Op::PushInt(_) => (0, 1),
            Op::Pop => (1, 0),
            Op::Dup => (1, 2),
            Op::Box(_) | Op::Unbox(_) | Op::Convert { .. } => (1, 1),
            Op::Load(_)
            | Op::LoadClear(_)
            | Op::LoadThis
            | Op::LoadField(_)
            | Op::LoadFieldClear(_) => (0, 1),
            Op::Store(_) | Op::StoreField(_) => (1, 0),
            Op::InitField(_) => (2, 0),
            Op::Clear(_) => (0, 0),
            Op::VarGet(_) => (0, 1),
            Op::VarSet(_) => (1, 1),
            Op::VarDef { init, .. } => (usize::from(*init), 1),
            Op::Jump(_) => (0, 0),
            Op::JumpIfFalsy(_) | Op::JumpIfFalse(_) => (1, 0),
            Op::JumpIfNotEquiv(_) | Op::JumpIfNotIdentical(_) => (2, 0),
            Op::Hash | Op::ShiftMask { .. } => (1, 1),
            Op::TableSwitch { .. } | Op::LookupSwitch { .. } => (1, 0),
            Op::Invoke(argc) => (*argc as usize + 1, 1),
            Op::InvokeStatic { argc, .. } => (*argc as usize, 1),
            Op::InvokeVirtual { argc, .. } | Op::InvokeReflective { argc, .. } => {
                (*argc as usize + 1, 1)
            }
            Op::InvokeStaticReflective { argc, .. } => (*argc as usize, 1),
            Op::GetStatic(_) => (0, 1),
            Op::GetField { .. } | Op::GetFieldReflective(_) => (1, 1),
            Op::New { argc, .. }
            | Op::NewReflective { argc, .. }
            | Op::NewInstance { argc, .. } => (*argc as usize, 1),
            Op::NewFn { captured, .. } => (*captured as usize, 1),
            Op::KeywordInvoke { .. } => (1, 1),
            Op::ProtocolInvoke { argc, .. } => (*argc as usize, 1),
            Op::InstanceOf(_) => (1, 1),
            Op::MakeVector(n) | Op::MakeSet(n) => (*n as usize, 1),
            Op::MakeMap(n) => (*n as usize * 2, 1),
            Op::Throw | Op::Return => (1, 0),
        }
    }

    /// Labels this instruction may transfer control to
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Op::Jump(l)
            | Op::JumpIfFalsy(l)
            | Op::JumpIfFalse(l)
            | Op::JumpIfNotEquiv(l)
            | Op::JumpIfNotIdentical(l) => vec![*l],
            Op::TableSwitch {
                targets, default, ..
            }
            | Op::LookupSwitch {
                targets, default, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// True when control never falls through to the next instruction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Op::Jump(_)
                | Op::Throw
                | Op::Return
                | Op::TableSwitch { .. }
                | Op::LookupSwitch { .. }
        )
    }
}

/// Exception table entry; the first matching entry in table order wins
#[derive(Clone, Debug, PartialEq)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub target: Label,
    /// Exception class name; `None` catches everything
    pub catch: Option<String>,
}

/// One compiled arity or method body
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCode {
    pub name: String,
    /// Fixed parameter count, excluding `this` in slot 0
    pub arity: u16,
    pub variadic: bool,
    pub max_locals: u16,
    /// Primitive kinds of parameters (`None` for objects)
    pub params: Vec<Option<Prim>>,
    pub ret: Option<Prim>,
    pub code: Vec<Op>,
    pub labels: Vec<Option<u32>>,
    pub handlers: Vec<Handler>,
    /// (pc, line) pairs in ascending pc order
    pub lines: Vec<(u32, u32)>,
}

impl MethodCode {
    /// Instruction index a label is bound to
    pub fn label_pc(&self, label: Label) -> Option<usize> {
        self.labels
            .get(label as usize)
            .copied()
            .flatten()
            .map(|pc| pc as usize)
    }

    /// Source line for an instruction
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.lines
            .iter()
            .take_while(|(start, _)| *start as usize <= pc)
            .last()
            .map(|(_, line)| *line)
    }

    pub fn accepts(&self, argc: usize) -> bool {
        if self.variadic {
            argc >= self.arity as usize
        } else {
            argc == self.arity as usize
        }
    }
}

/// Host type used in member signatures
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Prim(Prim),
    Object,
    Class(String),
    Void,
}

impl HostType {
    pub fn prim(&self) -> Option<Prim> {
        match self {
            HostType::Prim(p) => Some(*p),
            _ => None,
        }
    }
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostType::Prim(p) => write!(f, "{}", p),
            HostType::Object => write!(f, "Object"),
            HostType::Class(c) => write!(f, "{}", c),
            HostType::Void => write!(f, "void"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostKind {
    StaticMethod,
    Method,
    StaticField,
    Constructor,
}

/// A statically resolved host member, identified by signature
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostRef {
    pub class: String,
    pub member: String,
    pub kind: HostKind,
    pub params: Vec<HostType>,
    pub ret: HostType,
}

/// Constant pool entry
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Form(Form),
    /// A namespace-qualified var
    Var(Symbol),
    /// A type by name (host class or deftype)
    Type(String),
    Host(HostRef),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeywordSite {
    pub keyword: Keyword,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolSite {
    /// Qualified name of the protocol method var
    pub method_var: Symbol,
}

/// A closed-over binding carried as a field
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    pub name: String,
    pub prim: Option<Prim>,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UnitKind {
    Fn { once: bool },
    /// A deftype; captures are its fields, methods implement protocols
    Type { name: String, protocols: Vec<Symbol> },
}

/// An independently loadable compiled function, closure or type
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    pub name: String,
    pub kind: UnitKind,
    pub methods: Vec<MethodCode>,
    pub closed_over: Vec<Capture>,
    pub constants: Vec<Constant>,
    pub keyword_sites: Vec<KeywordSite>,
    pub protocol_sites: Vec<ProtocolSite>,
    pub children: Vec<Arc<Unit>>,
}

impl Unit {
    pub fn is_once(&self) -> bool {
        matches!(self.kind, UnitKind::Fn { once: true })
    }

    /// The method that accepts `argc` arguments, preferring a fixed arity
    pub fn method_for(&self, argc: usize) -> Option<&MethodCode> {
        self.methods
            .iter()
            .find(|m| !m.variadic && m.accepts(argc))
            .or_else(|| self.methods.iter().find(|m| m.accepts(argc)))
    }
}
