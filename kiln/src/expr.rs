//! Expression tree
//!
//! The analyzer's output. One closed enum covers every node kind;
//! emission and evaluation match on it exhaustively. Each node can report
//! a statically known result type and whether it can produce that result
//! as an unboxed primitive.

use std::sync::Arc;

use kdn::{Form, Keyword, Symbol};
use kir_core::{HostRef, HostType, Prim, Unit};
use kiln_runtime::Var;

use crate::env::{BindingId, MethodId, UseId};

/// Statically known result type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Prim(Prim),
    Class(String),
    /// The type of a `recur`, which never produces a value
    Recur,
}

impl Ty {
    pub fn of_host(ty: &HostType) -> Option<Ty> {
        match ty {
            HostType::Prim(p) => Some(Ty::Prim(*p)),
            HostType::Class(c) => Some(Ty::Class(c.clone())),
            HostType::Object | HostType::Void => None,
        }
    }

    /// Class name used for member lookup on a receiver of this type
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Ty::Prim(p) => Some(p.boxed_class()),
            Ty::Class(c) => Some(c),
            Ty::Recur => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalRef {
    pub binding: BindingId,
    pub site: UseId,
    pub prim: Option<Prim>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VarRef {
    /// Qualified name
    pub sym: Symbol,
    pub var: Arc<Var>,
    pub tag: Option<String>,
}

#[derive(Debug)]
pub enum Expr {
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    /// Strings, characters, keywords, quoted data
    Const(Form),
    /// A type named in value position
    Class(String),
    Vector(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    Local(LocalRef),
    Var(VarRef),
    /// `(var x)`
    TheVar(VarRef),
    Def(Box<DefExpr>),
    Assign(Box<AssignExpr>),
    If(Box<IfExpr>),
    Do(Vec<Expr>),
    Let(Box<LetExpr>),
    LetFn(Box<LetFnExpr>),
    Recur(Box<RecurExpr>),
    Fn(Box<FnExpr>),
    Invoke(Box<InvokeExpr>),
    KeywordInvoke(Box<KeywordInvokeExpr>),
    ProtocolInvoke(Box<ProtocolInvokeExpr>),
    Host(Box<HostExpr>),
    InstanceOf(Box<InstanceOfExpr>),
    Throw(Box<Expr>),
    Try(Box<TryExpr>),
    Case(Box<CaseExpr>),
    DefType(Box<DefTypeExpr>),
    Reify(Box<ReifyExpr>),
}

#[derive(Debug)]
pub struct DefExpr {
    pub var: VarRef,
    pub init: Option<Expr>,
    /// Var metadata as a map form
    pub meta: Option<Form>,
}

#[derive(Debug)]
pub enum AssignTarget {
    Var(VarRef),
    /// Mutable deftype field, addressed by the binding for it
    Field(BindingId),
}

#[derive(Debug)]
pub struct AssignExpr {
    pub target: AssignTarget,
    pub value: Expr,
}

#[derive(Debug)]
pub struct IfExpr {
    pub test: Expr,
    pub then: Expr,
    pub otherwise: Expr,
    pub line: u32,
}

#[derive(Debug)]
pub struct LetExpr {
    pub bindings: Vec<(BindingId, Expr)>,
    pub body: Expr,
    pub is_loop: bool,
}

#[derive(Debug)]
pub struct LetFnExpr {
    pub bindings: Vec<(BindingId, Expr)>,
    pub body: Expr,
}

#[derive(Debug)]
pub struct RecurExpr {
    pub targets: Vec<BindingId>,
    pub args: Vec<Expr>,
    pub line: u32,
}

#[derive(Debug)]
pub struct FnExpr {
    pub unit: Arc<Unit>,
    /// Loads of each closed-over binding in the enclosing method
    pub captures: Vec<LocalRef>,
    pub line: u32,
}

/// One analyzed arity or deftype method, ready for emission
#[derive(Debug)]
pub struct FnMethod {
    pub frame: MethodId,
    pub name: String,
    /// Fixed parameters, excluding `this`
    pub params: Vec<BindingId>,
    pub rest: Option<BindingId>,
    pub ret: Option<Prim>,
    pub body: Expr,
    pub line: u32,
}

#[derive(Debug)]
pub struct InvokeExpr {
    pub f: Expr,
    pub args: Vec<Expr>,
    pub line: u32,
    /// Last call of the method; its locals are dead once the args are pushed
    pub tail: bool,
}

#[derive(Debug)]
pub struct KeywordInvokeExpr {
    pub keyword: Keyword,
    pub target: Expr,
    pub line: u32,
}

#[derive(Debug)]
pub struct ProtocolInvokeExpr {
    pub var: VarRef,
    pub args: Vec<Expr>,
    pub line: u32,
}

/// A deftype field known at analysis time
#[derive(Debug, Clone)]
pub struct FieldRef {
    pub ty: String,
    pub index: u16,
    pub prim: Option<Prim>,
}

#[derive(Debug)]
pub enum HostOp {
    StaticMethod {
        class: String,
        name: String,
        member: Option<HostRef>,
    },
    InstanceMethod {
        name: String,
        member: Option<HostRef>,
    },
    StaticField {
        class: String,
        member: HostRef,
    },
    InstanceField {
        name: String,
        field: Option<FieldRef>,
    },
    New {
        class: String,
        member: Option<HostRef>,
        deftype: bool,
    },
}

#[derive(Debug)]
pub struct HostExpr {
    pub op: HostOp,
    pub target: Option<Expr>,
    pub args: Vec<Expr>,
    pub line: u32,
}

impl HostExpr {
    /// The resolved member, when there is one
    pub fn member(&self) -> Option<&HostRef> {
        match &self.op {
            HostOp::StaticMethod { member, .. }
            | HostOp::InstanceMethod { member, .. }
            | HostOp::New { member, .. } => member.as_ref(),
            HostOp::StaticField { member, .. } => Some(member),
            HostOp::InstanceField { .. } => None,
        }
    }

    fn static_type(&self) -> Option<Ty> {
        match &self.op {
            HostOp::InstanceField { field, .. } => field.as_ref()?.prim.map(Ty::Prim),
            HostOp::New { class, .. } => Some(Ty::Class(class.clone())),
            _ => Ty::of_host(&self.member()?.ret),
        }
    }
}

#[derive(Debug)]
pub struct InstanceOfExpr {
    pub class: String,
    pub expr: Expr,
}

#[derive(Debug)]
pub struct CatchClause {
    pub class: String,
    pub binding: BindingId,
    pub body: Expr,
}

#[derive(Debug)]
pub struct TryExpr {
    pub body: Expr,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Expr>,
    /// Holds the body or handler value while finally runs
    pub ret_slot: u16,
    /// Holds the in-flight exception in the catch-all handler
    pub finally_slot: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTestType {
    Int,
    HashIdentity,
    HashEquiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    Compact,
    Sparse,
}

#[derive(Debug)]
pub struct CaseEntry {
    pub test: Form,
    pub then: Expr,
}

/// Tests sharing one switch key
#[derive(Debug)]
pub struct CaseBucket {
    pub key: i32,
    pub entries: Vec<CaseEntry>,
}

impl CaseBucket {
    pub fn is_collision(&self) -> bool {
        self.entries.len() > 1
    }
}

#[derive(Debug)]
pub struct CaseExpr {
    pub expr: Expr,
    /// Hidden local holding the dispatch value
    pub temp: BindingId,
    pub test_type: CaseTestType,
    pub shift: u8,
    pub mask: u32,
    pub switch: SwitchType,
    /// Sorted by key
    pub buckets: Vec<CaseBucket>,
    pub default: Expr,
    pub line: u32,
}

#[derive(Debug)]
pub struct DefTypeExpr {
    pub name: String,
    pub unit: Arc<Unit>,
}

/// A fresh instance of an anonymous type built around captured locals
#[derive(Debug)]
pub struct ReifyExpr {
    pub name: String,
    pub unit: Arc<Unit>,
    /// Loads of each closed-over binding, in field order
    pub captures: Vec<LocalRef>,
    pub line: u32,
}

impl Expr {
    pub fn static_type(&self) -> Option<Ty> {
        match self {
            Expr::Long(_) => Some(Ty::Prim(Prim::Long)),
            Expr::Double(_) => Some(Ty::Prim(Prim::Double)),
            Expr::Bool(_) => Some(Ty::Class("Boolean".into())),
            Expr::Const(form) => match form {
                Form::Str(_) => Some(Ty::Class("String".into())),
                Form::Keyword(_) => Some(Ty::Class("Keyword".into())),
                Form::Symbol(_) => Some(Ty::Class("Symbol".into())),
                Form::Char(_) => Some(Ty::Class("Character".into())),
                Form::Long(_) => Some(Ty::Class("Long".into())),
                Form::Double(_) => Some(Ty::Class("Double".into())),
                _ => None,
            },
            Expr::Local(r) => match (r.prim, &r.tag) {
                (Some(p), _) => Some(Ty::Prim(p)),
                (None, Some(tag)) => Some(Ty::Class(tag.clone())),
                (None, None) => None,
            },
            Expr::Var(v) => v.tag.clone().map(Ty::Class),
            Expr::TheVar(_) | Expr::Def(_) => Some(Ty::Class("Var".into())),
            Expr::If(e) => unify(e.then.static_type(), e.otherwise.static_type()),
            Expr::Do(body) => body.last().and_then(Expr::static_type),
            Expr::Let(e) => e.body.static_type(),
            Expr::LetFn(e) => e.body.static_type(),
            Expr::Recur(_) => Some(Ty::Recur),
            Expr::Host(h) => h.static_type(),
            Expr::InstanceOf(_) => Some(Ty::Prim(Prim::Bool)),
            Expr::Nil
            | Expr::Class(_)
            | Expr::Vector(_)
            | Expr::Map(_)
            | Expr::Set(_)
            | Expr::Assign(_)
            | Expr::Fn(_)
            | Expr::Invoke(_)
            | Expr::KeywordInvoke(_)
            | Expr::ProtocolInvoke(_)
            | Expr::Throw(_)
            | Expr::Try(_)
            | Expr::Case(_)
            | Expr::DefType(_)
            | Expr::Reify(_) => None,
        }
    }

    pub fn can_emit_primitive(&self) -> bool {
        match self {
            Expr::Long(_) | Expr::Double(_) | Expr::InstanceOf(_) | Expr::Recur(_) => true,
            Expr::Local(r) => r.prim.is_some(),
            Expr::Host(h) => matches!(h.static_type(), Some(Ty::Prim(_))),
            Expr::If(e) => {
                e.then.can_emit_primitive()
                    && e.otherwise.can_emit_primitive()
                    && matches!(self.static_type(), Some(Ty::Prim(_)))
            }
            Expr::Do(body) => body.last().map(Expr::can_emit_primitive).unwrap_or(false),
            Expr::Let(e) => e.body.can_emit_primitive(),
            Expr::LetFn(e) => e.body.can_emit_primitive(),
            _ => false,
        }
    }

    /// Primitive kind this expression can produce unboxed
    pub fn prim(&self) -> Option<Prim> {
        if !self.can_emit_primitive() {
            return None;
        }
        match self.static_type() {
            Some(Ty::Prim(p)) => Some(p),
            _ => None,
        }
    }

    /// True for expressions with no side effects whose value is known
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Nil | Expr::Bool(_) | Expr::Long(_) | Expr::Double(_) | Expr::Const(_)
        )
    }
}

/// Common type of two branches; a `recur` branch adopts the other side
fn unify(a: Option<Ty>, b: Option<Ty>) -> Option<Ty> {
    match (a, b) {
        (Some(Ty::Recur), other) | (other, Some(Ty::Recur)) => other,
        (Some(a), Some(b)) if a == b => Some(a),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recur_branch_adopts_other_type() {
        assert_eq!(
            unify(Some(Ty::Recur), Some(Ty::Prim(Prim::Long))),
            Some(Ty::Prim(Prim::Long))
        );
        assert_eq!(unify(Some(Ty::Prim(Prim::Double)), Some(Ty::Recur)), Some(Ty::Prim(Prim::Double)));
        assert_eq!(unify(Some(Ty::Prim(Prim::Long)), Some(Ty::Prim(Prim::Double))), None);
        assert_eq!(unify(None, Some(Ty::Class("String".into()))), None);
    }

    #[test]
    fn test_if_is_primitive_only_when_branches_agree() {
        let agree = Expr::If(Box::new(IfExpr {
            test: Expr::Bool(true),
            then: Expr::Long(1),
            otherwise: Expr::Long(2),
            line: 1,
        }));
        assert_eq!(agree.prim(), Some(Prim::Long));

        let differ = Expr::If(Box::new(IfExpr {
            test: Expr::Bool(true),
            then: Expr::Long(1),
            otherwise: Expr::Double(2.0),
            line: 1,
        }));
        assert_eq!(differ.prim(), None);

        let boxed = Expr::If(Box::new(IfExpr {
            test: Expr::Bool(true),
            then: Expr::Long(1),
            otherwise: Expr::Nil,
            line: 1,
        }));
        assert!(!boxed.can_emit_primitive());
    }

    #[test]
    fn test_do_takes_last_expression() {
        let body = Expr::Do(vec![Expr::Const(Form::string("s")), Expr::Double(1.5)]);
        assert_eq!(body.prim(), Some(Prim::Double));
        assert_eq!(Expr::Do(vec![]).static_type(), None);
    }
}
