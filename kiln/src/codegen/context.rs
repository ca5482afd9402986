//! Emission state
//!
//! [`UnitPool`] collects what a unit's methods share: constants, call
//! sites and nested units. [`Emitter`] carries one method's builder and
//! the frame its locals belong to.

use std::sync::Arc;

use kdn::{Form, Keyword, Symbol};
use kir_core::{Constant, HostRef, KeywordSite, Label, MethodBuilder, Op, Prim, ProtocolSite, Unit};

use crate::context::CompileContext;
use crate::env::{MethodId, ObjId};

#[derive(Default)]
pub(super) struct UnitPool {
    pub constants: Vec<Constant>,
    pub keyword_sites: Vec<KeywordSite>,
    pub protocol_sites: Vec<ProtocolSite>,
    pub children: Vec<Arc<Unit>>,
}

/// Equal values of the same type share a pool entry
fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Form(x), Constant::Form(y)) => x.type_name() == y.type_name() && x == y,
        _ => a == b,
    }
}

impl UnitPool {
    pub fn constant(&mut self, constant: Constant) -> u32 {
        if let Some(i) = self.constants.iter().position(|c| same_constant(c, &constant)) {
            return i as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    pub fn form(&mut self, form: &Form) -> u32 {
        self.constant(Constant::Form(form.with_meta(None)))
    }

    /// A member name for reflective lookup
    pub fn name(&mut self, name: &str) -> u32 {
        self.constant(Constant::Form(Form::string(name)))
    }

    pub fn var(&mut self, sym: &Symbol) -> u32 {
        self.constant(Constant::Var(sym.without_meta()))
    }

    pub fn ty(&mut self, name: &str) -> u32 {
        self.constant(Constant::Type(name.to_string()))
    }

    pub fn host(&mut self, member: &HostRef) -> u32 {
        self.constant(Constant::Host(member.clone()))
    }

    pub fn keyword_site(&mut self, keyword: &Keyword) -> u32 {
        if let Some(i) = self.keyword_sites.iter().position(|s| s.keyword == *keyword) {
            return i as u32;
        }
        self.keyword_sites.push(KeywordSite {
            keyword: keyword.clone(),
        });
        (self.keyword_sites.len() - 1) as u32
    }

    pub fn protocol_site(&mut self, method_var: &Symbol) -> u32 {
        let method_var = method_var.without_meta();
        if let Some(i) = self.protocol_sites.iter().position(|s| s.method_var == method_var) {
            return i as u32;
        }
        self.protocol_sites.push(ProtocolSite { method_var });
        (self.protocol_sites.len() - 1) as u32
    }

    pub fn child(&mut self, unit: Arc<Unit>) -> u32 {
        self.children.push(unit);
        (self.children.len() - 1) as u32
    }
}

pub(super) struct Emitter<'a, 'rt> {
    pub ctx: &'a CompileContext<'rt>,
    pub obj: ObjId,
    pub frame: MethodId,
    pub pool: &'a mut UnitPool,
    pub b: MethodBuilder,
    /// Target of `recur`: the innermost loop, or the method start
    pub loop_head: Option<Label>,
    /// Declared primitive return of the method; every return is cast to it
    pub ret: Option<Prim>,
    /// Position of the most recently bound label
    marked_at: Option<usize>,
}

impl<'a, 'rt> Emitter<'a, 'rt> {
    pub fn new(
        ctx: &'a CompileContext<'rt>,
        obj: ObjId,
        frame: MethodId,
        pool: &'a mut UnitPool,
        b: MethodBuilder,
    ) -> Self {
        Self {
            ctx,
            obj,
            frame,
            pool,
            b,
            loop_head: None,
            ret: None,
            marked_at: None,
        }
    }

    pub fn mark(&mut self, label: Label) {
        self.b.mark(label);
        self.marked_at = Some(self.b.pc());
    }

    pub fn line(&mut self, line: u32) {
        if line > 0 {
            self.b.line(line);
        }
    }

    /// True when control cannot reach the next instruction
    pub fn terminated(&self) -> bool {
        self.marked_at != Some(self.b.pc()) && self.b.last().is_some_and(Op::is_terminal)
    }

    pub fn clearing(&self) -> bool {
        !self.ctx.options.disable_locals_clearing
    }
}
