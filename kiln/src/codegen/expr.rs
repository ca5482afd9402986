//! Expression dispatch, leaves, locals and calls

use kdn::Form;
use kir_core::{Op, Prim};

use super::context::Emitter;
use super::Dest;
use crate::error::{CompileError, Result};
use crate::expr::{
    AssignExpr, AssignTarget, DefExpr, Expr, FnExpr, InvokeExpr, LocalRef,
};

impl Emitter<'_, '_> {
    pub(super) fn emit(&mut self, dest: Dest, expr: &Expr) -> Result<()> {
        match expr {
            Expr::If(e) => return self.emit_if(dest, e),
            Expr::Do(body) => return self.emit_do(dest, body),
            Expr::Let(e) => return self.emit_let(dest, e),
            Expr::LetFn(e) => return self.emit_letfn(dest, e),
            Expr::Recur(e) => return self.emit_recur(e),
            Expr::Try(e) => return self.emit_try(dest, e),
            Expr::Case(e) => return self.emit_case(dest, e),
            Expr::Throw(value) => {
                self.emit(Dest::Boxed, value)?;
                self.b.emit(Op::Throw);
                return Ok(());
            }
            _ => {}
        }

        match dest {
            Dest::Statement
                if expr.is_literal() || matches!(expr, Expr::Local(_) | Expr::Class(_)) =>
            {
                Ok(())
            }
            Dest::Statement => {
                self.emit_leaf(expr)?;
                self.b.emit(Op::Pop);
                Ok(())
            }
            Dest::Boxed => self.emit_leaf(expr),
            Dest::Return => {
                match self.ret {
                    Some(p) => {
                        self.emit_leaf_unboxed(expr, p)?;
                        self.b.emit(Op::Box(p));
                    }
                    None => self.emit_leaf(expr)?,
                }
                self.b.emit(Op::Return);
                Ok(())
            }
            Dest::Unboxed(p) => self.emit_leaf_unboxed(expr, p),
        }
    }

    /// Leave a value of kind `prim`, or a boxed value when `None`
    pub(super) fn emit_as(&mut self, expr: &Expr, prim: Option<Prim>) -> Result<()> {
        match prim {
            Some(p) => self.emit(Dest::Unboxed(p), expr),
            None => self.emit(Dest::Boxed, expr),
        }
    }

    /// Apply `dest` to a boxed value already on the stack
    pub(super) fn finish_boxed(&mut self, dest: Dest) {
        match dest {
            Dest::Statement => self.b.emit(Op::Pop),
            Dest::Boxed => {}
            Dest::Unboxed(p) => self.b.emit(Op::Unbox(p)),
            Dest::Return => {
                if let Some(p) = self.ret {
                    self.b.emit(Op::Unbox(p));
                    self.b.emit(Op::Box(p));
                }
                self.b.emit(Op::Return)
            }
        }
    }

    /// A leaf as a boxed value
    fn emit_leaf(&mut self, expr: &Expr) -> Result<()> {
        if let Some(p) = expr.prim() {
            self.emit_raw(expr, p)?;
            self.b.emit(Op::Box(p));
            return Ok(());
        }
        match expr {
            Expr::Nil => self.b.emit(Op::Nil),
            Expr::Bool(b) => {
                self.b.emit(Op::PushBool(*b));
                self.b.emit(Op::Box(Prim::Bool));
            }
            Expr::Long(n) => {
                let i = self.pool.form(&Form::Long(*n));
                self.b.emit(Op::Const(i));
            }
            Expr::Double(d) => {
                let i = self.pool.form(&Form::Double(*d));
                self.b.emit(Op::Const(i));
            }
            Expr::Const(form) => {
                let i = self.pool.form(form);
                self.b.emit(Op::Const(i));
            }
            Expr::Class(name) => {
                let i = self.pool.ty(name);
                self.b.emit(Op::Const(i));
            }
            Expr::Vector(items) => {
                for item in items {
                    self.emit(Dest::Boxed, item)?;
                }
                self.b.emit(Op::MakeVector(items.len() as u16));
            }
            Expr::Map(pairs) => {
                for (k, v) in pairs {
                    self.emit(Dest::Boxed, k)?;
                    self.emit(Dest::Boxed, v)?;
                }
                self.b.emit(Op::MakeMap(pairs.len() as u16));
            }
            Expr::Set(items) => {
                for item in items {
                    self.emit(Dest::Boxed, item)?;
                }
                self.b.emit(Op::MakeSet(items.len() as u16));
            }
            Expr::Local(r) => {
                self.emit_local(r)?;
                if let Some(p) = r.prim {
                    self.b.emit(Op::Box(p));
                }
            }
            Expr::Var(v) => {
                let i = self.pool.var(&v.sym);
                self.b.emit(Op::VarGet(i));
            }
            Expr::TheVar(v) => {
                let i = self.pool.var(&v.sym);
                self.b.emit(Op::Const(i));
            }
            Expr::Def(e) => self.emit_def(e)?,
            Expr::Assign(e) => self.emit_assign(e)?,
            Expr::Fn(e) => self.emit_fn(e)?,
            Expr::Invoke(e) => self.emit_invoke(e)?,
            Expr::KeywordInvoke(e) => {
                self.emit(Dest::Boxed, &e.target)?;
                self.line(e.line);
                let site = self.pool.keyword_site(&e.keyword);
                self.b.emit(Op::KeywordInvoke { site });
            }
            Expr::ProtocolInvoke(e) => {
                for arg in &e.args {
                    self.emit(Dest::Boxed, arg)?;
                }
                self.line(e.line);
                let site = self.pool.protocol_site(&e.var.sym);
                self.b.emit(Op::ProtocolInvoke {
                    site,
                    argc: e.args.len() as u16,
                });
            }
            Expr::Host(e) => {
                let ret = self.emit_host(e)?;
                if let Some(p) = ret {
                    self.b.emit(Op::Box(p));
                }
            }
            Expr::InstanceOf(_) => {
                self.emit_raw(expr, Prim::Bool)?;
                self.b.emit(Op::Box(Prim::Bool));
            }
            Expr::DefType(e) => {
                // loading the enclosing unit attaches the type's methods
                self.pool.child(e.unit.clone());
                let i = self.pool.ty(&e.name);
                self.b.emit(Op::Const(i));
            }
            Expr::Reify(e) => {
                for capture in &e.captures {
                    self.emit_local(capture)?;
                }
                self.pool.child(e.unit.clone());
                let ty = self.pool.ty(&e.name);
                self.line(e.line);
                self.b.emit(Op::NewInstance {
                    ty,
                    argc: e.captures.len() as u16,
                });
            }
            Expr::If(_)
            | Expr::Do(_)
            | Expr::Let(_)
            | Expr::LetFn(_)
            | Expr::Recur(_)
            | Expr::Throw(_)
            | Expr::Try(_)
            | Expr::Case(_) => self.emit(Dest::Boxed, expr)?,
        }
        Ok(())
    }

    /// A leaf as an unboxed `prim`, converting from its own kind
    fn emit_leaf_unboxed(&mut self, expr: &Expr, prim: Prim) -> Result<()> {
        match expr.prim() {
            Some(own) => {
                self.emit_raw(expr, own)?;
                if own != prim {
                    self.b.emit(Op::Convert { from: own, to: prim });
                }
            }
            None => match (expr, prim) {
                (Expr::Bool(b), Prim::Bool) => self.b.emit(Op::PushBool(*b)),
                _ => {
                    self.emit_leaf(expr)?;
                    self.b.emit(Op::Unbox(prim));
                }
            },
        }
        Ok(())
    }

    /// Push the unboxed result of a leaf whose own kind is `prim`
    fn emit_raw(&mut self, expr: &Expr, prim: Prim) -> Result<()> {
        match expr {
            Expr::Long(n) => self.b.emit(Op::PushLong(*n)),
            Expr::Double(d) => self.b.emit(Op::PushDouble(*d)),
            Expr::Local(r) => self.emit_local(r)?,
            Expr::InstanceOf(e) => {
                self.emit(Dest::Boxed, &e.expr)?;
                let i = self.pool.ty(&e.class);
                self.b.emit(Op::InstanceOf(i));
            }
            Expr::Host(e) => {
                self.emit_host(e)?;
            }
            _ => {
                return Err(CompileError::type_error(format!(
                    "Expression cannot be emitted as a primitive {}",
                    prim
                )))
            }
        }
        Ok(())
    }

    // ========== Locals ==========

    /// Push a local's slot as stored, clearing it at its last use
    pub(super) fn emit_local(&mut self, r: &LocalRef) -> Result<()> {
        let binding = self.ctx.binding(r.binding);
        let clear = self.clearing()
            && binding.prim.is_none()
            && binding.can_be_cleared
            && !binding.used_in_catch_finally
            && self.ctx.use_site(r.site).should_clear;

        if self.ctx.method(self.frame).locals.contains(&r.binding) {
            let op = match (binding.idx, clear) {
                (0, _) => Op::LoadThis,
                (idx, true) => Op::LoadClear(idx),
                (idx, false) => Op::Load(idx),
            };
            self.b.emit(op);
            return Ok(());
        }

        let obj = self.ctx.obj(self.obj);
        let field = obj.field_index(r.binding).ok_or_else(|| {
            CompileError::scope(format!("Local {} is not visible here", binding.name))
        })?;
        if clear && obj.once {
            self.b.emit(Op::LoadFieldClear(field));
        } else {
            self.b.emit(Op::LoadField(field));
        }
        Ok(())
    }

    /// Slots safe to release before a tail call: every boxed local of
    /// this method that no catch or finally can still read
    fn dead_slots(&self) -> Vec<u16> {
        let mut keep = Vec::new();
        let mut slots = Vec::new();
        for b in self.ctx.method_bindings(self.frame) {
            if b.idx == 0 {
                continue;
            }
            if b.prim.is_some() || b.used_in_catch_finally || !b.can_be_cleared {
                keep.push(b.idx);
            } else {
                slots.push(b.idx);
            }
        }
        slots.retain(|s| !keep.contains(s));
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    // ========== Vars ==========

    fn emit_def(&mut self, e: &DefExpr) -> Result<()> {
        if let Some(init) = &e.init {
            self.emit(Dest::Boxed, init)?;
        }
        let var = self.pool.var(&e.var.sym);
        let meta = e.meta.as_ref().map(|m| self.pool.form(m));
        self.b.emit(Op::VarDef {
            var,
            init: e.init.is_some(),
            meta,
        });
        Ok(())
    }

    fn emit_assign(&mut self, e: &AssignExpr) -> Result<()> {
        match &e.target {
            AssignTarget::Var(v) => {
                self.emit(Dest::Boxed, &e.value)?;
                let i = self.pool.var(&v.sym);
                self.b.emit(Op::VarSet(i));
            }
            AssignTarget::Field(binding) => {
                let prim = self.ctx.binding(*binding).prim;
                let field = self.ctx.obj(self.obj).field_index(*binding).ok_or_else(|| {
                    CompileError::scope(format!(
                        "Cannot assign to non-mutable: {}",
                        self.ctx.binding(*binding).name
                    ))
                })?;
                self.emit_as(&e.value, prim)?;
                self.b.emit(Op::Dup);
                self.b.emit(Op::StoreField(field));
                if let Some(p) = prim {
                    self.b.emit(Op::Box(p));
                }
            }
        }
        Ok(())
    }

    // ========== Fns and calls ==========

    pub(super) fn emit_fn(&mut self, e: &FnExpr) -> Result<()> {
        for capture in &e.captures {
            self.emit_local(capture)?;
        }
        let unit = self.pool.child(e.unit.clone());
        self.b.emit(Op::NewFn {
            unit,
            captured: e.captures.len() as u16,
        });
        Ok(())
    }

    fn emit_invoke(&mut self, e: &InvokeExpr) -> Result<()> {
        self.emit(Dest::Boxed, &e.f)?;
        for arg in &e.args {
            self.emit(Dest::Boxed, arg)?;
        }
        if e.tail && self.clearing() {
            for slot in self.dead_slots() {
                self.b.emit(Op::Clear(slot));
            }
        }
        self.line(e.line);
        self.b.emit(Op::Invoke(e.args.len() as u16));
        Ok(())
    }
}
