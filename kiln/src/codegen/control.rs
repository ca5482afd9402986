//! Branching, binding and exception forms

use std::collections::HashSet;

use kir_core::{Label, Op, Prim};

use super::context::Emitter;
use super::Dest;
use crate::error::{CompileError, Result};
use crate::expr::{
    CaseExpr, CaseTestType, Expr, IfExpr, LetExpr, LetFnExpr, RecurExpr, SwitchType, TryExpr,
};

/// Class every value reaching an int-keyed case must be an instance of
const NUMBER_CLASS: &str = "Number";

impl Emitter<'_, '_> {
    /// Jump to `end` unless the arm already left
    fn exit_arm(&mut self, dest: Dest, end: Label) {
        if dest != Dest::Return && !self.terminated() {
            self.b.emit(Op::Jump(end));
        }
    }

    pub(super) fn emit_if(&mut self, dest: Dest, e: &IfExpr) -> Result<()> {
        let otherwise = self.b.new_label();
        let end = self.b.new_label();

        self.line(e.line);
        if e.test.prim() == Some(Prim::Bool) {
            self.emit(Dest::Unboxed(Prim::Bool), &e.test)?;
            self.b.emit(Op::JumpIfFalse(otherwise));
        } else {
            self.emit(Dest::Boxed, &e.test)?;
            self.b.emit(Op::JumpIfFalsy(otherwise));
        }

        self.emit(dest, &e.then)?;
        self.exit_arm(dest, end);
        self.mark(otherwise);
        self.emit(dest, &e.otherwise)?;
        self.mark(end);
        Ok(())
    }

    pub(super) fn emit_do(&mut self, dest: Dest, body: &[Expr]) -> Result<()> {
        let Some((last, init)) = body.split_last() else {
            return self.emit(dest, &Expr::Nil);
        };
        for e in init {
            self.emit(Dest::Statement, e)?;
        }
        self.emit(dest, last)
    }

    pub(super) fn emit_let(&mut self, dest: Dest, e: &LetExpr) -> Result<()> {
        for (binding, init) in &e.bindings {
            let b = self.ctx.binding(*binding);
            let (idx, prim) = (b.idx, b.prim);
            self.emit_as(init, prim)?;
            self.b.emit(Op::Store(idx));
        }
        if !e.is_loop {
            return self.emit(dest, &e.body);
        }

        let head = self.b.new_label();
        self.mark(head);
        let outer = self.loop_head.replace(head);
        let result = self.emit(dest, &e.body);
        self.loop_head = outer;
        result
    }

    /// Bind every name to nil, create the fns, then point each fn's
    /// captured siblings at the finished objects
    pub(super) fn emit_letfn(&mut self, dest: Dest, e: &LetFnExpr) -> Result<()> {
        for (binding, _) in &e.bindings {
            self.b.emit(Op::Nil);
            self.b.emit(Op::Store(self.ctx.binding(*binding).idx));
        }
        for (binding, init) in &e.bindings {
            self.emit(Dest::Boxed, init)?;
            self.b.emit(Op::Store(self.ctx.binding(*binding).idx));
        }

        let names: HashSet<_> = e.bindings.iter().map(|(b, _)| *b).collect();
        for (binding, init) in &e.bindings {
            let Expr::Fn(f) = init else { continue };
            let fn_slot = self.ctx.binding(*binding).idx;
            for (field, capture) in f.captures.iter().enumerate() {
                if !names.contains(&capture.binding) {
                    continue;
                }
                self.b.emit(Op::Load(fn_slot));
                self.b.emit(Op::Load(self.ctx.binding(capture.binding).idx));
                self.b.emit(Op::InitField(field as u16));
            }
        }
        self.emit(dest, &e.body)
    }

    pub(super) fn emit_recur(&mut self, e: &RecurExpr) -> Result<()> {
        let head = self
            .loop_head
            .ok_or_else(|| CompileError::scope("Can only recur from tail position"))?;
        for (target, arg) in e.targets.iter().zip(&e.args) {
            self.emit_as(arg, self.ctx.binding(*target).prim)?;
        }
        self.line(e.line);
        for target in e.targets.iter().rev() {
            self.b.emit(Op::Store(self.ctx.binding(*target).idx));
        }
        self.b.emit(Op::Jump(head));
        Ok(())
    }

    /// Body and catch values pass through `ret_slot` so finally runs on
    /// an empty stack; the catch-all rethrows from `finally_slot`
    pub(super) fn emit_try(&mut self, dest: Dest, e: &TryExpr) -> Result<()> {
        let start = self.b.new_label();
        let end = self.b.new_label();
        let done = self.b.new_label();

        self.mark(start);
        self.emit(Dest::Boxed, &e.body)?;
        self.b.emit(Op::Store(e.ret_slot));
        self.mark(end);
        self.emit_finally(e)?;
        self.b.emit(Op::Load(e.ret_slot));
        self.finish_boxed(dest);
        self.exit_arm(dest, done);

        let mut catch_ranges = Vec::with_capacity(e.catches.len());
        for clause in &e.catches {
            let target = self.b.new_label();
            let clause_end = self.b.new_label();
            self.b.handler(start, end, target, Some(clause.class.clone()));

            self.mark(target);
            self.b.emit(Op::Store(self.ctx.binding(clause.binding).idx));
            self.emit(Dest::Boxed, &clause.body)?;
            self.b.emit(Op::Store(e.ret_slot));
            self.mark(clause_end);
            self.emit_finally(e)?;
            self.b.emit(Op::Load(e.ret_slot));
            self.finish_boxed(dest);
            self.exit_arm(dest, done);
            catch_ranges.push((target, clause_end));
        }

        if e.finally.is_some() {
            let target = self.b.new_label();
            self.b.handler(start, end, target, None);
            for (from, to) in catch_ranges {
                self.b.handler(from, to, target, None);
            }
            self.mark(target);
            self.b.emit(Op::Store(e.finally_slot));
            self.emit_finally(e)?;
            self.b.emit(Op::Load(e.finally_slot));
            self.b.emit(Op::Throw);
        }
        self.mark(done);
        Ok(())
    }

    fn emit_finally(&mut self, e: &TryExpr) -> Result<()> {
        match &e.finally {
            Some(finally) => self.emit(Dest::Statement, finally),
            None => Ok(()),
        }
    }

    pub(super) fn emit_case(&mut self, dest: Dest, e: &CaseExpr) -> Result<()> {
        let temp = self.ctx.binding(e.temp).idx;
        let default = self.b.new_label();
        let end = self.b.new_label();

        self.line(e.line);
        self.emit(Dest::Boxed, &e.expr)?;
        self.b.emit(Op::Store(temp));

        match e.test_type {
            CaseTestType::Int => {
                self.b.emit(Op::Load(temp));
                let number = self.pool.ty(NUMBER_CLASS);
                self.b.emit(Op::InstanceOf(number));
                self.b.emit(Op::JumpIfFalse(default));
                self.b.emit(Op::Load(temp));
                self.b.emit(Op::Unbox(Prim::Int));
            }
            CaseTestType::HashIdentity | CaseTestType::HashEquiv => {
                self.b.emit(Op::Load(temp));
                self.b.emit(Op::Hash);
            }
        }
        if e.mask != 0 {
            self.b.emit(Op::ShiftMask {
                shift: e.shift,
                mask: e.mask,
            });
        }

        let labels: Vec<Label> = e.buckets.iter().map(|_| self.b.new_label()).collect();
        let keys: Vec<i32> = e.buckets.iter().map(|b| b.key).collect();
        match (e.switch, keys.first(), keys.last()) {
            (SwitchType::Compact, Some(&low), Some(&high)) => {
                let targets = (low..=high)
                    .map(|k| match keys.binary_search(&k) {
                        Ok(i) => labels[i],
                        Err(_) => default,
                    })
                    .collect();
                self.b.emit(Op::TableSwitch {
                    low,
                    targets,
                    default,
                });
            }
            _ => self.b.emit(Op::LookupSwitch {
                keys,
                targets: labels.clone(),
                default,
            }),
        }

        for (bucket, label) in e.buckets.iter().zip(labels) {
            self.mark(label);
            let count = bucket.entries.len();
            for (i, entry) in bucket.entries.iter().enumerate() {
                let next = if i + 1 == count {
                    default
                } else {
                    self.b.new_label()
                };
                self.b.emit(Op::Load(temp));
                let test = self.pool.form(&entry.test);
                self.b.emit(Op::Const(test));
                if e.test_type == CaseTestType::HashIdentity {
                    self.b.emit(Op::JumpIfNotIdentical(next));
                } else {
                    self.b.emit(Op::JumpIfNotEquiv(next));
                }
                self.emit(dest, &entry.then)?;
                self.exit_arm(dest, end);
                if next != default {
                    self.mark(next);
                }
            }
        }

        self.mark(default);
        self.emit(dest, &e.default)?;
        self.mark(end);
        Ok(())
    }
}
