//! Method assembler
//!
//! Accumulates instructions, binds labels and records exception handlers
//! and line numbers for one method body.

use crate::ast::{Handler, Label, MethodCode, Op, Prim};

pub struct MethodBuilder {
    name: String,
    arity: u16,
    variadic: bool,
    params: Vec<Option<Prim>>,
    ret: Option<Prim>,
    code: Vec<Op>,
    labels: Vec<Option<u32>>,
    handlers: Vec<Handler>,
    lines: Vec<(u32, u32)>,
    max_locals: u16,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, arity: u16, variadic: bool) -> Self {
        Self {
            name: name.into(),
            arity,
            variadic,
            params: Vec::new(),
            ret: None,
            code: Vec::new(),
            labels: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            // slot 0 holds `this`, followed by the parameters
            max_locals: arity + 1 + u16::from(variadic),
        }
    }

    pub fn with_signature(mut self, params: Vec<Option<Prim>>, ret: Option<Prim>) -> Self {
        self.params = params;
        self.ret = ret;
        self
    }

    pub fn emit(&mut self, op: Op) {
        self.code.push(op);
    }

    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// The most recently emitted instruction
    pub fn last(&self) -> Option<&Op> {
        self.code.last()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        (self.labels.len() - 1) as Label
    }

    /// Bind `label` to the next instruction
    pub fn mark(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label as usize) {
            *slot = Some(self.code.len() as u32);
        }
    }

    pub fn handler(&mut self, start: Label, end: Label, target: Label, catch: Option<String>) {
        self.handlers.push(Handler {
            start,
            end,
            target,
            catch,
        });
    }

    /// Record the source line of subsequent instructions
    pub fn line(&mut self, line: u32) {
        let pc = self.code.len() as u32;
        if let Some((start, last)) = self.lines.last_mut() {
            if *last == line {
                return;
            }
            if *start == pc {
                *last = line;
                return;
            }
        }
        self.lines.push((pc, line));
    }

    /// Make sure slots `0..=slot` exist
    pub fn touch_local(&mut self, slot: u16) {
        self.max_locals = self.max_locals.max(slot + 1);
    }

    pub fn finish(self) -> MethodCode {
        MethodCode {
            name: self.name,
            arity: self.arity,
            variadic: self.variadic,
            max_locals: self.max_locals,
            params: self.params,
            ret: self.ret,
            code: self.code,
            labels: self.labels,
            handlers: self.handlers,
            lines: self.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_bind_to_next_pc() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        let end = b.new_label();
        b.emit(Op::Load(1));
        b.emit(Op::JumpIfFalsy(end));
        b.emit(Op::Nil);
        b.mark(end);
        b.emit(Op::Nil);
        b.emit(Op::Return);
        let m = b.finish();
        assert_eq!(m.label_pc(end), Some(3));
        assert_eq!(m.max_locals, 2);
    }

    #[test]
    fn test_line_table_collapses_repeats() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        b.line(3);
        b.emit(Op::Nil);
        b.line(3);
        b.emit(Op::Pop);
        b.line(4);
        b.emit(Op::Nil);
        b.emit(Op::Return);
        let m = b.finish();
        assert_eq!(m.lines, vec![(0, 3), (2, 4)]);
        assert_eq!(m.line_at(1), Some(3));
        assert_eq!(m.line_at(3), Some(4));
    }
}
