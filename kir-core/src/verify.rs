//! Structural verifier for compiled units
//!
//! Checks that labels are bound, indices are in range, and that the operand
//! stack depth is consistent along every control-flow edge.

use crate::ast::{MethodCode, Op, Unit};
use crate::error::{Result, VerifyError};

/// Verify a unit and all of its nested units
pub fn verify_unit(unit: &Unit) -> Result<()> {
    for method in &unit.methods {
        verify_method(unit, method)?;
    }
    for child in &unit.children {
        verify_unit(child)?;
    }
    Ok(())
}

pub fn verify_method(unit: &Unit, method: &MethodCode) -> Result<()> {
    let name = || format!("{}/{}", unit.name, method.name);

    for (label, pc) in method.labels.iter().enumerate() {
        match pc {
            None => {
                return Err(VerifyError::UnboundLabel {
                    method: name(),
                    label: label as u32,
                })
            }
            Some(pc) if *pc as usize > method.code.len() => {
                return Err(VerifyError::UnboundLabel {
                    method: name(),
                    label: label as u32,
                })
            }
            _ => {}
        }
    }

    for handler in &method.handlers {
        let range = (
            method.label_pc(handler.start),
            method.label_pc(handler.end),
            method.label_pc(handler.target),
        );
        match range {
            (Some(s), Some(e), Some(_)) if s <= e => {}
            _ => return Err(VerifyError::BadHandler { method: name() }),
        }
    }

    for (pc, op) in method.code.iter().enumerate() {
        check_indices(unit, method, pc, op, &name)?;
    }

    check_stack(method, &name)
}

fn check_indices(
    unit: &Unit,
    method: &MethodCode,
    pc: usize,
    op: &Op,
    name: &dyn Fn() -> String,
) -> Result<()> {
    let range = |what: &'static str, index: u32, len: usize| {
        if (index as usize) < len {
            Ok(())
        } else {
            Err(VerifyError::IndexOutOfRange {
                method: name(),
                pc,
                what,
                index,
            })
        }
    };
    let constants = unit.constants.len();
    match op {
        Op::Load(slot) | Op::LoadClear(slot) | Op::Store(slot) | Op::Clear(slot) => {
            if *slot >= method.max_locals {
                return Err(VerifyError::LocalOutOfRange {
                    method: name(),
                    pc,
                    slot: *slot,
                    max: method.max_locals,
                });
            }
        }
        Op::LoadField(i) | Op::LoadFieldClear(i) | Op::StoreField(i) => {
            range("field", *i as u32, unit.closed_over.len())?
        }
        Op::Const(i)
        | Op::VarGet(i)
        | Op::VarSet(i)
        | Op::GetStatic(i)
        | Op::GetFieldReflective(i)
        | Op::InstanceOf(i) => range("constant", *i, constants)?,
        Op::VarDef { var, meta, .. } => {
            range("constant", *var, constants)?;
            if let Some(meta) = meta {
                range("constant", *meta, constants)?;
            }
        }
        Op::InvokeStatic { method, .. } | Op::InvokeVirtual { method, .. } => {
            range("constant", *method, constants)?
        }
        Op::InvokeReflective { member, .. } => range("constant", *member, constants)?,
        Op::InvokeStaticReflective { class, member, .. } => {
            range("constant", *class, constants)?;
            range("constant", *member, constants)?;
        }
        Op::GetField { ty, .. } => range("constant", *ty, constants)?,
        Op::New { ctor, .. } => range("constant", *ctor, constants)?,
        Op::NewReflective { class, .. } | Op::NewInstance { ty: class, .. } => {
            range("constant", *class, constants)?
        }
        Op::NewFn { unit: child, captured } => {
            range("unit", *child, unit.children.len())?;
            let expected = unit.children[*child as usize].closed_over.len();
            if expected != *captured as usize {
                return Err(VerifyError::IndexOutOfRange {
                    method: name(),
                    pc,
                    what: "capture count",
                    index: *captured as u32,
                });
            }
        }
        Op::KeywordInvoke { site } => range("keyword site", *site, unit.keyword_sites.len())?,
        Op::ProtocolInvoke { site, .. } => {
            range("protocol site", *site, unit.protocol_sites.len())?
        }
        _ => {}
    }
    for label in op.jump_targets() {
        if method.label_pc(label).is_none() {
            return Err(VerifyError::BadJump {
                method: name(),
                pc,
                label,
            });
        }
    }
    Ok(())
}

fn check_stack(method: &MethodCode, name: &dyn Fn() -> String) -> Result<()> {
    let len = method.code.len();
    let mut depth: Vec<Option<usize>> = vec![None; len + 1];
    let mut work: Vec<(usize, usize)> = vec![(0, 0)];
    for handler in &method.handlers {
        if let Some(target) = method.label_pc(handler.target) {
            work.push((target, 1));
        }
    }

    while let Some((pc, d)) = work.pop() {
        match depth.get(pc).copied().flatten() {
            Some(existing) if existing == d => continue,
            Some(existing) => {
                return Err(VerifyError::StackMismatch {
                    method: name(),
                    pc,
                    expected: existing,
                    found: d,
                })
            }
            None => {}
        }
        if pc >= len {
            return Err(VerifyError::FallsOffEnd { method: name() });
        }
        depth[pc] = Some(d);

        let op = &method.code[pc];
        let (pops, pushes) = op.stack_effect();
        if d < pops {
            return Err(VerifyError::StackUnderflow {
                method: name(),
                pc,
            });
        }
        let next = d - pops + pushes;
        for label in op.jump_targets() {
            if let Some(target) = method.label_pc(label) {
                work.push((target, next));
            }
        }
        if !op.is_terminal() {
            work.push((pc + 1, next));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UnitKind;
    use crate::builder::MethodBuilder;

    fn unit_with(method: MethodCode) -> Unit {
        Unit {
            name: "test".into(),
            kind: UnitKind::Fn { once: false },
            methods: vec![method],
            closed_over: vec![],
            constants: vec![],
            keyword_sites: vec![],
            protocol_sites: vec![],
            children: vec![],
        }
    }

    #[test]
    fn test_accepts_branching_code() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        let else_label = b.new_label();
        let end = b.new_label();
        b.emit(Op::Load(1));
        b.emit(Op::JumpIfFalsy(else_label));
        b.emit(Op::PushLong(1));
        b.emit(Op::Jump(end));
        b.mark(else_label);
        b.emit(Op::PushLong(2));
        b.mark(end);
        b.emit(Op::Box(crate::ast::Prim::Long));
        b.emit(Op::Return);
        assert_eq!(verify_unit(&unit_with(b.finish())), Ok(()));
    }

    #[test]
    fn test_rejects_unbalanced_branches() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        let end = b.new_label();
        b.emit(Op::Load(1));
        b.emit(Op::JumpIfFalsy(end));
        b.emit(Op::Nil);
        b.mark(end);
        b.emit(Op::Nil);
        b.emit(Op::Return);
        let err = verify_unit(&unit_with(b.finish())).unwrap_err();
        assert!(matches!(err, VerifyError::StackMismatch { .. }));
    }

    #[test]
    fn test_rejects_underflow_and_bad_locals() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        b.emit(Op::Pop);
        b.emit(Op::Nil);
        b.emit(Op::Return);
        assert!(matches!(
            verify_unit(&unit_with(b.finish())),
            Err(VerifyError::StackUnderflow { .. })
        ));

        let mut b = MethodBuilder::new("invoke", 0, false);
        b.emit(Op::Load(5));
        b.emit(Op::Return);
        assert!(matches!(
            verify_unit(&unit_with(b.finish())),
            Err(VerifyError::LocalOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_unbound_label() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        let nowhere = b.new_label();
        b.emit(Op::Jump(nowhere));
        assert!(matches!(
            verify_unit(&unit_with(b.finish())),
            Err(VerifyError::UnboundLabel { .. })
        ));
    }

    #[test]
    fn test_rejects_fall_off_end() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        b.emit(Op::Nil);
        assert!(matches!(
            verify_unit(&unit_with(b.finish())),
            Err(VerifyError::FallsOffEnd { .. })
        ));
    }
}
