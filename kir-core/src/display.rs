//! Display implementations for kIR
//!
//! Renders units as a readable disassembly listing.

use crate::ast::*;
use std::fmt::{self, Display, Formatter};

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const(i) => write!(f, "const #{}", i),
            Op::Nil => write!(f, "nil"),
            Op::PushBool(b) => write!(f, "push.bool {}", b),
            Op::PushLong(n) => write!(f, "push.long {}", n),
            Op::PushDouble(d) => write!(f, "push.double {}", d),
            Op::PushInt(n) => write!(f, "push.int {}", n),
            Op::Pop => write!(f, "pop"),
            Op::Dup => write!(f, "dup"),
            Op::Box(p) => write!(f, "box.{}", p),
            Op::Unbox(p) => write!(f, "unbox.{}", p),
            Op::Convert { from, to } => write!(f, "convert {}->{}", from, to),
            Op::Load(s) => write!(f, "load {}", s),
            Op::LoadClear(s) => write!(f, "load.clear {}", s),
            Op::Store(s) => write!(f, "store {}", s),
            Op::Clear(s) => write!(f, "clear {}", s),
            Op::LoadThis => write!(f, "load.this"),
            Op::LoadField(i) => write!(f, "field {}", i),
            Op::LoadFieldClear(i) => write!(f, "field.clear {}", i),
            Op::StoreField(i) => write!(f, "field.store {}", i),
            Op::InitField(i) => write!(f, "field.init {}", i),
            Op::VarGet(i) => write!(f, "var.get #{}", i),
            Op::VarSet(i) => write!(f, "var.set #{}", i),
            Op::VarDef { var, init, meta } => {
                write!(f, "var.def #{}", var)?;
                if *init {
                    write!(f, " init")?;
                }
                if let Some(meta) = meta {
                    write!(f, " meta #{}", meta)?;
                }
                Ok(())
            }
            Op::Jump(l) => write!(f, "jump L{}", l),
            Op::JumpIfFalsy(l) => write!(f, "jump.falsy L{}", l),
            Op::JumpIfFalse(l) => write!(f, "jump.false L{}", l),
            Op::JumpIfNotEquiv(l) => write!(f, "jump.not-equiv L{}", l),
            Op::JumpIfNotIdentical(l) => write!(f, "jump.not-identical L{}", l),
            Op::Hash => write!(f, "hash"),
            Op::ShiftMask { shift, mask } => write!(f, "shift-mask {} {:#x}", shift, mask),
            Op::TableSwitch {
                low,
                targets,
                default,
            } => {
                write!(f, "tableswitch low={} [", low)?;
                write_labels(f, targets)?;
                write!(f, "] default L{}", default)
            }
            Op::LookupSwitch {
                keys,
                targets,
                default,
            } => {
                write!(f, "lookupswitch [")?;
                for (i, (k, t)) in keys.iter().zip(targets).enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:L{}", k, t)?;
                }
                write!(f, "] default L{}", default)
            }
            Op::Invoke(n) => write!(f, "invoke {}", n),
            Op::InvokeStatic { method, argc } => write!(f, "invoke.static #{} {}", method, argc),
            Op::InvokeVirtual { method, argc } => {
                write!(f, "invoke.virtual #{} {}", method, argc)
            }
            Op::InvokeReflective { member, argc } => {
                write!(f, "invoke.reflective #{} {}", member, argc)
            }
            Op::InvokeStaticReflective {
                class,
                member,
                argc,
            } => write!(f, "invoke.static-reflective #{} #{} {}", class, member, argc),
            Op::GetStatic(i) => write!(f, "get.static #{}", i),
            Op::GetField { ty, index } => write!(f, "get.field #{} {}", ty, index),
            Op::GetFieldReflective(i) => write!(f, "get.field-reflective #{}", i),
            Op::New { ctor, argc } => write!(f, "new #{} {}", ctor, argc),
            Op::NewReflective { class, argc } => write!(f, "new.reflective #{} {}", class, argc),
            Op::NewInstance { ty, argc } => write!(f, "new.instance #{} {}", ty, argc),
            Op::NewFn { unit, captured } => write!(f, "new.fn unit{} {}", unit, captured),
            Op::KeywordInvoke { site } => write!(f, "keyword.invoke site{}", site),
            Op::ProtocolInvoke { site, argc } => {
                write!(f, "protocol.invoke site{} {}", site, argc)
            }
            Op::InstanceOf(i) => write!(f, "instance-of #{}", i),
            Op::MakeVector(n) => write!(f, "make.vector {}", n),
            Op::MakeMap(n) => write!(f, "make.map {}", n),
            Op::MakeSet(n) => write!(f, "make.set {}", n),
            Op::Throw => write!(f, "throw"),
            Op::Return => write!(f, "return"),
        }
    }
}

fn write_labels(f: &mut Formatter<'_>, labels: &[Label]) -> fmt::Result {
    for (i, l) in labels.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "L{}", l)?;
    }
    Ok(())
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Form(form) => write!(f, "{}", form),
            Constant::Var(sym) => write!(f, "#'{}", sym),
            Constant::Type(name) => write!(f, "type {}", name),
            Constant::Host(r) => {
                write!(f, "{}.{}(", r.class, r.member)?;
                for (i, p) in r.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", r.ret)
            }
        }
    }
}

impl Display for MethodCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "  method {} arity={}", self.name, self.arity)?;
        if self.variadic {
            write!(f, " &rest")?;
        }
        writeln!(f, " locals={}", self.max_locals)?;
        for (pc, op) in self.code.iter().enumerate() {
            for (label, bound) in self.labels.iter().enumerate() {
                if *bound == Some(pc as u32) {
                    writeln!(f, "   L{}:", label)?;
                }
            }
            writeln!(f, "    {:4}  {}", pc, op)?;
        }
        for h in &self.handlers {
            writeln!(
                f,
                "    handler [L{}, L{}) -> L{} {}",
                h.start,
                h.end,
                h.target,
                h.catch.as_deref().unwrap_or("any")
            )?;
        }
        Ok(())
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            UnitKind::Fn { once } => {
                writeln!(f, "unit {}{}", self.name, if *once { " ^:once" } else { "" })?
            }
            UnitKind::Type { name, protocols } => {
                write!(f, "type {}", name)?;
                for p in protocols {
                    write!(f, " {}", p)?;
                }
                writeln!(f)?;
            }
        }
        for (i, c) in self.closed_over.iter().enumerate() {
            write!(f, "  closed {} {}", i, c.name)?;
            if let Some(p) = c.prim {
                write!(f, " ^{}", p)?;
            }
            writeln!(f)?;
        }
        for (i, c) in self.constants.iter().enumerate() {
            writeln!(f, "  #{} = {}", i, c)?;
        }
        for (i, s) in self.keyword_sites.iter().enumerate() {
            writeln!(f, "  site{} keyword {}", i, s.keyword)?;
        }
        for (i, s) in self.protocol_sites.iter().enumerate() {
            writeln!(f, "  site{} protocol {}", i, s.method_var)?;
        }
        for m in &self.methods {
            write!(f, "{}", m)?;
        }
        for child in &self.children {
            write!(f, "{}", child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MethodBuilder;

    #[test]
    fn test_host_constant_signature() {
        let c = Constant::Host(HostRef {
            class: "Numbers".to_string(),
            member: "add".to_string(),
            kind: HostKind::StaticMethod,
            params: vec![HostType::Prim(Prim::Long), HostType::Object],
            ret: HostType::Prim(Prim::Long),
        });
        assert_eq!(c.to_string(), "Numbers.add(long, Object) -> long");
    }

    #[test]
    fn test_switch_rendering() {
        let op = Op::TableSwitch {
            low: 1,
            targets: vec![2, 3],
            default: 4,
        };
        assert_eq!(op.to_string(), "tableswitch low=1 [L2 L3] default L4");
        let op = Op::LookupSwitch {
            keys: vec![7, 9],
            targets: vec![0, 1],
            default: 2,
        };
        assert_eq!(op.to_string(), "lookupswitch [7:L0 9:L1] default L2");
    }

    #[test]
    fn test_method_listing_marks_labels_and_handlers() {
        let mut b = MethodBuilder::new("invoke", 0, true);
        let (start, end) = (b.new_label(), b.new_label());
        b.mark(start);
        b.emit(Op::Nil);
        b.mark(end);
        b.emit(Op::Return);
        b.handler(start, end, end, None);
        let text = b.finish().to_string();
        assert!(text.starts_with("  method invoke arity=0 &rest locals=2\n"));
        assert!(text.contains("   L0:\n"));
        assert!(text.contains("   L1:\n"));
        assert!(text.contains("handler [L0, L1) -> L1 any"));
    }
}
