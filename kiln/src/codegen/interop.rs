//! Host member access

use kir_core::{HostRef, Op, Prim};

use super::context::Emitter;
use super::Dest;
use crate::error::{CompileError, Result};
use crate::expr::{Expr, HostExpr, HostOp};

impl Emitter<'_, '_> {
    /// Emit a host access and return the primitive kind it leaves on the
    /// stack, or `None` for a boxed value
    pub(super) fn emit_host(&mut self, e: &HostExpr) -> Result<Option<Prim>> {
        let argc = e.args.len() as u16;
        match &e.op {
            HostOp::StaticMethod { member: Some(m), .. } => {
                self.emit_host_args(&e.args, Some(m))?;
                self.line(e.line);
                let method = self.pool.host(m);
                self.b.emit(Op::InvokeStatic { method, argc });
                Ok(m.ret.prim())
            }
            HostOp::StaticMethod {
                class,
                name,
                member: None,
            } => {
                self.emit_host_args(&e.args, None)?;
                self.line(e.line);
                let class = self.pool.ty(class);
                let member = self.pool.name(name);
                self.b.emit(Op::InvokeStaticReflective {
                    class,
                    member,
                    argc,
                });
                Ok(None)
            }
            HostOp::InstanceMethod { name, member } => {
                self.emit(Dest::Boxed, self.target(e)?)?;
                self.emit_host_args(&e.args, member.as_ref())?;
                self.line(e.line);
                match member {
                    Some(m) => {
                        let method = self.pool.host(m);
                        self.b.emit(Op::InvokeVirtual { method, argc });
                        Ok(m.ret.prim())
                    }
                    None => {
                        let member = self.pool.name(name);
                        self.b.emit(Op::InvokeReflective { member, argc });
                        Ok(None)
                    }
                }
            }
            HostOp::StaticField { member, .. } => {
                let i = self.pool.host(member);
                self.b.emit(Op::GetStatic(i));
                Ok(member.ret.prim())
            }
            HostOp::InstanceField { name, field } => {
                self.emit(Dest::Boxed, self.target(e)?)?;
                self.line(e.line);
                match field {
                    Some(f) => {
                        let ty = self.pool.ty(&f.ty);
                        self.b.emit(Op::GetField { ty, index: f.index });
                        Ok(f.prim)
                    }
                    None => {
                        let i = self.pool.name(name);
                        self.b.emit(Op::GetFieldReflective(i));
                        Ok(None)
                    }
                }
            }
            HostOp::New {
                class,
                member,
                deftype,
            } => {
                let resolved = member.as_ref().filter(|_| !deftype);
                self.emit_host_args(&e.args, resolved)?;
                self.line(e.line);
                let op = match resolved {
                    Some(m) => Op::New {
                        ctor: self.pool.host(m),
                        argc,
                    },
                    None if *deftype => Op::NewInstance {
                        ty: self.pool.ty(class),
                        argc,
                    },
                    None => Op::NewReflective {
                        class: self.pool.ty(class),
                        argc,
                    },
                };
                self.b.emit(op);
                Ok(None)
            }
        }
    }

    fn target<'e>(&self, e: &'e HostExpr) -> Result<&'e Expr> {
        e.target
            .as_ref()
            .ok_or_else(|| CompileError::syntax("Malformed member expression"))
    }

    /// Arguments of a resolved member go in as its parameter types;
    /// reflective calls take everything boxed
    fn emit_host_args(&mut self, args: &[Expr], member: Option<&HostRef>) -> Result<()> {
        for (i, arg) in args.iter().enumerate() {
            let prim = member.and_then(|m| m.params.get(i)).and_then(|p| p.prim());
            self.emit_as(arg, prim)?;
        }
        Ok(())
    }
}
