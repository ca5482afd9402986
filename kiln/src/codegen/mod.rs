//! Code generation - emit kIR units from analyzed expressions
//!
//! One unit per fn or deftype. Each [`FnMethod`] becomes a [`MethodCode`];
//! nested fns were emitted when they were analyzed and are attached here
//! as children of the unit that constructs them.
//!
//! Every expression is emitted towards a [`Dest`]: discarded, left boxed
//! on the stack, left as an unboxed primitive, or returned. Branching
//! forms pass the destination down to their arms so a `Return` never has
//! to jump to a shared exit.

mod context;
mod control;
mod expr;
mod interop;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use kir_core::{Capture, MethodBuilder, MethodCode, Prim, Unit, UnitKind};
use log::debug;

use crate::context::CompileContext;
use crate::env::ObjId;
use crate::error::Result;
use crate::expr::FnMethod;

use context::{Emitter, UnitPool};

/// Where an emitted expression's value goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dest {
    Statement,
    Boxed,
    Unboxed(Prim),
    Return,
}

/// Emit the unit for a fn or deftype whose methods have been analyzed
pub(crate) fn emit_unit(
    ctx: &CompileContext<'_>,
    obj: ObjId,
    kind: UnitKind,
    methods: &[FnMethod],
) -> Result<Arc<Unit>> {
    let frame = ctx.obj(obj);
    let closed_over = frame
        .closes
        .iter()
        .map(|b| {
            let binding = ctx.binding(*b);
            Capture {
                name: binding.name.name().to_string(),
                prim: binding.prim,
                mutable: binding.mutable,
            }
        })
        .collect();

    let mut pool = UnitPool::default();
    let mut codes = Vec::with_capacity(methods.len());
    for method in methods {
        codes.push(emit_method(ctx, obj, &mut pool, method)?);
    }

    let unit = Unit {
        name: frame.name.clone(),
        kind,
        methods: codes,
        closed_over,
        constants: pool.constants,
        keyword_sites: pool.keyword_sites,
        protocol_sites: pool.protocol_sites,
        children: pool.children,
    };
    debug!(
        "emitted {} ({} methods, {} constants, {} children)",
        unit.name,
        unit.methods.len(),
        unit.constants.len(),
        unit.children.len()
    );
    Ok(Arc::new(unit))
}

fn emit_method(
    ctx: &CompileContext<'_>,
    obj: ObjId,
    pool: &mut UnitPool,
    method: &FnMethod,
) -> Result<MethodCode> {
    let params = method.params.iter().map(|b| ctx.binding(*b).prim).collect();
    let builder = MethodBuilder::new(
        method.name.clone(),
        method.params.len() as u16,
        method.rest.is_some(),
    )
    .with_signature(params, method.ret);

    let mut e = Emitter::new(ctx, obj, method.frame, pool, builder);
    e.line(method.line);
    // a recur in the body restarts the method
    let head = e.b.new_label();
    e.mark(head);
    e.loop_head = Some(head);
    e.ret = method.ret;
    e.emit(Dest::Return, &method.body)?;
    e.b.touch_local(ctx.method(method.frame).max_slot);
    Ok(e.b.finish())
}
