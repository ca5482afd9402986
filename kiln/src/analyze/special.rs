//! Parsers for the core special forms
//!
//! `def`, `if`, `let*`/`loop*`, `recur`, `quote`, `var`, `set!`,
//! `try`, `throw` and `letfn*`. Forms that need a method of their own in
//! the current context are rewritten into an immediately invoked
//! `^:once` thunk and analyzed again.

use kdn::{Form, Symbol};
use kir_core::Prim;
use log::debug;

use super::{analyze, analyze_body, operand, var_ref, wrap_in_once_fn};
use crate::context::{CompileContext, Context};
use crate::env::{BindingId, ObjKind};
use crate::error::{CompileError, Result, WarningKind};
use crate::expr::{
    AssignExpr, AssignTarget, CatchClause, DefExpr, Expr, IfExpr, LetExpr, LetFnExpr, RecurExpr,
    TryExpr, Ty,
};

// ========== def ==========

pub(super) fn analyze_def(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    let (doc, init) = match items {
        [_, _, Form::Str(doc), init] => (Some(doc.clone()), Some(init)),
        [_, _, _, _, ..] => return Err(CompileError::syntax("Too many arguments to def")),
        [_, _, init] => (None, Some(init)),
        [_, _] => (None, None),
        _ => return Err(CompileError::syntax("Too few arguments to def")),
    };
    let sym = match &items[1] {
        Form::Symbol(s) => s,
        _ => return Err(CompileError::syntax("First argument to def must be a Symbol")),
    };
    let current = ctx.rt.current_ns();
    if sym.ns().is_some_and(|ns| ns != &*current.name) {
        return Err(CompileError::syntax("Can't create defs outside of current ns"));
    }

    let var = ctx.rt.intern(&current.name, sym.name());
    let meta = sym.meta().cloned().unwrap_or_default();
    let dynamic = meta.flag("dynamic");
    var.set_dynamic(dynamic);
    let name = sym.name();
    if !dynamic && name.len() > 2 && name.starts_with('*') && name.ends_with('*') {
        ctx.warn(
            WarningKind::Dynamic,
            format!(
                "Warning: {0} not declared dynamic and thus is not dynamically rebindable, \
                 but its name suggests otherwise. Please either indicate ^:dynamic {0} or change the name.",
                name
            ),
        );
    }
    debug!("def {}", var.symbol());

    let mut entries: Vec<(Form, Form)> = meta.entries().to_vec();
    if let Some(doc) = doc {
        entries.retain(|(k, _)| *k != Form::keyword("doc"));
        entries.push((Form::keyword("doc"), Form::Str(doc)));
    }
    let init = match init {
        Some(form) => Some(analyze(ctx, operand(cx), form)?),
        None => None,
    };
    Ok(Expr::Def(Box::new(DefExpr {
        var: var_ref(var, None),
        init,
        meta: Some(Form::map(entries)),
    })))
}

// ========== if ==========

pub(super) fn analyze_if(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    if items.len() > 4 {
        return Err(CompileError::syntax("Too many arguments to if"));
    }
    if items.len() < 3 {
        return Err(CompileError::syntax("Too few arguments to if"));
    }
    let line = ctx.line();
    let test = analyze(ctx, operand(cx), &items[1])?;

    let branch = ctx.paths.branch(ctx.scope.clear_path);
    let then = {
        let mut arm = ctx.enter();
        arm.scope.clear_path = Some(arm.paths.path(Some(branch)));
        analyze(&mut arm, cx, &items[2])?
    };
    let otherwise = {
        let mut arm = ctx.enter();
        arm.scope.clear_path = Some(arm.paths.path(Some(branch)));
        analyze(&mut arm, cx, items.get(3).unwrap_or(&Form::Nil))?
    };
    Ok(Expr::If(Box::new(IfExpr {
        test,
        then,
        otherwise,
        line,
    })))
}

// ========== let* / loop* ==========

/// Primitive kind a local takes from its init: only long and double
/// locals exist, narrower kinds widen and booleans stay boxed
pub(crate) fn local_prim(init: &Expr) -> Option<Prim> {
    match init.prim()? {
        Prim::Long | Prim::Int => Some(Prim::Long),
        Prim::Double | Prim::Float => Some(Prim::Double),
        Prim::Bool => None,
    }
}

fn binding_vector<'f>(form: Option<&'f Form>) -> Result<&'f [Form]> {
    let bindings = match form {
        Some(Form::Vector(v)) => &v[..],
        _ => return Err(CompileError::syntax("Bad binding form, expected vector")),
    };
    if bindings.len() % 2 != 0 {
        return Err(CompileError::syntax(
            "Bad binding form, expected matched symbol expression pairs",
        ));
    }
    Ok(bindings)
}

fn binding_symbol(form: &Form) -> Result<&Symbol> {
    match form {
        Form::Symbol(s) if s.ns().is_some() => Err(CompileError::syntax(format!(
            "Can't let qualified name: {}",
            s
        ))),
        Form::Symbol(s) => Ok(s),
        other => Err(CompileError::syntax(format!(
            "Bad binding form, expected symbol, got: {}",
            other
        ))),
    }
}

pub(super) fn analyze_let(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    items: &[Form],
    is_loop: bool,
) -> Result<Expr> {
    let bindings = binding_vector(items.get(1))?;
    if cx == Context::Eval || (is_loop && cx == Context::Expression) {
        return analyze(ctx, cx, &wrap_in_once_fn(form));
    }
    let body = &items[2..];
    let mut boxed = vec![false; bindings.len() / 2];

    // A recur that passes the wrong primitive kind marks its loop local;
    // the loop is analyzed again with that local boxed.
    loop {
        let mut scope = ctx.enter();
        let mut inits = Vec::with_capacity(boxed.len());
        for (i, pair) in bindings.chunks(2).enumerate() {
            let sym = binding_symbol(&pair[0])?;
            let init = analyze(&mut scope, Context::Expression, &pair[1])?;
            let prim = if boxed[i] {
                if scope.options.warn_on_boxing {
                    scope.warn(WarningKind::Boxing, format!("Auto-boxing loop arg: {}", sym));
                }
                None
            } else {
                local_prim(&init)
            };
            let id = scope.register_local(sym, sym.tag().map(|t| t.to_string()), prim, false);
            inits.push((id, init));
        }

        if !is_loop {
            let body = analyze_body(&mut scope, cx, body)?;
            return Ok(Expr::Let(Box::new(LetExpr {
                bindings: inits,
                body,
                is_loop,
            })));
        }

        let locals: Vec<BindingId> = inits.iter().map(|(id, _)| *id).collect();
        let body = {
            let enclosing = scope.scope.clear_path;
            let looproot = scope.paths.path(enclosing);
            let clear_root = scope.paths.path(Some(looproot));
            let clear_path = scope.paths.path(Some(looproot));
            let mut inner = scope.enter();
            inner.scope.clear_root = Some(clear_root);
            inner.scope.clear_path = Some(clear_path);
            inner.scope.loop_locals = Some(locals.clone());
            inner.scope.no_recur = false;
            inner.scope.method_return = cx == Context::Return && inner.scope.method_return;
            analyze_body(&mut inner, Context::Return, body)?
        };

        let mut retry = false;
        for (i, id) in locals.iter().enumerate() {
            if scope.binding(*id).recur_mismatch && !boxed[i] {
                boxed[i] = true;
                retry = true;
            }
        }
        if !retry {
            return Ok(Expr::Let(Box::new(LetExpr {
                bindings: inits,
                body,
                is_loop,
            })));
        }
        debug!("reanalyzing loop with boxed locals {:?}", boxed);
    }
}

// ========== recur ==========

fn accepts(local: Prim, arg: Option<Prim>) -> bool {
    matches!(
        (local, arg),
        (Prim::Long, Some(Prim::Long | Prim::Int)) | (Prim::Double, Some(Prim::Double | Prim::Float))
    )
}

pub(super) fn analyze_recur(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    if ctx.scope.in_catch_finally {
        return Err(CompileError::scope("Cannot recur from catch/finally"));
    }
    let targets = match (&ctx.scope.loop_locals, cx) {
        (Some(locals), Context::Return) => locals.clone(),
        _ => return Err(CompileError::scope("Can only recur from tail position")),
    };
    if ctx.scope.no_recur {
        return Err(CompileError::scope("Cannot recur across try"));
    }
    let line = ctx.line();
    let args = items[1..]
        .iter()
        .map(|f| analyze(ctx, Context::Expression, f))
        .collect::<Result<Vec<_>>>()?;
    if args.len() != targets.len() {
        return Err(CompileError::scope(format!(
            "Mismatched argument count to recur, expected: {} args, got: {}",
            targets.len(),
            args.len()
        )));
    }

    for (target, arg) in targets.iter().zip(&args) {
        let Some(prim) = ctx.binding(*target).prim else {
            continue;
        };
        if accepts(prim, arg.prim()) {
            continue;
        }
        ctx.binding_mut(*target).recur_mismatch = true;
        if ctx.options.warn_on_boxing {
            let had = match arg.static_type() {
                Some(Ty::Prim(p)) => p.name().to_string(),
                Some(Ty::Class(c)) => c,
                _ => "Object".to_string(),
            };
            let name = ctx.binding(*target).name.clone();
            ctx.warn(
                WarningKind::Boxing,
                format!(
                    "recur arg for primitive local: {} is not matching primitive, had: {}, needed: {}",
                    name,
                    had,
                    prim.name()
                ),
            );
        }
    }
    Ok(Expr::Recur(Box::new(RecurExpr {
        targets,
        args,
        line,
    })))
}

// ========== quote / var ==========

pub(super) fn analyze_quote(items: &[Form]) -> Result<Expr> {
    if items.len() != 2 {
        return Err(CompileError::syntax(format!(
            "Wrong number of args ({}) passed to quote",
            items.len() - 1
        )));
    }
    Ok(match &items[1] {
        Form::Nil => Expr::Nil,
        Form::Bool(b) => Expr::Bool(*b),
        Form::Long(n) => Expr::Long(*n),
        Form::Double(d) => Expr::Double(*d),
        other => Expr::Const(other.clone()),
    })
}

pub(super) fn analyze_the_var(ctx: &mut CompileContext<'_>, items: &[Form]) -> Result<Expr> {
    let sym = match items {
        [_, Form::Symbol(s)] => s,
        _ => return Err(CompileError::syntax("Malformed var special form, expecting (var sym)")),
    };
    match ctx.rt.resolve_var(sym) {
        Some(var) => Ok(Expr::TheVar(var_ref(var, None))),
        None => Err(CompileError::resolution(format!(
            "Unable to resolve var: {} in this context",
            sym
        ))),
    }
}

// ========== set! ==========

pub(super) fn analyze_assign(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    if items.len() != 3 {
        return Err(CompileError::syntax(
            "Malformed assignment, expecting (set! target val)",
        ));
    }
    let target = match &items[1] {
        Form::Symbol(sym) => match ctx.lookup_local(sym) {
            Some(binding) => AssignTarget::Field(assignable_field(ctx, binding)?),
            None => match super::analyze_symbol(ctx, sym)? {
                Expr::Var(var) => AssignTarget::Var(var),
                _ => return Err(CompileError::syntax("Invalid assignment target")),
            },
        },
        _ => return Err(CompileError::syntax("Invalid assignment target")),
    };
    let value = analyze(ctx, operand(cx), &items[2])?;
    Ok(Expr::Assign(Box::new(AssignExpr { target, value })))
}

/// A local may be assigned only when it is a mutable field of the
/// deftype whose method is being analyzed
fn assignable_field(ctx: &mut CompileContext<'_>, binding: BindingId) -> Result<BindingId> {
    let in_own_type = ctx.scope.method.is_some_and(|m| {
        let obj = ctx.obj(ctx.method(m).obj);
        obj.kind == ObjKind::Type && obj.field_index(binding).is_some()
    });
    if !in_own_type || !ctx.binding(binding).mutable {
        return Err(CompileError::scope(format!(
            "Cannot assign to non-mutable: {}",
            ctx.binding(binding).name
        )));
    }
    ctx.close_over(binding, ctx.scope.method);
    Ok(binding)
}

// ========== throw ==========

pub(super) fn analyze_throw(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    items: &[Form],
) -> Result<Expr> {
    match items.len() {
        2 => {}
        n if n > 2 => {
            return Err(CompileError::syntax(
                "Too many arguments to throw, throw expects a single Throwable instance",
            ))
        }
        _ => {
            return Err(CompileError::syntax(
                "Too few arguments to throw, throw expects a single Throwable instance",
            ))
        }
    }
    if cx == Context::Eval {
        return analyze(ctx, cx, &wrap_in_once_fn(form));
    }
    let value = analyze(ctx, Context::Expression, &items[1])?;
    Ok(Expr::Throw(Box::new(value)))
}

// ========== try ==========

struct CatchForm<'f> {
    class: &'f Symbol,
    local: &'f Symbol,
    body: &'f [Form],
}

pub(super) fn analyze_try(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    items: &[Form],
) -> Result<Expr> {
    // handlers start on an empty stack, which only a method-level return
    // position guarantees
    if cx != Context::Return || !ctx.scope.method_return {
        return analyze(ctx, cx, &wrap_in_once_fn(form));
    }

    let mut body: Vec<Form> = Vec::new();
    let mut catches: Vec<CatchForm<'_>> = Vec::new();
    let mut finally: Option<&[Form]> = None;
    for clause in &items[1..] {
        let head = clause.as_list().and_then(|l| l.first()).and_then(Form::as_symbol);
        match head.filter(|s| s.ns().is_none()).map(Symbol::name) {
            Some("catch") => {
                if finally.is_some() {
                    return Err(CompileError::syntax("finally clause must be last in try expression"));
                }
                catches.push(parse_catch(clause)?);
            }
            Some("finally") => {
                if finally.is_some() {
                    return Err(CompileError::syntax("finally clause must be last in try expression"));
                }
                finally = clause.as_list().map(|l| &l[1..]);
            }
            _ => {
                if finally.is_some() {
                    return Err(CompileError::syntax("finally clause must be last in try expression"));
                }
                if !catches.is_empty() {
                    return Err(CompileError::syntax(
                        "Only catch or finally clause can follow catch in try expression",
                    ));
                }
                body.push(clause.clone());
            }
        }
    }

    let ret_slot = ctx.alloc_slot();
    let finally_slot = ctx.alloc_slot();

    let body = {
        let mut scope = ctx.enter();
        scope.scope.no_recur = true;
        scope.scope.method_return = false;
        analyze_body(&mut scope, cx, &body)?
    };

    let mut clauses = Vec::with_capacity(catches.len());
    for catch in catches {
        let class = catch.class.name().to_string();
        if ctx.rt.classes.lookup(&class).is_none() {
            return Err(CompileError::resolution(format!(
                "Unable to resolve classname: {}",
                catch.class
            )));
        }
        let mut scope = ctx.enter();
        scope.scope.in_catch_finally = true;
        scope.scope.method_return = false;
        let binding = scope.register_local(catch.local, Some(class.clone()), None, false);
        let body = analyze_body(&mut scope, cx, catch.body)?;
        clauses.push(CatchClause {
            class,
            binding,
            body,
        });
    }

    let finally = match finally {
        Some(forms) => {
            let mut scope = ctx.enter();
            scope.scope.in_catch_finally = true;
            scope.scope.method_return = false;
            Some(analyze_body(&mut scope, Context::Statement, forms)?)
        }
        None => None,
    };

    Ok(Expr::Try(Box::new(TryExpr {
        body,
        catches: clauses,
        finally,
        ret_slot,
        finally_slot,
    })))
}

fn parse_catch(clause: &Form) -> Result<CatchForm<'_>> {
    let items = clause.as_list().unwrap_or_default();
    let class = match items.get(1) {
        Some(Form::Symbol(s)) => s,
        _ => return Err(CompileError::syntax("Malformed catch, expecting (catch Class name body*)")),
    };
    let local = match items.get(2) {
        Some(Form::Symbol(s)) if s.ns().is_some() => {
            return Err(CompileError::syntax(format!("Can't bind qualified name: {}", s)))
        }
        Some(Form::Symbol(s)) => s,
        Some(other) => {
            return Err(CompileError::syntax(format!(
                "Bad binding form, expected symbol, got: {}",
                other
            )))
        }
        None => return Err(CompileError::syntax("Malformed catch, expecting (catch Class name body*)")),
    };
    Ok(CatchForm {
        class,
        local,
        body: &items[3..],
    })
}

// ========== letfn* ==========

pub(super) fn analyze_letfn(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    items: &[Form],
) -> Result<Expr> {
    let bindings = binding_vector(items.get(1))?;
    if cx == Context::Eval {
        return analyze(ctx, cx, &wrap_in_once_fn(form));
    }
    let mut scope = ctx.enter();

    // every name is visible to every init
    let mut ids = Vec::with_capacity(bindings.len() / 2);
    for pair in bindings.chunks(2) {
        let sym = binding_symbol(&pair[0])?;
        let id = scope.register_local(sym, None, None, false);
        scope.binding_mut(id).can_be_cleared = false;
        ids.push(id);
    }
    let mut inits = Vec::with_capacity(ids.len());
    for (id, pair) in ids.into_iter().zip(bindings.chunks(2)) {
        inits.push((id, analyze(&mut scope, Context::Expression, &pair[1])?));
    }
    let body = analyze_body(&mut scope, cx, &items[2..])?;
    Ok(Expr::LetFn(Box::new(LetFnExpr {
        bindings: inits,
        body,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn analyze_in(rt: &Runtime, options: &CompileOptions, source: &str) -> Result<Expr> {
        let mut ctx = CompileContext::new(rt, options);
        let form = kdn::read_str(source).map_err(|e| CompileError::read(&e))?;
        // top-level code always runs inside a thunk
        analyze(&mut ctx, Context::Expression, &wrap_in_once_fn(&form))
    }

    fn error(source: &str) -> CompileError {
        let rt = Runtime::new();
        analyze_in(&rt, &CompileOptions::default(), source).unwrap_err()
    }

    #[test]
    fn test_def_arity_errors() {
        assert_eq!(error("(def)").message, "Too few arguments to def");
        assert_eq!(error("(def a 1 2 3)").message, "Too many arguments to def");
        assert_eq!(error("(def \"a\" 1)").message, "First argument to def must be a Symbol");
        assert_eq!(error("(def other/a 1)").message, "Can't create defs outside of current ns");
    }

    #[test]
    fn test_def_docstring_and_dynamic() {
        let rt = Runtime::new();
        let expr = analyze_in(&rt, &CompileOptions::default(), "(def ^:dynamic *x* \"doc\" 1)").unwrap();
        assert!(matches!(expr, Expr::Invoke(_)));
        let var = rt.resolve_var(&Symbol::new("*x*")).unwrap();
        assert!(var.is_dynamic());
    }

    #[test]
    fn test_earmuffed_def_warns() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        let form = kdn::read_str("(def *y* 1)").unwrap();
        analyze(&mut ctx, Context::Expression, &wrap_in_once_fn(&form)).unwrap();
        let warnings = ctx.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::Dynamic);
        assert!(warnings[0].message.contains("*y* not declared dynamic"));
    }

    #[test]
    fn test_if_arity() {
        assert_eq!(error("(if 1 2 3 4)").message, "Too many arguments to if");
        assert_eq!(error("(if 1)").message, "Too few arguments to if");
    }

    #[test]
    fn test_recur_positions() {
        assert_eq!(
            error("(loop* [a 1] (do (recur 2) a))").message,
            "Can only recur from tail position"
        );
        assert_eq!(error("(recur 1)").message, "Mismatched argument count to recur, expected: 0 args, got: 1");
        assert_eq!(
            error("(loop* [a 1] (try (recur 2)))").message,
            "Cannot recur across try"
        );
        assert_eq!(
            error("(loop* [a 1] (try 1 (finally (recur 2))))").message,
            "Cannot recur from catch/finally"
        );
        let err = error("(loop* [a 1 b 2] (recur 1))");
        assert_eq!(err.kind, ErrorKind::Scope);
        assert_eq!(err.message, "Mismatched argument count to recur, expected: 2 args, got: 1");
    }

    #[test]
    fn test_loop_local_boxed_after_mismatch() {
        let rt = Runtime::new();
        let options = CompileOptions::default().warn_on_boxing(true);
        let mut ctx = CompileContext::new(&rt, &options);
        let form = kdn::read_str("(loop* [i 0] (if (nil? i) i (recur \"s\")))").unwrap();
        analyze(&mut ctx, Context::Expression, &wrap_in_once_fn(&form)).unwrap();
        let messages: Vec<String> = ctx.take_warnings().into_iter().map(|w| w.message).collect();
        assert!(messages.iter().any(|m| m.starts_with("recur arg for primitive local: i")));
        assert!(messages.iter().any(|m| m == "Auto-boxing loop arg: i"));
    }

    #[test]
    fn test_try_clause_order() {
        assert_eq!(
            error("(try 1 (finally 2) (catch Exception e 3))").message,
            "finally clause must be last in try expression"
        );
        assert_eq!(
            error("(try 1 (catch Exception e 3) 4)").message,
            "Only catch or finally clause can follow catch in try expression"
        );
        assert_eq!(
            error("(try 1 (catch NoSuchThing e 3))").message,
            "Unable to resolve classname: NoSuchThing"
        );
    }

    #[test]
    fn test_set_on_local_is_rejected() {
        let err = error("(let* [a 1] (set! a 2))");
        assert_eq!(err.kind, ErrorKind::Scope);
        assert_eq!(err.message, "Cannot assign to non-mutable: a");
        assert_eq!(error("(set! 1 2)").message, "Invalid assignment target");
    }

    #[test]
    fn test_unresolvable_var() {
        assert_eq!(error("(var nope)").message, "Unable to resolve var: nope in this context");
    }

    #[test]
    fn test_bad_binding_forms() {
        assert_eq!(error("(let* (a 1) a)").message, "Bad binding form, expected vector");
        assert_eq!(
            error("(let* [a] a)").message,
            "Bad binding form, expected matched symbol expression pairs"
        );
    }

    #[test]
    fn test_let_widens_int_locals() {
        assert_eq!(local_prim(&Expr::Long(1)), Some(Prim::Long));
        assert_eq!(local_prim(&Expr::Double(1.0)), Some(Prim::Double));
        assert_eq!(local_prim(&Expr::Nil), None);
    }
}
