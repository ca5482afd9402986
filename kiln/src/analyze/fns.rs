//! `fn*`, `deftype*` and `reify*`
//!
//! Both produce a unit of their own. Each method gets a fresh frame whose
//! slot 0 is the object itself; references to locals of enclosing methods
//! become captured fields. The unit is emitted as soon as its methods are
//! analyzed, since nothing later can add to its captures.

use std::collections::HashSet;
use std::sync::Arc;

use kdn::{Form, Symbol};
use kir_core::{Capture, Prim, UnitKind};
use kiln_runtime::core::next_gensym_id;
use kiln_runtime::{Protocol, Value};
use log::debug;

use super::{analyze_body, special::local_prim};
use crate::codegen;
use crate::context::{CompileContext, Context, Scope};
use crate::env::{BindingId, MethodId, ObjId, ObjKind};
use crate::error::{CompileError, Result};
use crate::expr::{DefTypeExpr, Expr, FnExpr, FnMethod, ReifyExpr};

const MAX_PRIM_PARAMS: usize = 4;

/// Class tag and primitive kind named by a `^tag`
fn type_hint(tag: Option<&Symbol>) -> Result<(Option<String>, Option<Prim>)> {
    let Some(tag) = tag else {
        return Ok((None, None));
    };
    if tag.ns().is_none() {
        match Prim::from_name(tag.name()) {
            Some(p @ (Prim::Long | Prim::Double)) => return Ok((None, Some(p))),
            Some(_) => {
                return Err(CompileError::type_error(
                    "Only long and double primitives are supported",
                ))
            }
            None => {}
        }
    }
    Ok((Some(tag.to_string()), None))
}

fn unit_name(ctx: &CompileContext<'_>, local: Option<&Symbol>) -> String {
    let prefix = match ctx.scope.method {
        Some(m) => ctx.obj(ctx.method(m).obj).name.clone(),
        None => ctx.rt.current_ns().name.to_string(),
    };
    let local = local.map(|s| s.name().replace(['.', '/'], "_"));
    format!(
        "{}${}__{}",
        prefix,
        local.as_deref().unwrap_or("fn"),
        next_gensym_id()
    )
}

// ========== fn* ==========

pub(super) fn analyze_fn(ctx: &mut CompileContext<'_>, items: &[Form]) -> Result<Expr> {
    let once = items[0].meta().is_some_and(|m| m.flag("once"));
    let mut rest = &items[1..];
    let this_name = match rest.first() {
        Some(Form::Symbol(s)) => {
            rest = &rest[1..];
            Some(s.clone())
        }
        _ => None,
    };
    let bodies: Vec<&[Form]> = match rest.first() {
        Some(Form::Vector(_)) => vec![rest],
        Some(_) => rest
            .iter()
            .map(|f| match f.as_list() {
                Some(body) if matches!(body.first(), Some(Form::Vector(_))) => Ok(body),
                _ => Err(CompileError::syntax("Parameter declaration missing")),
            })
            .collect::<Result<_>>()?,
        None => return Err(CompileError::syntax("Parameter declaration missing")),
    };

    let line = ctx.line();
    let name = unit_name(ctx, this_name.as_ref());
    let obj = ctx.new_obj(name, ObjKind::Fn, once);
    let mut methods = Vec::with_capacity(bodies.len());
    for body in bodies {
        methods.push(analyze_fn_method(ctx, obj, this_name.as_ref(), body)?);
    }
    check_arities(&methods)?;

    let unit = codegen::emit_unit(ctx, obj, UnitKind::Fn { once }, &methods)?;
    debug!("fn {} closes over {} locals", unit.name, unit.closed_over.len());

    // load each captured binding in the enclosing method
    let closes: Vec<BindingId> = ctx.obj(obj).closes.iter().copied().collect();
    let captures = closes
        .into_iter()
        .map(|b| ctx.reference_local(b, None))
        .collect();
    Ok(Expr::Fn(Box::new(FnExpr {
        unit,
        captures,
        line,
    })))
}

/// A fresh method frame nested in the current one
fn method_scope(ctx: &mut CompileContext<'_>, frame: MethodId) -> Scope {
    let root = match ctx.scope.clear_path {
        Some(path) => path,
        None => ctx.paths.path(None),
    };
    Scope {
        method: Some(frame),
        next_slot: 1,
        clear_path: Some(root),
        clear_root: Some(root),
        loop_locals: None,
        no_recur: false,
        in_catch_finally: false,
        method_return: true,
        env_floor: ctx.scope.env_floor,
        line: ctx.scope.line,
        column: ctx.scope.column,
    }
}

fn analyze_fn_method(
    ctx: &mut CompileContext<'_>,
    obj: ObjId,
    this_name: Option<&Symbol>,
    form: &[Form],
) -> Result<FnMethod> {
    let params = match &form[0] {
        Form::Vector(v) => v,
        _ => return Err(CompileError::syntax("Parameter declaration missing")),
    };
    let (_, ret) = type_hint(form[0].meta().and_then(|m| m.tag()))?;
    let line = ctx.line();
    let parent = ctx.scope.method;
    let frame = ctx.new_method(obj, parent);
    let method = method_scope(ctx, frame);

    let mut scope = ctx.enter();
    scope.scope = method;
    if let Some(name) = this_name {
        scope.register_this(name, None);
    }

    let mut fixed = Vec::with_capacity(params.len());
    let mut rest = None;
    let mut variadic = false;
    for param in params.iter() {
        let sym = match param {
            Form::Symbol(s) => s,
            _ => return Err(CompileError::syntax("fn params must be Symbols")),
        };
        if sym.ns().is_none() && sym.name() == "&" {
            if variadic {
                return Err(CompileError::syntax("Invalid parameter list"));
            }
            variadic = true;
            continue;
        }
        if sym.ns().is_some() {
            return Err(CompileError::syntax(format!(
                "Can't use qualified name as parameter: {}",
                sym
            )));
        }
        let (tag, prim) = type_hint(sym.tag())?;
        if variadic {
            if rest.is_some() {
                return Err(CompileError::syntax("Invalid parameter list"));
            }
            if prim.is_some() {
                return Err(CompileError::type_error("fns taking primitives cannot be variadic"));
            }
            rest = Some(scope.register_local(sym, tag, None, true));
        } else {
            fixed.push(scope.register_local(sym, tag, prim, true));
        }
    }
    if variadic && rest.is_none() {
        return Err(CompileError::syntax("Invalid parameter list"));
    }

    let takes_prims = ret.is_some() || fixed.iter().any(|b| scope.binding(*b).prim.is_some());
    if takes_prims {
        if rest.is_some() {
            return Err(CompileError::type_error("fns taking primitives cannot be variadic"));
        }
        if fixed.len() > MAX_PRIM_PARAMS {
            return Err(CompileError::type_error(
                "fns taking primitives support only 4 or fewer args",
            ));
        }
    }

    let mut loop_locals = fixed.clone();
    loop_locals.extend(rest);
    scope.scope.loop_locals = Some(loop_locals);
    let body = analyze_body(&mut scope, Context::Return, &form[1..])?;

    if let (Some(expected), Some(had)) = (ret, local_prim(&body)) {
        if expected != had {
            return Err(CompileError::type_error(format!(
                "Mismatched primitive return, expected: {}, had: {}",
                expected.name(),
                had.name()
            )));
        }
    }

    Ok(FnMethod {
        frame,
        name: "invoke".to_string(),
        params: fixed,
        rest,
        ret,
        body,
        line,
    })
}

fn check_arities(methods: &[FnMethod]) -> Result<()> {
    let mut fixed = HashSet::new();
    let mut variadic: Option<&FnMethod> = None;
    for m in methods {
        if m.rest.is_some() {
            if variadic.is_some() {
                return Err(CompileError::syntax("Can't have more than 1 variadic overload"));
            }
            variadic = Some(m);
        } else if !fixed.insert(m.params.len()) {
            return Err(CompileError::syntax("Can't have 2 overloads with same arity"));
        }
    }
    if let Some(v) = variadic {
        if fixed.iter().any(|n| *n > v.params.len()) {
            return Err(CompileError::syntax(
                "Can't have fixed arity function with more params than variadic function",
            ));
        }
    }
    Ok(())
}

// ========== deftype* ==========

struct FieldDecl<'f> {
    sym: &'f Symbol,
    tag: Option<String>,
    capture: Capture,
}

pub(super) fn analyze_deftype(ctx: &mut CompileContext<'_>, items: &[Form]) -> Result<Expr> {
    let name = match items.get(1) {
        Some(Form::Symbol(s)) if s.ns().is_none() => s.name().to_string(),
        _ => return Err(CompileError::syntax("deftype* expects an unqualified type name")),
    };
    let field_forms = match items.get(2) {
        Some(Form::Vector(v)) => v,
        _ => return Err(CompileError::syntax("deftype* expects a field vector")),
    };

    let mut fields = Vec::with_capacity(field_forms.len());
    for f in field_forms.iter() {
        let sym = match f {
            Form::Symbol(s) if s.ns().is_none() => s,
            other => {
                return Err(CompileError::syntax(format!(
                    "Bad field declaration, expected symbol, got: {}",
                    other
                )))
            }
        };
        let (tag, prim) = type_hint(sym.tag())?;
        let mutable = sym
            .meta()
            .is_some_and(|m| m.flag("unsynchronized-mutable") || m.flag("volatile-mutable"));
        fields.push(FieldDecl {
            sym,
            tag,
            capture: Capture {
                name: sym.name().to_string(),
                prim,
                mutable,
            },
        });
    }

    let mut protocols: Vec<(Symbol, Arc<Protocol>)> = Vec::new();
    let mut impls: Vec<&[Form]> = Vec::new();
    for f in &items[3..] {
        match f {
            Form::Symbol(p) => protocols.push(resolve_protocol(ctx, p)?),
            Form::List(body) if matches!(body.first(), Some(Form::Symbol(_))) => impls.push(body),
            other => {
                return Err(CompileError::syntax(format!(
                    "Malformed deftype* method: {}",
                    other
                )))
            }
        }
    }
    check_methods(&protocols, &impls)?;

    ctx.rt
        .declare_type(&name, fields.iter().map(|f| f.capture.clone()).collect());
    let obj = ctx.new_obj(name.clone(), ObjKind::Type, false);

    let methods = {
        let mut scope = ctx.enter();
        let floor = scope.env_depth();
        let field_frame = scope.new_method(obj, None);
        scope.scope = Scope {
            method: Some(field_frame),
            next_slot: 1,
            env_floor: floor,
            line: scope.scope.line,
            column: scope.scope.column,
            ..Scope::default()
        };
        for field in &fields {
            let id = scope.register_local(field.sym, field.tag.clone(), field.capture.prim, false);
            let binding = scope.binding_mut(id);
            binding.can_be_cleared = false;
            binding.mutable = field.capture.mutable;
            scope.obj_mut(obj).closes.insert(id);
        }
        let mut methods = Vec::with_capacity(impls.len());
        for body in &impls {
            methods.push(analyze_type_method(
                &mut scope,
                obj,
                Some(field_frame),
                Some(&name),
                body,
            )?);
        }
        methods
    };

    let kind = UnitKind::Type {
        name: name.clone(),
        protocols: protocols.into_iter().map(|(sym, _)| sym).collect(),
    };
    let unit = codegen::emit_unit(ctx, obj, kind, &methods)?;
    ctx.rt
        .load(unit.clone())
        .map_err(|e| CompileError::resolution(e.to_string()))?;
    debug!("deftype {} with {} methods", name, methods.len());
    Ok(Expr::DefType(Box::new(DefTypeExpr { name, unit })))
}

fn resolve_protocol(ctx: &CompileContext<'_>, p: &Symbol) -> Result<(Symbol, Arc<Protocol>)> {
    let var = ctx
        .rt
        .resolve_var(p)
        .ok_or_else(|| CompileError::resolution(format!("Unable to resolve protocol: {}", p)))?;
    match var.root() {
        Some(Value::Protocol(proto)) => Ok((var.symbol(), proto)),
        _ => Err(CompileError::resolution(format!("{} is not a protocol", p))),
    }
}

fn check_methods(protocols: &[(Symbol, Arc<Protocol>)], impls: &[&[Form]]) -> Result<()> {
    for body in impls {
        let method = body[0].as_symbol().map(Symbol::name).unwrap_or_default();
        if !protocols.iter().any(|(_, p)| p.has_method(method)) {
            return Err(CompileError::syntax(format!(
                "Can't define method not in interfaces: {}",
                method
            )));
        }
    }
    Ok(())
}

/// `(name [this args*] body*)`
fn analyze_type_method(
    ctx: &mut CompileContext<'_>,
    obj: ObjId,
    parent: Option<MethodId>,
    this_tag: Option<&str>,
    form: &[Form],
) -> Result<FnMethod> {
    let name = form[0].as_symbol().map(|s| s.name().to_string()).unwrap_or_default();
    let params = match form.get(1) {
        Some(Form::Vector(v)) if !v.is_empty() => v,
        _ => {
            return Err(CompileError::syntax(format!(
                "Method {} must take at least one argument for the target object",
                name
            )))
        }
    };
    let line = ctx.line();
    let frame = ctx.new_method(obj, parent);
    let method = method_scope(ctx, frame);
    let mut scope = ctx.enter();
    scope.scope = method;

    let mut args = Vec::with_capacity(params.len() - 1);
    for (i, param) in params.iter().enumerate() {
        let sym = match param {
            Form::Symbol(s) if s.ns().is_none() && s.name() != "&" => s,
            _ => {
                return Err(CompileError::syntax(format!(
                    "Invalid parameter list for method {}",
                    name
                )))
            }
        };
        if i == 0 {
            scope.register_this(sym, this_tag.map(str::to_string));
        } else {
            let tag = sym.tag().map(|t| t.to_string());
            args.push(scope.register_local(sym, tag, None, true));
        }
    }
    scope.scope.loop_locals = Some(args.clone());
    let body = analyze_body(&mut scope, Context::Return, &form[2..])?;
    Ok(FnMethod {
        frame,
        name,
        params: args,
        rest: None,
        ret: None,
        body,
        line,
    })
}

// ========== reify* ==========

/// `(reify* [Protocol*] (name [this args*] body*)*)`: an instance of a fresh
/// anonymous type whose fields are the locals its methods close over
pub(super) fn analyze_reify(ctx: &mut CompileContext<'_>, items: &[Form]) -> Result<Expr> {
    let proto_forms = match items.get(1) {
        Some(Form::Vector(v)) => v,
        _ => return Err(CompileError::syntax("reify* expects a vector of protocols")),
    };
    let mut protocols = Vec::with_capacity(proto_forms.len());
    for f in proto_forms.iter() {
        match f {
            Form::Symbol(p) => protocols.push(resolve_protocol(ctx, p)?),
            other => {
                return Err(CompileError::syntax(format!(
                    "Bad protocol in reify*, expected symbol, got: {}",
                    other
                )))
            }
        }
    }
    let mut impls: Vec<&[Form]> = Vec::with_capacity(items.len().saturating_sub(2));
    for f in items.iter().skip(2) {
        match f {
            Form::List(body) if matches!(body.first(), Some(Form::Symbol(_))) => impls.push(body),
            other => {
                return Err(CompileError::syntax(format!(
                    "Malformed reify* method: {}",
                    other
                )))
            }
        }
    }
    check_methods(&protocols, &impls)?;

    let line = ctx.line();
    let name = unit_name(ctx, Some(&Symbol::new("reify")));
    let obj = ctx.new_obj(name.clone(), ObjKind::Reify, false);
    let parent = ctx.scope.method;
    let mut methods = Vec::with_capacity(impls.len());
    for body in &impls {
        methods.push(analyze_type_method(ctx, obj, parent, None, body)?);
    }

    let kind = UnitKind::Type {
        name: name.clone(),
        protocols: protocols.into_iter().map(|(sym, _)| sym).collect(),
    };
    let unit = codegen::emit_unit(ctx, obj, kind, &methods)?;
    ctx.rt.declare_reified(&name, unit.closed_over.clone());
    ctx.rt
        .load(unit.clone())
        .map_err(|e| CompileError::resolution(e.to_string()))?;
    debug!("reify {} closes over {} locals", name, unit.closed_over.len());

    let closes: Vec<BindingId> = ctx.obj(obj).closes.iter().copied().collect();
    let captures = closes
        .into_iter()
        .map(|b| ctx.reference_local(b, None))
        .collect();
    Ok(Expr::Reify(Box::new(ReifyExpr {
        name,
        unit,
        captures,
        line,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{analyze, wrap_in_once_fn};
    use crate::error::ErrorKind;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn analyze_top(rt: &Runtime, source: &str) -> Result<Expr> {
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(rt, &options);
        let form = kdn::read_str(source).map_err(|e| CompileError::read(&e))?;
        analyze(&mut ctx, Context::Expression, &wrap_in_once_fn(&form))
    }

    fn error(source: &str) -> CompileError {
        analyze_top(&Runtime::new(), source).unwrap_err()
    }

    #[test]
    fn test_type_hints() {
        assert_eq!(type_hint(None).unwrap(), (None, None));
        assert_eq!(type_hint(Some(&Symbol::new("long"))).unwrap(), (None, Some(Prim::Long)));
        assert_eq!(
            type_hint(Some(&Symbol::new("String"))).unwrap(),
            (Some("String".to_string()), None)
        );
        let err = type_hint(Some(&Symbol::new("int"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Only long and double primitives are supported");
    }

    #[test]
    fn test_overload_errors() {
        assert_eq!(
            error("(fn* ([a] a) ([b] b))").message,
            "Can't have 2 overloads with same arity"
        );
        assert_eq!(
            error("(fn* ([& a] a) ([b & c] b))").message,
            "Can't have more than 1 variadic overload"
        );
        assert_eq!(
            error("(fn* ([a b c] a) ([x & y] x))").message,
            "Can't have fixed arity function with more params than variadic function"
        );
    }

    #[test]
    fn test_primitive_signature_limits() {
        assert_eq!(
            error("(fn* [^long a b c d e] a)").message,
            "fns taking primitives support only 4 or fewer args"
        );
        assert_eq!(
            error("(fn* [a & ^long b] a)").message,
            "fns taking primitives cannot be variadic"
        );
        let err = error("(fn* ^long [^double x] x)");
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Mismatched primitive return, expected: long, had: double");
    }

    #[test]
    fn test_missing_params() {
        assert_eq!(error("(fn* 1)").message, "Parameter declaration missing");
        assert_eq!(error("(fn* [a &] a)").message, "Invalid parameter list");
    }

    #[test]
    fn test_closure_captures_enclosing_local() {
        let rt = Runtime::new();
        let expr = analyze_top(&rt, "(let* [x 1 y 2] (fn* [] x))").unwrap();
        let Expr::Invoke(call) = expr else { panic!("expected invoke") };
        let Expr::Fn(thunk) = &call.f else { panic!("expected thunk") };
        let closure = &thunk.unit.children[0];
        assert_eq!(closure.closed_over.len(), 1);
        assert_eq!(closure.closed_over[0].name, "x");
        assert_eq!(closure.closed_over[0].prim, Some(Prim::Long));
    }

    #[test]
    fn test_named_fn_does_not_capture_itself() {
        let rt = Runtime::new();
        let expr = analyze_top(&rt, "(fn* self [n] (self n))").unwrap();
        let Expr::Invoke(call) = expr else { panic!("expected invoke") };
        let Expr::Fn(thunk) = &call.f else { panic!("expected thunk") };
        assert!(thunk.unit.children[0].closed_over.is_empty());
    }

    #[test]
    fn test_deftype_method_must_belong_to_protocol() {
        let err = error("(deftype* Sq [side] (perimeter [this] side))");
        assert_eq!(err.message, "Can't define method not in interfaces: perimeter");
    }

    #[test]
    fn test_reify_captures_enclosing_local() {
        let rt = Runtime::new();
        let shape = Protocol::new(Symbol::qualified("user", "Shape"), vec![Arc::from("area")]);
        rt.intern("user", "Shape")
            .bind_root(Value::Protocol(Arc::new(shape)));
        let source = "(let* [x 1 y :unused] (reify* [Shape] (area [this] x)))";
        let expr = analyze_top(&rt, source).unwrap();
        let Expr::Invoke(call) = expr else { panic!("expected invoke") };
        let Expr::Fn(thunk) = &call.f else { panic!("expected thunk") };
        let reified = &thunk.unit.children[0];
        assert_eq!(reified.closed_over.len(), 1);
        assert_eq!(reified.closed_over[0].name, "x");
        let class = rt.classes.lookup(&reified.name).unwrap();
        assert!(class.deftype.as_ref().unwrap().reified);
    }

    #[test]
    fn test_reify_rejects_unknown_protocol() {
        let err = error("(reify* [Nope] (area [this] 1))");
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(err.message, "Unable to resolve protocol: Nope");
    }

    #[test]
    fn test_deftype_declares_class() {
        let rt = Runtime::new();
        analyze_top(&rt, "(deftype* Pair [^long a b])").unwrap();
        let class = rt.classes.lookup("Pair").unwrap();
        let def = class.deftype.as_ref().unwrap();
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.fields[0].prim, Some(Prim::Long));
    }
}
