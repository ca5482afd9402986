//! Host interop: `.` and `new`
//!
//! Members are resolved against the class table when the receiver's class
//! is known. Among overloads with the right arity the cheapest conversion
//! of the argument types wins. Anything left unresolved becomes a
//! reflective call, with a reflection warning, or an error in strict mode.

use kdn::{Form, Symbol};
use kir_core::{HostKind, HostRef, HostType, Prim};
use kiln_runtime::{Class, ClassTable, HostMember};

use super::{analyze, operand};
use crate::context::{CompileContext, Context};
use crate::error::{CompileError, Result, WarningKind};
use crate::expr::{Expr, FieldRef, HostExpr, HostOp, Ty};

pub(crate) fn host_ref(class: &str, member: &HostMember) -> HostRef {
    let name = match member.kind {
        HostKind::Constructor => "new",
        _ => member.name,
    };
    HostRef {
        class: class.to_string(),
        member: name.to_string(),
        kind: member.kind,
        params: member.params.clone(),
        ret: member.ret.clone(),
    }
}

pub(super) fn static_field(class: &str, member: &HostMember) -> Expr {
    Expr::Host(Box::new(HostExpr {
        op: HostOp::StaticField {
            class: class.to_string(),
            member: host_ref(class, member),
        },
        target: None,
        args: Vec::new(),
        line: 0,
    }))
}

// ========== Overload selection ==========

/// Cost of passing an argument of type `arg` to a parameter of type
/// `param`; `None` when it cannot be passed
fn param_cost(classes: &ClassTable, arg: Option<&Ty>, param: &HostType) -> Option<u32> {
    match (arg, param) {
        (None | Some(Ty::Recur), HostType::Object) => Some(0),
        (None | Some(Ty::Recur), HostType::Class(_)) => Some(1),
        (None | Some(Ty::Recur), _) => None,
        (Some(Ty::Prim(p)), HostType::Prim(q)) if p == q => Some(0),
        (Some(Ty::Prim(Prim::Int)), HostType::Prim(Prim::Long))
        | (Some(Ty::Prim(Prim::Float)), HostType::Prim(Prim::Double)) => Some(1),
        (Some(Ty::Prim(_)), HostType::Object) => Some(2),
        (Some(Ty::Prim(p)), HostType::Class(c)) if c.as_str() == p.boxed_class() => Some(2),
        (Some(Ty::Class(c)), HostType::Class(d)) if c == d => Some(0),
        (Some(Ty::Class(c)), HostType::Class(d)) if is_subclass(classes, c, d) => Some(1),
        (Some(Ty::Class(_)), HostType::Object) => Some(2),
        (Some(Ty::Class(c)), HostType::Prim(p)) if c.as_str() == p.boxed_class() => Some(3),
        _ => None,
    }
}

fn is_subclass(classes: &ClassTable, sub: &str, sup: &str) -> bool {
    match (classes.lookup(sub), classes.lookup(sup)) {
        (Some(a), Some(b)) => classes.is_subclass(a.id, b.id),
        _ => false,
    }
}

/// The overload to call statically, if exactly one is cheapest
fn select_overload(
    classes: &ClassTable,
    candidates: Vec<HostMember>,
    args: &[Expr],
    name: &str,
) -> Result<Option<HostMember>> {
    let mut candidates: Vec<HostMember> = candidates
        .into_iter()
        .filter(|m| m.arity() == args.len())
        .collect();
    if candidates.len() == 1 {
        return Ok(candidates.pop());
    }
    let types: Vec<Option<Ty>> = args.iter().map(Expr::static_type).collect();
    let mut best: Option<(u32, HostMember)> = None;
    let mut tied = false;
    for m in candidates {
        let cost = m
            .params
            .iter()
            .zip(&types)
            .map(|(p, t)| param_cost(classes, t.as_ref(), p))
            .sum::<Option<u32>>();
        let Some(cost) = cost else { continue };
        match best.as_ref().map(|(b, _)| *b) {
            Some(b) if cost > b => {}
            Some(b) if cost == b => tied = true,
            _ => {
                best = Some((cost, m));
                tied = false;
            }
        }
    }
    if tied {
        return Err(CompileError::resolution(format!(
            "More than one matching method found: {}",
            name
        )));
    }
    Ok(best.map(|(_, m)| m))
}

/// Report a member that will be looked up at run time
fn reflect(ctx: &mut CompileContext<'_>, what: String) -> Result<()> {
    if ctx.options.strict {
        return Err(CompileError::resolution(format!(
            "Unable to resolve at compile time: {}",
            what
        )));
    }
    if ctx.warn_on_reflection() {
        let message = format!(
            "Reflection warning, {}:{}:{} - {}.",
            ctx.file(),
            ctx.scope.line,
            ctx.scope.column,
            what
        );
        ctx.warn(WarningKind::Reflection, message);
    }
    Ok(())
}

// ========== . ==========

/// A class named by a symbol that is not shadowed by a local
fn class_named(ctx: &CompileContext<'_>, form: &Form) -> Option<std::sync::Arc<Class>> {
    match form {
        Form::Symbol(s) if s.ns().is_none() && ctx.lookup_local(s).is_none() => {
            ctx.rt.classes.lookup(s.name())
        }
        _ => None,
    }
}

pub(super) fn analyze_dot(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    if items.len() < 3 {
        return Err(CompileError::syntax(
            "Malformed member expression, expecting (. target member ...)",
        ));
    }
    // (. target member args*) or (. target (member args*))
    let (member, arg_forms, parenthesized): (&Symbol, &[Form], bool) = match &items[2] {
        Form::Symbol(s) => (s, &items[3..], false),
        Form::List(call) if items.len() == 3 => match call.first() {
            Some(Form::Symbol(s)) => (s, &call[1..], true),
            _ => return Err(CompileError::syntax("Malformed member expression")),
        },
        _ => return Err(CompileError::syntax("Malformed member expression")),
    };
    let name = member.name();
    let line = ctx.line();

    if let Some(class) = class_named(ctx, &items[1]) {
        return analyze_static(ctx, cx, &class, name, arg_forms, parenthesized, line);
    }

    let target = analyze(ctx, operand(cx), &items[1])?;
    let args = arg_forms
        .iter()
        .map(|f| analyze(ctx, operand(cx), f))
        .collect::<Result<Vec<_>>>()?;
    let class = target
        .static_type()
        .and_then(|t| t.class_name().map(str::to_string))
        .and_then(|c| ctx.rt.classes.lookup(&c));

    let field = name.strip_prefix('-');
    if field.is_some() || (args.is_empty() && !parenthesized) {
        let field_name = field.unwrap_or(name);
        let known = class.as_ref().and_then(|c| {
            let def = c.deftype.as_ref()?;
            let index = def.field_index(field_name)?;
            Some(FieldRef {
                ty: c.name.to_string(),
                index: index as u16,
                prim: def.fields[index].prim,
            })
        });
        let method = class
            .as_ref()
            .filter(|c| c.deftype.is_none())
            .and_then(|c| {
                ctx.rt
                    .classes
                    .find_members(c, HostKind::Method, name)
                    .into_iter()
                    .find(|m| m.arity() == 0)
            });
        if field.is_some() || known.is_some() || method.is_none() {
            if !args.is_empty() {
                return Err(CompileError::syntax(format!(
                    "Field access takes no arguments: {}",
                    name
                )));
            }
            if known.is_none() && class.as_ref().map_or(true, |c| c.deftype.is_none()) {
                reflect(ctx, format!("reference to field {} can't be resolved", field_name))?;
            }
            return Ok(Expr::Host(Box::new(HostExpr {
                op: HostOp::InstanceField {
                    name: name.to_string(),
                    field: known,
                },
                target: Some(target),
                args,
                line,
            })));
        }
    }

    let resolved = match &class {
        Some(c) if c.deftype.is_none() => {
            let candidates = ctx.rt.classes.find_members(c, HostKind::Method, name);
            if !candidates.iter().any(|m| m.arity() == args.len()) {
                return Err(CompileError::resolution(format!(
                    "No matching method {} found taking {} args for class {}",
                    name,
                    args.len(),
                    c.name
                )));
            }
            select_overload(&ctx.rt.classes, candidates, &args, name)?
                .map(|m| host_ref(&c.name, &m))
        }
        _ => None,
    };
    if resolved.is_none() {
        match &class {
            Some(c) if c.deftype.is_some() => {}
            Some(c) => reflect(
                ctx,
                format!("call to method {} on {} can't be resolved (argument types: unknown)", name, c.name),
            )?,
            None => reflect(
                ctx,
                format!("call to method {} can't be resolved (target class is unknown)", name),
            )?,
        }
    }
    Ok(Expr::Host(Box::new(HostExpr {
        op: HostOp::InstanceMethod {
            name: name.to_string(),
            member: resolved,
        },
        target: Some(target),
        args,
        line,
    })))
}

fn analyze_static(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    class: &Class,
    name: &str,
    arg_forms: &[Form],
    parenthesized: bool,
    line: u32,
) -> Result<Expr> {
    if arg_forms.is_empty() && !parenthesized {
        let fields = ctx.rt.classes.find_members(class, HostKind::StaticField, name);
        if let Some(field) = fields.first() {
            return Ok(static_field(&class.name, field));
        }
    }
    let args = arg_forms
        .iter()
        .map(|f| analyze(ctx, operand(cx), f))
        .collect::<Result<Vec<_>>>()?;
    let candidates = ctx.rt.classes.find_members(class, HostKind::StaticMethod, name);
    if !candidates.iter().any(|m| m.arity() == args.len()) {
        return Err(CompileError::resolution(format!(
            "No matching method {} found taking {} args for class {}",
            name,
            args.len(),
            class.name
        )));
    }
    let member = select_overload(&ctx.rt.classes, candidates, &args, name)?
        .map(|m| host_ref(&class.name, &m));
    if member.is_none() {
        reflect(
            ctx,
            format!("call to static method {} on {} can't be resolved (argument types: unknown)", name, class.name),
        )?;
    }
    Ok(Expr::Host(Box::new(HostExpr {
        op: HostOp::StaticMethod {
            class: class.name.to_string(),
            name: name.to_string(),
            member,
        },
        target: None,
        args,
        line,
    })))
}

// ========== new ==========

pub(super) fn analyze_new(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    let class_sym = match items.get(1) {
        Some(Form::Symbol(s)) => s,
        _ => {
            return Err(CompileError::syntax(
                "wrong number of arguments, expecting: (new Classname args...)",
            ))
        }
    };
    let class = ctx.rt.classes.lookup(class_sym.name()).ok_or_else(|| {
        CompileError::resolution(format!("Unable to resolve classname: {}", class_sym))
    })?;
    let line = ctx.line();
    let args = items[2..]
        .iter()
        .map(|f| analyze(ctx, operand(cx), f))
        .collect::<Result<Vec<_>>>()?;

    if let Some(def) = &class.deftype {
        if def.fields.len() != args.len() {
            return Err(CompileError::resolution(format!(
                "No matching ctor found for class {}",
                class.name
            )));
        }
        return Ok(new_expr(&class, None, true, args, line));
    }

    let candidates = ctx.rt.classes.find_members(&class, HostKind::Constructor, "new");
    if !candidates.iter().any(|m| m.arity() == args.len()) {
        return Err(CompileError::resolution(format!(
            "No matching ctor found for class {}",
            class.name
        )));
    }
    let member = select_overload(&ctx.rt.classes, candidates, &args, "new")?
        .map(|m| host_ref(&class.name, &m));
    if member.is_none() {
        reflect(
            ctx,
            format!("call to {} ctor can't be resolved", class.name),
        )?;
    }
    Ok(new_expr(&class, member, false, args, line))
}

fn new_expr(class: &Class, member: Option<HostRef>, deftype: bool, args: Vec<Expr>, line: u32) -> Expr {
    Expr::Host(Box::new(HostExpr {
        op: HostOp::New {
            class: class.name.to_string(),
            member,
            deftype,
        },
        target: None,
        args,
        line,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn analyze_with(rt: &Runtime, options: &CompileOptions, source: &str) -> (Result<Expr>, Vec<String>) {
        let mut ctx = CompileContext::new(rt, options);
        let form = kdn::read_str(source).unwrap();
        let form = crate::macroexpand::macroexpand(&mut ctx, &form).unwrap();
        let result = analyze(&mut ctx, Context::Expression, &form);
        let warnings = ctx.take_warnings().into_iter().map(|w| w.message).collect();
        (result, warnings)
    }

    fn host(expr: Expr) -> HostExpr {
        match expr {
            Expr::Host(h) => *h,
            other => panic!("expected host expression, got {:?}", other),
        }
    }

    #[test]
    fn test_cost_table() {
        let rt = Runtime::new();
        let c = &rt.classes;
        let long = Ty::Prim(Prim::Long);
        assert_eq!(param_cost(c, None, &HostType::Object), Some(0));
        assert_eq!(param_cost(c, None, &HostType::Prim(Prim::Long)), None);
        assert_eq!(param_cost(c, Some(&long), &HostType::Prim(Prim::Long)), Some(0));
        assert_eq!(param_cost(c, Some(&Ty::Prim(Prim::Int)), &HostType::Prim(Prim::Long)), Some(1));
        assert_eq!(param_cost(c, Some(&long), &HostType::Object), Some(2));
        assert_eq!(param_cost(c, Some(&long), &HostType::Prim(Prim::Double)), None);
        let string = Ty::Class("String".into());
        assert_eq!(param_cost(c, Some(&string), &HostType::Class("String".into())), Some(0));
        assert_eq!(param_cost(c, Some(&Ty::Class("Long".into())), &HostType::Prim(Prim::Long)), Some(3));
    }

    #[test]
    fn test_primitive_args_pick_primitive_overload() {
        let rt = Runtime::new();
        let (expr, warnings) = analyze_with(&rt, &CompileOptions::default(), "(. Numbers (add 1 2))");
        let h = host(expr.unwrap());
        let member = h.member().unwrap();
        assert_eq!(member.params, vec![HostType::Prim(Prim::Long), HostType::Prim(Prim::Long)]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_target_reflects_with_warning() {
        let rt = Runtime::new();
        let options = CompileOptions::default().warn_on_reflection(true).file("w.kiln");
        let (expr, warnings) = analyze_with(&rt, &options, "(fn* [s] (.toUpperCase s))");
        assert!(expr.is_ok());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Reflection warning, w.kiln:1:"));
        assert!(warnings[0].ends_with("reference to field toUpperCase can't be resolved."));
    }

    #[test]
    fn test_type_hint_avoids_reflection() {
        let rt = Runtime::new();
        let options = CompileOptions::default().warn_on_reflection(true);
        let (expr, warnings) = analyze_with(&rt, &options, "(fn* [^String s] (.toUpperCase s))");
        assert!(expr.is_ok());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_strict_mode_rejects_reflection() {
        let rt = Runtime::new();
        let options = CompileOptions::default().strict(true);
        let (expr, _) = analyze_with(&rt, &options, "(fn* [s] (.toUpperCase s))");
        let err = expr.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn test_static_field() {
        let rt = Runtime::new();
        let (expr, _) = analyze_with(&rt, &CompileOptions::default(), "Long/MAX_VALUE");
        assert!(matches!(host(expr.unwrap()).op, HostOp::StaticField { .. }));
        let (expr, _) = analyze_with(&rt, &CompileOptions::default(), "Long/NOPE");
        assert_eq!(expr.unwrap_err().message, "Unable to find static field: NOPE in class Long");
    }

    #[test]
    fn test_unknown_class_in_new() {
        let rt = Runtime::new();
        let (expr, _) = analyze_with(&rt, &CompileOptions::default(), "(new Nope)");
        assert_eq!(expr.unwrap_err().message, "Unable to resolve classname: Nope");
    }

    #[test]
    fn test_no_matching_static_arity() {
        let rt = Runtime::new();
        let (expr, _) = analyze_with(&rt, &CompileOptions::default(), "(Math/abs 1 2 3)");
        assert!(expr.unwrap_err().message.starts_with("No matching method abs found taking 3 args"));
    }
}
