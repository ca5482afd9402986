//! Form analysis
//!
//! Turns read forms into the [`Expr`] tree. Analysis macroexpands, then
//! dispatches on the head of a list: special forms go to their parsers
//! in the submodules, everything else is an invocation. Symbols resolve
//! to locals, static fields, vars and classes, in that order.
//!
//! Errors raised while analyzing a list pick up that list's source
//! position on the way out, unless a deeper form already supplied one.

mod case;
mod fns;
mod interop;
mod special;

use std::sync::Arc;

use kdn::{Form, Meta, Symbol};
use kir_core::HostKind;
use kiln_runtime::{Value, Var};

use crate::context::{CompileContext, Context};
use crate::error::{CompileError, Result};
use crate::expr::{
    Expr, InstanceOfExpr, InvokeExpr, KeywordInvokeExpr, ProtocolInvokeExpr, VarRef,
};
use crate::macroexpand::macroexpand1;

/// Names handled by the analyzer rather than by functions or macros
const SPECIAL_FORMS: &[&str] = &[
    "def", "if", "do", "let*", "loop*", "recur", "fn*", "quote", "var", "set!", "try", "catch",
    "finally", "throw", "case*", ".", "new", "letfn*", "deftype*", "reify*", "&",
];

pub fn is_special(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

/// Analyze one form in the given context
pub fn analyze(ctx: &mut CompileContext<'_>, cx: Context, form: &Form) -> Result<Expr> {
    match form {
        Form::Nil => Ok(Expr::Nil),
        Form::Bool(b) => Ok(Expr::Bool(*b)),
        Form::Long(n) => Ok(Expr::Long(*n)),
        Form::Double(d) => Ok(Expr::Double(*d)),
        Form::Char(_) | Form::Str(_) | Form::Keyword(_) => Ok(Expr::Const(form.clone())),
        Form::Symbol(sym) => analyze_symbol(ctx, sym),
        Form::List(items) if items.is_empty() => Ok(Expr::Const(form.clone())),
        Form::List(_) => analyze_seq(ctx, cx, form),
        Form::Vector(items) => analyze_vector(ctx, cx, form, items),
        Form::Map(pairs) => analyze_map(ctx, cx, form, pairs),
        Form::Set(items) => analyze_set(ctx, cx, form, items),
    }
}

/// Context for subexpressions whose value is consumed
pub(crate) fn operand(cx: Context) -> Context {
    if cx == Context::Eval {
        Context::Eval
    } else {
        Context::Expression
    }
}

fn analyze_seq(ctx: &mut CompileContext<'_>, cx: Context, form: &Form) -> Result<Expr> {
    let mut ctx = ctx.enter();
    ctx.set_position(form);
    let (line, column) = (ctx.scope.line, ctx.scope.column);
    let file = ctx.options.file.clone();
    analyze_seq_at(&mut ctx, cx, form).map_err(|e| e.locate(file.as_deref(), line, column))
}

fn analyze_seq_at(ctx: &mut CompileContext<'_>, cx: Context, form: &Form) -> Result<Expr> {
    if let Some(expanded) = macroexpand1(ctx, form)? {
        return analyze(ctx, cx, &expanded);
    }
    let items = form.as_list().unwrap_or_default();
    let special = match items.first() {
        Some(Form::Symbol(s)) if s.ns().is_none() && is_special(s.name()) => Some(s.name()),
        _ => None,
    };
    match special {
        Some("def") => special::analyze_def(ctx, cx, items),
        Some("if") => special::analyze_if(ctx, cx, items),
        Some("do") => analyze_body(ctx, cx, &items[1..]),
        Some("let*") => special::analyze_let(ctx, cx, form, items, false),
        Some("loop*") => special::analyze_let(ctx, cx, form, items, true),
        Some("recur") => special::analyze_recur(ctx, cx, items),
        Some("fn*") => fns::analyze_fn(ctx, items),
        Some("quote") => special::analyze_quote(items),
        Some("var") => special::analyze_the_var(ctx, items),
        Some("set!") => special::analyze_assign(ctx, cx, items),
        Some("try") => special::analyze_try(ctx, cx, form, items),
        Some("throw") => special::analyze_throw(ctx, cx, form, items),
        Some("case*") => case::analyze_case(ctx, cx, form, items),
        Some(".") => interop::analyze_dot(ctx, cx, items),
        Some("new") => interop::analyze_new(ctx, cx, items),
        Some("letfn*") => special::analyze_letfn(ctx, cx, form, items),
        Some("deftype*") => fns::analyze_deftype(ctx, items),
        Some("reify*") => fns::analyze_reify(ctx, items),
        Some(name) => Err(CompileError::resolution(format!(
            "Unable to resolve symbol: {} in this context",
            name
        ))),
        None => analyze_invoke(ctx, cx, items),
    }
}

/// Forms evaluated in order; all but the last as statements
pub(crate) fn analyze_body(ctx: &mut CompileContext<'_>, cx: Context, forms: &[Form]) -> Result<Expr> {
    let Some((last, init)) = forms.split_last() else {
        return Ok(Expr::Nil);
    };
    let statement = if cx == Context::Eval {
        Context::Eval
    } else {
        Context::Statement
    };
    let mut exprs = Vec::with_capacity(forms.len());
    for form in init {
        exprs.push(analyze(ctx, statement, form)?);
    }
    exprs.push(analyze(ctx, cx, last)?);
    if exprs.len() == 1 {
        return Ok(exprs.remove(0));
    }
    Ok(Expr::Do(exprs))
}

/// `((^:once fn* [] form))`, for forms that need a method of their own
pub(crate) fn wrap_in_once_fn(form: &Form) -> Form {
    let mut once = Meta::new();
    once.insert(Form::keyword("once"), Form::Bool(true));
    let fn_sym = Form::Symbol(Symbol::new("fn*").with_meta(once));
    let position = form.line().map(|line| Meta::at(line, form.column().unwrap_or(0)));
    let thunk = Form::list(vec![fn_sym, Form::vector(vec![]), form.clone()]).with_meta(position.clone());
    Form::list(vec![thunk]).with_meta(position)
}

// ========== Symbols ==========

fn tag_name(sym: &Symbol) -> Option<String> {
    sym.tag().map(|t| t.to_string())
}

pub(crate) fn var_ref(var: Arc<Var>, tag: Option<String>) -> VarRef {
    let tag = tag.or_else(|| match var.meta_get("tag") {
        Some(Value::Symbol(s)) => Some(s.to_string()),
        Some(Value::Str(s)) => Some(s.to_string()),
        _ => None,
    });
    VarRef {
        sym: var.symbol(),
        var,
        tag,
    }
}

fn analyze_symbol(ctx: &mut CompileContext<'_>, sym: &Symbol) -> Result<Expr> {
    let tag = tag_name(sym);
    if let Some(binding) = ctx.lookup_local(sym) {
        return Ok(Expr::Local(ctx.reference_local(binding, tag)));
    }

    if let Some(ns) = sym.ns() {
        if ctx.rt.find_ns(ns).is_none() {
            if let Some(class) = ctx.rt.classes.lookup(ns) {
                let fields = ctx.rt.classes.find_members(&class, HostKind::StaticField, sym.name());
                return match fields.first() {
                    Some(member) => Ok(interop::static_field(&class.name, member)),
                    None => Err(CompileError::resolution(format!(
                        "Unable to find static field: {} in class {}",
                        sym.name(),
                        ns
                    ))),
                };
            }
        }
    }

    if let Some(var) = ctx.rt.resolve_var(sym) {
        if var.is_macro() {
            return Err(CompileError::syntax(format!(
                "Can't take value of a macro: #'{}",
                var.symbol()
            )));
        }
        return Ok(Expr::Var(var_ref(var, tag)));
    }

    if sym.ns().is_none() && ctx.rt.classes.lookup(sym.name()).is_some() {
        return Ok(Expr::Class(sym.name().to_string()));
    }

    Err(CompileError::resolution(format!(
        "Unable to resolve symbol: {} in this context",
        sym
    )))
}

// ========== Collections ==========

fn analyze_items(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Vec<Expr>> {
    items.iter().map(|f| analyze(ctx, operand(cx), f)).collect()
}

fn analyze_vector(ctx: &mut CompileContext<'_>, cx: Context, form: &Form, items: &[Form]) -> Result<Expr> {
    let exprs = analyze_items(ctx, cx, items)?;
    if exprs.iter().all(Expr::is_literal) {
        return Ok(Expr::Const(form.with_meta(None)));
    }
    Ok(Expr::Vector(exprs))
}

fn analyze_set(ctx: &mut CompileContext<'_>, cx: Context, form: &Form, items: &[Form]) -> Result<Expr> {
    check_duplicate_keys(items.iter())?;
    let exprs = analyze_items(ctx, cx, items)?;
    if exprs.iter().all(Expr::is_literal) {
        return Ok(Expr::Const(form.with_meta(None)));
    }
    Ok(Expr::Set(exprs))
}

fn analyze_map(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    pairs: &[(Form, Form)],
) -> Result<Expr> {
    check_duplicate_keys(pairs.iter().map(|(k, _)| k))?;
    let mut exprs = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        let key = analyze(ctx, operand(cx), k)?;
        let val = analyze(ctx, operand(cx), v)?;
        exprs.push((key, val));
    }
    if exprs.iter().all(|(k, v)| k.is_literal() && v.is_literal()) {
        return Ok(Expr::Const(form.with_meta(None)));
    }
    Ok(Expr::Map(exprs))
}

/// Constant keys may not repeat; computed keys are checked at run time
fn check_duplicate_keys<'a>(keys: impl Iterator<Item = &'a Form>) -> Result<()> {
    let mut seen: Vec<&Form> = Vec::new();
    for key in keys {
        if !is_constant_form(key) {
            continue;
        }
        if seen.contains(&key) {
            return Err(CompileError::syntax(format!("Duplicate key: {}", key)));
        }
        seen.push(key);
    }
    Ok(())
}

fn is_constant_form(form: &Form) -> bool {
    match form {
        Form::Symbol(_) => false,
        Form::List(items) => items.is_empty(),
        Form::Vector(items) | Form::Set(items) => items.iter().all(is_constant_form),
        Form::Map(pairs) => pairs
            .iter()
            .all(|(k, v)| is_constant_form(k) && is_constant_form(v)),
        _ => true,
    }
}

// ========== Invocation ==========

fn analyze_invoke(ctx: &mut CompileContext<'_>, cx: Context, items: &[Form]) -> Result<Expr> {
    let (head, args) = match items.split_first() {
        Some(split) => split,
        None => return Err(CompileError::syntax("Can't call nil")),
    };
    let line = ctx.line();

    if let Form::Symbol(sym) = head {
        if ctx.lookup_local(sym).is_none() {
            if let Some(var) = ctx.rt.resolve_var(sym).filter(|v| !v.is_macro()) {
                if let Some(inline) = var.inline().filter(|i| i.applies(args.len())) {
                    // (. Class (method args...))
                    let mut call = vec![Form::symbol(inline.method)];
                    call.extend(args.iter().cloned());
                    let dot = Form::list(vec![
                        Form::symbol("."),
                        Form::symbol(inline.class),
                        Form::list(call),
                    ]);
                    return analyze(ctx, cx, &dot);
                }
                if var.meta_get("protocol").is_some() && !args.is_empty() {
                    let args = analyze_items(ctx, cx, args)?;
                    return Ok(Expr::ProtocolInvoke(Box::new(ProtocolInvokeExpr {
                        var: var_ref(var, None),
                        args,
                        line,
                    })));
                }
            }
            if sym.ns().is_none() && sym.name() == "instance?" && args.len() == 2 {
                if let Form::Symbol(class) = &args[0] {
                    let is_class = ctx.lookup_local(class).is_none()
                        && class.ns().is_none()
                        && ctx.rt.classes.lookup(class.name()).is_some();
                    if is_class {
                        let expr = analyze(ctx, operand(cx), &args[1])?;
                        return Ok(Expr::InstanceOf(Box::new(InstanceOfExpr {
                            class: class.name().to_string(),
                            expr,
                        })));
                    }
                }
            }
        }
    }

    if let (Form::Keyword(keyword), [target]) = (head, args) {
        let target = analyze(ctx, operand(cx), target)?;
        return Ok(Expr::KeywordInvoke(Box::new(KeywordInvokeExpr {
            keyword: keyword.clone(),
            target,
            line,
        })));
    }

    let f = analyze(ctx, operand(cx), head)?;
    let args = analyze_items(ctx, cx, args)?;
    Ok(Expr::Invoke(Box::new(InvokeExpr {
        f,
        args,
        line,
        tail: cx == Context::Return && ctx.scope.method_return,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn analyze_str(rt: &Runtime, source: &str) -> Result<Expr> {
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(rt, &options);
        let form = kdn::read_str(source).map_err(|e| CompileError::read(&e))?;
        analyze(&mut ctx, Context::Expression, &form)
    }

    #[test]
    fn test_special_form_names() {
        assert!(is_special("fn*"));
        assert!(is_special("case*"));
        assert!(!is_special("fn"));
        assert!(!is_special("when"));
    }

    #[test]
    fn test_literals() {
        let rt = Runtime::new();
        assert!(matches!(analyze_str(&rt, "42").unwrap(), Expr::Long(42)));
        assert!(matches!(analyze_str(&rt, "nil").unwrap(), Expr::Nil));
        assert!(matches!(analyze_str(&rt, ":k").unwrap(), Expr::Const(Form::Keyword(_))));
        assert!(matches!(analyze_str(&rt, "()").unwrap(), Expr::Const(_)));
    }

    #[test]
    fn test_constant_collections_fold() {
        let rt = Runtime::new();
        assert!(matches!(analyze_str(&rt, "[1 [2 3] {:a 1}]").unwrap(), Expr::Const(_)));
        assert!(matches!(analyze_str(&rt, "[1 (inc 2)]").unwrap(), Expr::Vector(_)));
    }

    #[test]
    fn test_duplicate_map_key() {
        let rt = Runtime::new();
        let err = analyze_str(&rt, "{:a 1 :a 2}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Read);

        // maps built by macros never pass through the reader
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        let form = Form::map(vec![
            (Form::keyword("a"), Form::Long(1)),
            (Form::keyword("a"), Form::Long(2)),
        ]);
        let err = analyze(&mut ctx, Context::Expression, &form).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.starts_with("Duplicate key: :a"));
    }

    #[test]
    fn test_unresolved_symbol() {
        let rt = Runtime::new();
        let err = analyze_str(&rt, "nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(err.message, "Unable to resolve symbol: nope in this context");
    }

    #[test]
    fn test_macro_in_value_position() {
        let rt = Runtime::new();
        let err = analyze_str(&rt, "when").unwrap_err();
        assert!(err.message.starts_with("Can't take value of a macro: #'kiln.core/when"));
    }

    #[test]
    fn test_keyword_invoke() {
        let rt = Runtime::new();
        assert!(matches!(analyze_str(&rt, "(:a {:a 1})").unwrap(), Expr::KeywordInvoke(_)));
    }

    #[test]
    fn test_instance_check_is_intrinsic() {
        let rt = Runtime::new();
        let expr = analyze_str(&rt, "(instance? String \"s\")").unwrap();
        assert!(matches!(expr, Expr::InstanceOf(_)));
    }

    #[test]
    fn test_class_symbol() {
        let rt = Runtime::new();
        assert!(matches!(analyze_str(&rt, "String").unwrap(), Expr::Class(name) if name == "String"));
    }

    #[test]
    fn test_error_carries_form_position() {
        let rt = Runtime::new();
        let err = analyze_str(&rt, "\n  (if)").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_wrap_in_once_fn() {
        let wrapped = wrap_in_once_fn(&kdn::read_str("(let* [a 1] a)").unwrap());
        let call = wrapped.as_list().unwrap();
        assert_eq!(call.len(), 1);
        let thunk = call[0].as_list().unwrap();
        assert!(thunk[0].as_symbol().unwrap().meta().unwrap().flag("once"));
    }
}
