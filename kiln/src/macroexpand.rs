//! Macro expansion
//!
//! One step expands a list whose head resolves to a macro var, or
//! rewrites interop sugar into the `.` and `new` special forms.
//! [`macroexpand`] repeats until nothing changes.

use std::sync::Arc;

use kdn::{Form, Symbol};
use kiln_runtime::{NativeKind, Value, Var};
use log::trace;

use crate::analyze::is_special;
use crate::context::CompileContext;
use crate::error::{CompileError, Result};

/// Expand `form` once; `None` when it is not a macro call
pub fn macroexpand1(ctx: &mut CompileContext<'_>, form: &Form) -> Result<Option<Form>> {
    let items = match form.as_list() {
        Some(items) if !items.is_empty() => items,
        _ => return Ok(None),
    };
    let head = match &items[0] {
        Form::Symbol(s) => s,
        _ => return Ok(None),
    };
    if (head.ns().is_none() && is_special(head.name())) || ctx.lookup_local(head).is_some() {
        return Ok(None);
    }

    if let Some(var) = macro_var(ctx, head) {
        trace!("expanding {}", head);
        let expanded = invoke_macro(ctx, &var, form, &items[1..])?;
        return Ok(Some(carry_position(expanded, form)));
    }

    let sugar = match head.ns() {
        None => member_sugar(head, &items[1..])?,
        Some(ns) if ctx.rt.find_ns(ns).is_none() && ctx.rt.classes.lookup(ns).is_some() => {
            // (Cls/m args) => (. Cls m args)
            let mut out = vec![
                Form::symbol("."),
                Form::Symbol(Symbol::new(ns)),
                Form::Symbol(Symbol::new(head.name())),
            ];
            out.extend(items[1..].iter().cloned());
            Some(Form::list(out))
        }
        Some(_) => None,
    };
    Ok(sugar.map(|f| carry_position(f, form)))
}

/// Expand until the head is no longer a macro
pub fn macroexpand(ctx: &mut CompileContext<'_>, form: &Form) -> Result<Form> {
    let mut current = form.clone();
    while let Some(next) = macroexpand1(ctx, &current)? {
        current = next;
    }
    Ok(current)
}

fn macro_var(ctx: &CompileContext<'_>, sym: &Symbol) -> Option<Arc<Var>> {
    ctx.rt.resolve_var(sym).filter(|v| v.is_macro())
}

fn invoke_macro(
    ctx: &mut CompileContext<'_>,
    var: &Var,
    form: &Form,
    args: &[Form],
) -> Result<Form> {
    let root = var
        .root()
        .ok_or_else(|| CompileError::macro_error(format!("Attempting to call unbound fn: {:?}", var)))?;
    if let Value::Native(native) = &root {
        if let NativeKind::Macro(expand) = native.kind {
            return expand(form, args).map_err(CompileError::macro_error);
        }
    }

    // &form and &env come first, then the unevaluated arguments
    let env = Value::map(
        ctx.local_names()
            .into_iter()
            .map(|name| (Value::Symbol(name), Value::Nil)),
    );
    let mut call_args = vec![Value::from_form(form), env];
    call_args.extend(args.iter().map(Value::from_form));
    let expansion = ctx
        .rt
        .invoke(&root, call_args)
        .map_err(|t| CompileError::macro_error(t.to_string()))?;
    expansion.to_form().map_err(CompileError::macro_error)
}

/// `(.m x a)`, `(.-f x)` and `(Cls. a)`
fn member_sugar(head: &Symbol, args: &[Form]) -> Result<Option<Form>> {
    let name = head.name();
    if name.len() > 1 && name.starts_with('.') && name != ".." {
        let Some((target, rest)) = args.split_first() else {
            return Err(CompileError::syntax(
                "Malformed member expression, expecting (.member target ...)",
            ));
        };
        let mut out = vec![
            Form::symbol("."),
            target.clone(),
            Form::Symbol(Symbol::new(&name[1..])),
        ];
        out.extend(rest.iter().cloned());
        return Ok(Some(Form::list(out)));
    }
    if name.len() > 1 && name.ends_with('.') {
        let mut out = vec![
            Form::symbol("new"),
            Form::Symbol(Symbol::new(&name[..name.len() - 1])),
        ];
        out.extend(args.iter().cloned());
        return Ok(Some(Form::list(out)));
    }
    Ok(None)
}

/// Give an expansion the source position of the form it replaced
fn carry_position(expanded: Form, original: &Form) -> Form {
    match (&expanded, original.meta()) {
        (Form::List(_), Some(meta)) if expanded.line().is_none() => {
            let mut carried = expanded.meta().cloned().unwrap_or_default();
            carried.line = meta.line;
            carried.column = meta.column;
            expanded.with_meta(Some(carried))
        }
        _ => expanded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn expand(source: &str) -> Form {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        macroexpand(&mut ctx, &kdn::read_str(source).unwrap()).unwrap()
    }

    #[test]
    fn test_member_sugar() {
        assert_eq!(expand("(.toUpperCase s)"), kdn::read_str("(. s toUpperCase)").unwrap());
        assert_eq!(expand("(.-x p)"), kdn::read_str("(. p -x)").unwrap());
        assert_eq!(expand("(StringBuilder. \"a\")"), kdn::read_str("(new StringBuilder \"a\")").unwrap());
    }

    #[test]
    fn test_static_member_sugar() {
        assert_eq!(expand("(Math/abs x)"), kdn::read_str("(. Math abs x)").unwrap());
    }

    #[test]
    fn test_native_macro_expands_to_fixpoint() {
        let form = expand("(when-not c (f))");
        assert!(form.is_call_to("if"));
    }

    #[test]
    fn test_expansion_keeps_position() {
        let form = expand("\n\n  (when c 1)");
        assert_eq!(form.line(), Some(3));
    }

    #[test]
    fn test_special_forms_are_not_expanded() {
        let src = kdn::read_str("(if a b c)").unwrap();
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        assert!(macroexpand1(&mut ctx, &src).unwrap().is_none());
    }

    #[test]
    fn test_local_shadows_macro() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        ctx.register_local(&Symbol::new("when"), None, None, false);
        let src = kdn::read_str("(when 1 2)").unwrap();
        assert!(macroexpand1(&mut ctx, &src).unwrap().is_none());
    }

    #[test]
    fn test_malformed_member_expression() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        let err = macroexpand1(&mut ctx, &kdn::read_str("(.foo)").unwrap()).unwrap_err();
        assert!(err.message.contains("Malformed member expression"));
    }
}
