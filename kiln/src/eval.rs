//! Direct evaluation of analyzed top-level forms
//!
//! Forms analyzed in `Eval` context never need a method frame: binding
//! forms, loops and exception handling were wrapped in a thunk during
//! analysis, so what reaches here is literals, var access, definitions,
//! calls and fns without captures.

use std::sync::Arc;

use kiln_runtime::{Runtime, TypeRef, Value};
use log::trace;

use crate::error::{CompileError, Result};
use crate::expr::{AssignTarget, Expr, HostExpr, HostOp};

fn thrown(t: kiln_runtime::Thrown) -> CompileError {
    CompileError::eval(t)
}

fn type_value(rt: &Runtime, name: &str) -> Result<Value> {
    let class = rt
        .classes
        .lookup(name)
        .ok_or_else(|| CompileError::resolution(format!("Unable to resolve classname: {}", name)))?;
    Ok(Value::Type(TypeRef {
        id: class.id,
        name: class.name.clone(),
    }))
}

fn eval_all(rt: &Runtime, exprs: &[Expr]) -> Result<Vec<Value>> {
    exprs.iter().map(|e| eval(rt, e)).collect()
}

pub fn eval(rt: &Runtime, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Nil => Ok(Value::Nil),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Long(n) => Ok(Value::Long(*n)),
        Expr::Double(d) => Ok(Value::Double(*d)),
        Expr::Const(form) => Ok(Value::from_form(form)),
        Expr::Class(name) => type_value(rt, name),
        Expr::Vector(items) => Ok(Value::vector(eval_all(rt, items)?)),
        Expr::Map(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((eval(rt, k)?, eval(rt, v)?));
            }
            Ok(Value::map(out))
        }
        Expr::Set(items) => Ok(Value::Set(Arc::new(eval_all(rt, items)?.into_iter().collect()))),
        Expr::Var(v) => v.var.get().map_err(thrown),
        Expr::TheVar(v) => Ok(Value::Var(v.var.clone())),
        Expr::Def(e) => {
            if let Some(meta) = &e.meta {
                e.var.var.set_meta(&Value::from_form(meta));
            }
            if let Some(init) = &e.init {
                let value = eval(rt, init)?;
                e.var.var.bind_root(value);
            }
            trace!("defined {}", e.var.sym);
            Ok(Value::Var(e.var.var.clone()))
        }
        Expr::Assign(e) => match &e.target {
            AssignTarget::Var(v) => {
                let value = eval(rt, &e.value)?;
                v.var.set(value).map_err(thrown)
            }
            AssignTarget::Field(_) => Err(CompileError::scope("Can't eval assignment to a field")),
        },
        Expr::If(e) => {
            if eval(rt, &e.test)?.is_truthy() {
                eval(rt, &e.then)
            } else {
                eval(rt, &e.otherwise)
            }
        }
        Expr::Do(body) => {
            let mut last = Value::Nil;
            for e in body {
                last = eval(rt, e)?;
            }
            Ok(last)
        }
        Expr::Fn(e) if e.captures.is_empty() => {
            let loaded = rt
                .load(e.unit.clone())
                .map_err(|err| CompileError::resolution(err.to_string()))?;
            Ok(rt.instantiate(&loaded))
        }
        Expr::Invoke(e) => {
            let f = eval(rt, &e.f)?;
            let args = eval_all(rt, &e.args)?;
            rt.invoke(&f, args).map_err(thrown)
        }
        Expr::KeywordInvoke(e) => {
            let target = eval(rt, &e.target)?;
            rt.invoke(&Value::Keyword(e.keyword.clone()), vec![target])
                .map_err(thrown)
        }
        Expr::ProtocolInvoke(e) => {
            let f = e.var.var.get().map_err(thrown)?;
            let args = eval_all(rt, &e.args)?;
            rt.invoke(&f, args).map_err(thrown)
        }
        Expr::Host(e) => eval_host(rt, e),
        Expr::InstanceOf(e) => {
            let value = eval(rt, &e.expr)?;
            let class = rt.classes.lookup(&e.class).ok_or_else(|| {
                CompileError::resolution(format!("Unable to resolve classname: {}", e.class))
            })?;
            Ok(Value::Bool(rt.is_instance(&value, class.id)))
        }
        Expr::DefType(e) => {
            rt.load(e.unit.clone())
                .map_err(|err| CompileError::resolution(err.to_string()))?;
            type_value(rt, &e.name)
        }
        Expr::Reify(e) if e.captures.is_empty() => {
            rt.load(e.unit.clone())
                .map_err(|err| CompileError::resolution(err.to_string()))?;
            let class = rt.classes.lookup(&e.name).ok_or_else(|| {
                CompileError::resolution(format!("Unable to resolve classname: {}", e.name))
            })?;
            rt.construct_reflective(class.id, Vec::new()).map_err(thrown)
        }
        Expr::Fn(_)
        | Expr::Reify(_)
        | Expr::Local(_)
        | Expr::Let(_)
        | Expr::LetFn(_)
        | Expr::Recur(_)
        | Expr::Throw(_)
        | Expr::Try(_)
        | Expr::Case(_) => Err(CompileError::new(
            crate::error::ErrorKind::Eval,
            "Can't eval this form without compiling it",
        )),
    }
}

fn eval_host(rt: &Runtime, e: &HostExpr) -> Result<Value> {
    let target = match &e.target {
        Some(t) => Some(eval(rt, t)?),
        None => None,
    };
    let args = eval_all(rt, &e.args)?;
    let target = || {
        target
            .clone()
            .ok_or_else(|| CompileError::syntax("Malformed member expression"))
    };
    let out = match &e.op {
        HostOp::StaticMethod { class, name, .. } => rt.invoke_static_reflective(class, name, args),
        HostOp::StaticField { class, member } => {
            rt.invoke_static_reflective(class, &member.member, Vec::new())
        }
        HostOp::InstanceMethod { name, .. } => rt.invoke_method_reflective(target()?, name, args),
        HostOp::InstanceField { name, .. } => rt.get_field_reflective(target()?, name),
        HostOp::New { class, .. } => {
            let class = rt.classes.lookup(class).ok_or_else(|| {
                CompileError::resolution(format!("Unable to resolve classname: {}", class))
            })?;
            rt.construct_reflective(class.id, args)
        }
    };
    out.map_err(thrown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::context::{CompileContext, Context};
    use crate::options::CompileOptions;

    fn eval_str(rt: &Runtime, source: &str) -> Result<Value> {
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(rt, &options);
        let form = kdn::read_str(source).map_err(|e| CompileError::read(&e))?;
        let expr = analyze(&mut ctx, Context::Eval, &form)?;
        eval(rt, &expr)
    }

    #[test]
    fn test_literals_and_collections() {
        let rt = Runtime::new();
        assert_eq!(eval_str(&rt, "42").unwrap().as_long(), Some(42));
        let v = eval_str(&rt, "[1 :a \"s\"]").unwrap();
        assert_eq!(v.items().map(|i| i.len()), Some(3));
        assert!(eval_str(&rt, "nil").unwrap().is_nil());
    }

    #[test]
    fn test_def_binds_root_and_meta() {
        let rt = Runtime::new();
        eval_str(&rt, "(def ^:private answer \"the answer\" 42)").unwrap();
        let var = rt.resolve_var(&kdn::Symbol::new("answer")).unwrap();
        assert_eq!(var.root().and_then(|v| v.as_long()), Some(42));
        assert!(var.meta_flag("private"));
        assert_eq!(var.meta_get("doc").and_then(|d| d.as_str().map(str::to_string)), Some("the answer".into()));
    }

    #[test]
    fn test_if_and_invoke() {
        let rt = Runtime::new();
        let v = eval_str(&rt, "(if nil 1 (+ 2 3))").unwrap();
        assert_eq!(v.as_long(), Some(5));
    }

    #[test]
    fn test_fn_without_captures_is_callable() {
        let rt = Runtime::new();
        let f = eval_str(&rt, "(fn* [x] (inc x))").unwrap();
        let out = rt.invoke(&f, vec![Value::Long(4)]).unwrap();
        assert_eq!(out.as_long(), Some(5));
    }

    #[test]
    fn test_static_host_call_and_field() {
        let rt = Runtime::new();
        assert_eq!(eval_str(&rt, "(Math/abs -3)").unwrap().as_long(), Some(3));
        let pi = eval_str(&rt, "Math/PI").unwrap();
        assert!(matches!(pi, Value::Double(d) if (d - std::f64::consts::PI).abs() < 1e-12));
    }

    #[test]
    fn test_thrown_value_becomes_eval_error() {
        let rt = Runtime::new();
        let err = eval_str(&rt, "(Math/abs \"x\")").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Eval);
        assert!(err.thrown.is_some());
    }
}
