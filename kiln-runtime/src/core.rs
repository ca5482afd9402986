//! The `kiln.core` function library
//!
//! Natives that operate on boxed values. Arithmetic and a few collection
//! functions also carry inline descriptors so the compiler can replace a
//! fixed-arity call with a direct host call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kdn::Symbol;

use crate::classes::class_id;
use crate::coll;
use crate::error::{Result, Thrown};
use crate::namespace::{self, Inline};
use crate::numbers;
use crate::protocol::{Dispatcher, Protocol, ProtocolMethod};
use crate::runtime::{Runtime, CORE_NS};
use crate::value::{ExceptionObj, NativeFn, NativeFnPtr, NativeKind, TypeRef, Value};

static GENSYM: AtomicU64 = AtomicU64::new(1);

/// Next id for generated symbols, shared with the native macros
pub fn next_gensym_id() -> u64 {
    GENSYM.fetch_add(1, Ordering::Relaxed)
}

fn def(rt: &Runtime, name: &'static str, func: NativeFnPtr) {
    rt.intern(CORE_NS, name).bind_root(Value::Native(Arc::new(NativeFn {
        name,
        kind: NativeKind::Fn(func),
    })));
}

fn def_inline(
    rt: &Runtime,
    name: &'static str,
    func: NativeFnPtr,
    class: &'static str,
    method: &'static str,
    arities: &'static [usize],
) {
    def(rt, name, func);
    rt.intern(CORE_NS, name).set_inline(Inline {
        class,
        method,
        arities,
    });
}

fn arity(args: &[Value], min: usize, max: usize, name: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Thrown::arity(args.len(), &format!("{}/{}", CORE_NS, name)));
    }
    Ok(())
}

fn long_arg(v: &Value) -> Result<i64> {
    v.as_long().ok_or_else(|| Thrown::class_cast(v, "Long"))
}

// ========== Numbers ==========

fn plus(_: &Runtime, args: &[Value]) -> Result<Value> {
    args.iter()
        .try_fold(Value::Long(0), |acc, x| numbers::add(&acc, x))
}

fn times(_: &Runtime, args: &[Value]) -> Result<Value> {
    args.iter()
        .try_fold(Value::Long(1), |acc, x| numbers::multiply(&acc, x))
}

fn fold_from_first(
    args: &[Value],
    name: &str,
    unit: Value,
    op: fn(&Value, &Value) -> Result<Value>,
) -> Result<Value> {
    match args {
        [] => Err(Thrown::arity(0, &format!("{}/{}", CORE_NS, name))),
        [x] => op(&unit, x),
        [first, rest @ ..] => rest.iter().try_fold(first.clone(), |acc, x| op(&acc, x)),
    }
}

fn minus(_: &Runtime, args: &[Value]) -> Result<Value> {
    fold_from_first(args, "-", Value::Long(0), numbers::minus)
}

fn divide(_: &Runtime, args: &[Value]) -> Result<Value> {
    fold_from_first(args, "/", Value::Long(1), numbers::divide)
}

fn chain(args: &[Value], name: &str, test: fn(&Value, &Value) -> Result<bool>) -> Result<Value> {
    if args.is_empty() {
        return Err(Thrown::arity(0, &format!("{}/{}", CORE_NS, name)));
    }
    if let [only] = args {
        numbers::Num::of(only)?;
    }
    for pair in args.windows(2) {
        if !test(&pair[0], &pair[1])? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn lt(_: &Runtime, args: &[Value]) -> Result<Value> {
    chain(args, "<", numbers::lt)
}

fn gt(_: &Runtime, args: &[Value]) -> Result<Value> {
    chain(args, ">", numbers::gt)
}

fn lte(_: &Runtime, args: &[Value]) -> Result<Value> {
    chain(args, "<=", numbers::lte)
}

fn gte(_: &Runtime, args: &[Value]) -> Result<Value> {
    chain(args, ">=", numbers::gte)
}

fn num_eq(_: &Runtime, args: &[Value]) -> Result<Value> {
    chain(args, "==", numbers::num_equiv)
}

fn equals(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, usize::MAX, "=")?;
    Ok(Value::Bool(args.windows(2).all(|p| p[0].equiv(&p[1]))))
}

fn not_equals(rt: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!equals(rt, args)?.is_truthy()))
}

fn unary(args: &[Value], name: &str, op: fn(&Value) -> Result<Value>) -> Result<Value> {
    arity(args, 1, 1, name)?;
    op(&args[0])
}

fn inc(_: &Runtime, args: &[Value]) -> Result<Value> {
    unary(args, "inc", numbers::inc)
}

fn dec(_: &Runtime, args: &[Value]) -> Result<Value> {
    unary(args, "dec", numbers::dec)
}

fn zero(_: &Runtime, args: &[Value]) -> Result<Value> {
    unary(args, "zero?", |x| numbers::is_zero(x).map(Value::Bool))
}

fn pos(_: &Runtime, args: &[Value]) -> Result<Value> {
    unary(args, "pos?", |x| numbers::is_pos(x).map(Value::Bool))
}

fn neg(_: &Runtime, args: &[Value]) -> Result<Value> {
    unary(args, "neg?", |x| numbers::is_neg(x).map(Value::Bool))
}

fn binary(args: &[Value], name: &str, op: fn(&Value, &Value) -> Result<Value>) -> Result<Value> {
    arity(args, 2, 2, name)?;
    op(&args[0], &args[1])
}

fn quot(_: &Runtime, args: &[Value]) -> Result<Value> {
    binary(args, "quot", numbers::quotient)
}

fn rem(_: &Runtime, args: &[Value]) -> Result<Value> {
    binary(args, "rem", numbers::remainder)
}

fn modulo(_: &Runtime, args: &[Value]) -> Result<Value> {
    binary(args, "mod", numbers::modulo)
}

fn max(_: &Runtime, args: &[Value]) -> Result<Value> {
    fold_from_first(args, "max", Value::Nil, |a, b| {
        if a.is_nil() || numbers::gt(b, a)? {
            Ok(b.clone())
        } else {
            Ok(a.clone())
        }
    })
}

fn min(_: &Runtime, args: &[Value]) -> Result<Value> {
    fold_from_first(args, "min", Value::Nil, |a, b| {
        if a.is_nil() || numbers::lt(b, a)? {
            Ok(b.clone())
        } else {
            Ok(a.clone())
        }
    })
}

fn even(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "even?")?;
    Ok(Value::Bool(long_arg(&args[0])? % 2 == 0))
}

fn odd(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "odd?")?;
    Ok(Value::Bool(long_arg(&args[0])? % 2 != 0))
}

fn to_long(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "long")?;
    match numbers::Num::of(&args[0])? {
        numbers::Num::Long(n) => Ok(Value::Long(n)),
        numbers::Num::Double(d) => Ok(Value::Long(d as i64)),
    }
}

fn to_double(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "double")?;
    Ok(Value::Double(numbers::Num::of(&args[0])?.to_f64()))
}

// ========== Collections ==========

fn list(_: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::list(args.to_vec()))
}

fn vector(_: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::vector(args.to_vec()))
}

fn vec(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "vec")?;
    Ok(Value::vector(args[0].seq_items()?))
}

fn hash_map(_: &Runtime, args: &[Value]) -> Result<Value> {
    if args.len() % 2 != 0 {
        return Err(Thrown::illegal_argument(
            "No value supplied for key",
        ));
    }
    Ok(Value::map(
        args.chunks(2).map(|kv| (kv[0].clone(), kv[1].clone())),
    ))
}

fn hash_set(_: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::Set(Arc::new(args.iter().cloned().collect())))
}

fn first(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "first")?;
    coll::first(&args[0])
}

fn second(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "second")?;
    Ok(args[0].seq_items()?.into_iter().nth(1).unwrap_or(Value::Nil))
}

fn last(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "last")?;
    Ok(args[0].seq_items()?.pop().unwrap_or(Value::Nil))
}

fn rest(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "rest")?;
    coll::rest(&args[0])
}

fn next(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "next")?;
    coll::seq(&coll::rest(&args[0])?)
}

fn cons(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "cons")?;
    coll::cons(args[0].clone(), &args[1])
}

fn conj(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, usize::MAX, "conj")?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, x| coll::conj(&acc, x.clone()))
}

fn count(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "count")?;
    coll::count(&args[0]).map(|n| Value::Long(n as i64))
}

fn nth(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 3, "nth")?;
    coll::nth(&args[0], long_arg(&args[1])?, args.get(2).cloned())
}

fn get(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 3, "get")?;
    Ok(coll::get(
        &args[0],
        &args[1],
        args.get(2).cloned().unwrap_or(Value::Nil),
    ))
}

fn assoc(_: &Runtime, args: &[Value]) -> Result<Value> {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(Thrown::arity(args.len(), "kiln.core/assoc"));
    }
    args[1..].chunks(2).try_fold(args[0].clone(), |acc, kv| {
        coll::assoc(&acc, kv[0].clone(), kv[1].clone())
    })
}

fn dissoc(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, usize::MAX, "dissoc")?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, k| coll::dissoc(&acc, k))
}

fn contains(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "contains?")?;
    Ok(Value::Bool(coll::contains(&args[0], &args[1])))
}

fn seq(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "seq")?;
    coll::seq(&args[0])
}

fn empty(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "empty?")?;
    Ok(Value::Bool(coll::count(&args[0])? == 0))
}

fn keys(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "keys")?;
    match &args[0] {
        Value::Map(m) if !m.is_empty() => Ok(Value::list(m.keys().cloned().collect())),
        Value::Map(_) | Value::Nil => Ok(Value::Nil),
        other => Err(Thrown::class_cast(other, "IPersistentMap")),
    }
}

fn vals(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "vals")?;
    match &args[0] {
        Value::Map(m) if !m.is_empty() => Ok(Value::list(m.values().cloned().collect())),
        Value::Map(_) | Value::Nil => Ok(Value::Nil),
        other => Err(Thrown::class_cast(other, "IPersistentMap")),
    }
}

fn concat(_: &Runtime, args: &[Value]) -> Result<Value> {
    let mut out = Vec::new();
    for a in args {
        out.extend(a.seq_items()?);
    }
    Ok(Value::list(out))
}

fn reverse(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "reverse")?;
    let mut items = args[0].seq_items()?;
    items.reverse();
    Ok(Value::list(items))
}

fn range(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 3, "range")?;
    let (start, end, step) = match args {
        [end] => (0, long_arg(end)?, 1),
        [start, end] => (long_arg(start)?, long_arg(end)?, 1),
        [start, end, step] => (long_arg(start)?, long_arg(end)?, long_arg(step)?),
        _ => unreachable!("arity checked above"),
    };
    if step == 0 {
        return Err(Thrown::illegal_argument("range step must not be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        out.push(Value::Long(i));
        i += step;
    }
    Ok(Value::list(out))
}

fn into(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "into")?;
    args[1]
        .seq_items()?
        .into_iter()
        .try_fold(args[0].clone(), |acc, x| coll::conj(&acc, x))
}

fn map(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, usize::MAX, "map")?;
    let colls = args[1..]
        .iter()
        .map(Value::seq_items)
        .collect::<Result<Vec<_>>>()?;
    let len = colls.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let call_args = colls.iter().map(|c| c[i].clone()).collect();
        out.push(rt.invoke(&args[0], call_args)?);
    }
    Ok(Value::list(out))
}

fn filter(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "filter")?;
    let mut out = Vec::new();
    for item in args[1].seq_items()? {
        if rt.invoke(&args[0], vec![item.clone()])?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn reduce(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 3, "reduce")?;
    let f = &args[0];
    let (init, items) = match args {
        [_, coll] => {
            let mut items = coll.seq_items()?.into_iter();
            match items.next() {
                Some(first) => (first, items.collect::<Vec<_>>()),
                None => return rt.invoke(f, Vec::new()),
            }
        }
        [_, init, coll] => (init.clone(), coll.seq_items()?),
        _ => unreachable!("arity checked above"),
    };
    items
        .into_iter()
        .try_fold(init, |acc, x| rt.invoke(f, vec![acc, x]))
}

fn apply(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, usize::MAX, "apply")?;
    let (spread, fixed) = args[1..].split_last().unwrap_or((&Value::Nil, &[]));
    let mut call_args = fixed.to_vec();
    call_args.extend(spread.seq_items()?);
    rt.invoke(&args[0], call_args)
}

// ========== Predicates and misc ==========

fn is_nil(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "nil?")?;
    Ok(Value::Bool(args[0].is_nil()))
}

fn is_some(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "some?")?;
    Ok(Value::Bool(!args[0].is_nil()))
}

fn not(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "not")?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn identity(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "identity")?;
    Ok(args[0].clone())
}

fn identical(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "identical?")?;
    Ok(Value::Bool(args[0].identical(&args[1])))
}

fn type_pred(args: &[Value], name: &str, test: fn(&Value) -> bool) -> Result<Value> {
    arity(args, 1, 1, name)?;
    Ok(Value::Bool(test(&args[0])))
}

fn is_string(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "string?", |v| matches!(v, Value::Str(_)))
}

fn is_number(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "number?", |v| matches!(v, Value::Long(_) | Value::Double(_)))
}

fn is_keyword(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "keyword?", |v| matches!(v, Value::Keyword(_)))
}

fn is_fn(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "fn?", |v| {
        matches!(v, Value::Fn(_) | Value::Native(_) | Value::ProtocolMethod(_))
    })
}

fn is_vector(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "vector?", |v| matches!(v, Value::Vector(_)))
}

fn is_map(_: &Runtime, args: &[Value]) -> Result<Value> {
    type_pred(args, "map?", |v| matches!(v, Value::Map(_)))
}

fn hash(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "hash")?;
    Ok(Value::Long(args[0].hasheq() as i64))
}

fn str(_: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::string(
        args.iter().map(Value::to_str).collect::<String>(),
    ))
}

fn pr_str(_: &Runtime, args: &[Value]) -> Result<Value> {
    Ok(Value::string(joined(args, |v| v.to_string())))
}

fn joined(args: &[Value], render: fn(&Value) -> String) -> String {
    args.iter().map(render).collect::<Vec<_>>().join(" ")
}

fn println(rt: &Runtime, args: &[Value]) -> Result<Value> {
    rt.write_out(&format!("{}\n", joined(args, Value::to_str)));
    Ok(Value::Nil)
}

fn print(rt: &Runtime, args: &[Value]) -> Result<Value> {
    rt.write_out(&joined(args, Value::to_str));
    Ok(Value::Nil)
}

fn prn(rt: &Runtime, args: &[Value]) -> Result<Value> {
    rt.write_out(&format!("{}\n", joined(args, |v| v.to_string())));
    Ok(Value::Nil)
}

fn name(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "name")?;
    match &args[0] {
        Value::Keyword(k) => Ok(Value::string(k.name())),
        Value::Symbol(s) => Ok(Value::string(s.name())),
        Value::Str(_) => Ok(args[0].clone()),
        other => Err(Thrown::class_cast(other, "Named")),
    }
}

fn keyword(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "keyword")?;
    match &args[0] {
        Value::Str(s) => Ok(Value::keyword(s)),
        Value::Symbol(s) => Ok(Value::keyword(&s.to_string())),
        Value::Keyword(_) => Ok(args[0].clone()),
        _ => Ok(Value::Nil),
    }
}

fn symbol(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 2, "symbol")?;
    match args {
        [Value::Str(s)] => Ok(Value::Symbol(Symbol::parse(s))),
        [Value::Symbol(_)] => Ok(args[0].clone()),
        [Value::Str(ns), Value::Str(n)] => Ok(Value::Symbol(Symbol::qualified(&**ns, &**n))),
        _ => Err(Thrown::illegal_argument("symbol expects strings")),
    }
}

fn gensym(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 0, 1, "gensym")?;
    let prefix = args.first().map(Value::to_str).unwrap_or_else(|| "G__".into());
    Ok(Value::Symbol(Symbol::new(format!(
        "{}{}",
        prefix,
        next_gensym_id()
    ))))
}

fn type_of(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "type")?;
    Ok(Value::Type(TypeRef {
        id: args[0].type_id(),
        name: Arc::from(args[0].class_name()),
    }))
}

fn instance(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "instance?")?;
    match &args[0] {
        Value::Type(t) => Ok(Value::Bool(rt.is_instance(&args[1], t.id))),
        other => Err(Thrown::class_cast(other, "Class")),
    }
}

fn ex_info(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 3, "ex-info")?;
    Ok(Value::Exception(Arc::new(ExceptionObj {
        class: class_id::EXCEPTION_INFO,
        message: Some(args[0].to_str()),
        data: args[1].clone(),
        cause: args.get(2).cloned(),
    })))
}

fn ex_message(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "ex-message")?;
    Ok(match &args[0] {
        Value::Exception(e) => e.message.as_deref().map(Value::string).unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

fn ex_data(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "ex-data")?;
    Ok(match &args[0] {
        Value::Exception(e) if e.class == class_id::EXCEPTION_INFO => e.data.clone(),
        _ => Value::Nil,
    })
}

fn deref(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "deref")?;
    match &args[0] {
        Value::Var(v) => v.get(),
        other => Err(Thrown::class_cast(other, "IDeref")),
    }
}

fn meta(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "meta")?;
    Ok(match &args[0] {
        Value::Var(v) => v.meta(),
        _ => Value::Nil,
    })
}

fn in_ns(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "in-ns")?;
    match &args[0] {
        Value::Symbol(s) => {
            rt.set_current_ns(s.name());
            Ok(Value::Nil)
        }
        other => Err(Thrown::class_cast(other, "Symbol")),
    }
}

// ========== Dynamic bindings ==========

fn push_thread_bindings(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 1, 1, "push-thread-bindings")?;
    let mut bindings = Vec::new();
    if let Value::Map(m) = &args[0] {
        for (k, v) in m.iter() {
            match k {
                Value::Var(var) => bindings.push((var.clone(), v.clone())),
                other => return Err(Thrown::class_cast(other, "Var")),
            }
        }
    }
    namespace::push_bindings(bindings)?;
    Ok(Value::Nil)
}

fn pop_thread_bindings(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 0, 0, "pop-thread-bindings")?;
    namespace::pop_bindings()?;
    Ok(Value::Nil)
}

// ========== Protocols ==========

/// `(-make-protocol 'Name '[methods...])`, qualified in the current namespace
fn make_protocol(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "-make-protocol")?;
    let name = match &args[0] {
        Value::Symbol(s) => Symbol::qualified(&*rt.current_ns().name, s.name()),
        other => return Err(Thrown::class_cast(other, "Symbol")),
    };
    let methods = args[1]
        .seq_items()?
        .into_iter()
        .map(|m| match m {
            Value::Symbol(s) => Ok(Arc::from(s.name())),
            other => Err(Thrown::class_cast(&other, "Symbol")),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Protocol(Arc::new(Protocol::new(name, methods))))
}

/// `(-protocol-method P 'm)`: the callable bound to a method var
fn protocol_method(_: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "-protocol-method")?;
    match (&args[0], &args[1]) {
        (Value::Protocol(p), Value::Symbol(m)) => Ok(Value::ProtocolMethod(Arc::new(
            ProtocolMethod {
                protocol: p.clone(),
                name: Arc::from(m.name()),
            },
        ))),
        (other, _) => Err(Thrown::class_cast(other, "Protocol")),
    }
}

/// `(extend Type Protocol {:method f ...})`
fn extend(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 3, 3, "extend")?;
    let type_id = match &args[0] {
        Value::Type(t) => t.id,
        Value::Nil => class_id::NIL,
        other => return Err(Thrown::class_cast(other, "Class")),
    };
    let protocol = match &args[1] {
        Value::Protocol(p) => p.clone(),
        other => return Err(Thrown::class_cast(other, "Protocol")),
    };
    let impls = match &args[2] {
        Value::Map(m) => m.clone(),
        other => return Err(Thrown::class_cast(other, "IPersistentMap")),
    };
    for (k, f) in impls.iter() {
        let method = match k {
            Value::Keyword(kw) => kw.name().to_string(),
            other => return Err(Thrown::class_cast(other, "Keyword")),
        };
        if !protocol.has_method(&method) {
            return Err(Thrown::illegal_argument(format!(
                "{} is not a method of protocol {}",
                method, protocol.name
            )));
        }
        let d = rt.dispatchers.register(Dispatcher::Fn(f.clone()));
        protocol.register(&method, type_id, d);
    }
    Ok(Value::Nil)
}

fn satisfies(rt: &Runtime, args: &[Value]) -> Result<Value> {
    arity(args, 2, 2, "satisfies?")?;
    match &args[0] {
        Value::Protocol(p) => Ok(Value::Bool(p.extends(args[1].type_id(), &rt.classes))),
        other => Err(Thrown::class_cast(other, "Protocol")),
    }
}

/// Install the core library
pub fn install(rt: &Runtime) {
    def_inline(rt, "+", plus, "Numbers", "add", &[2]);
    def_inline(rt, "-", minus, "Numbers", "minus", &[2]);
    def_inline(rt, "*", times, "Numbers", "multiply", &[2]);
    def_inline(rt, "/", divide, "Numbers", "divide", &[2]);
    def_inline(rt, "<", lt, "Numbers", "lt", &[2]);
    def_inline(rt, ">", gt, "Numbers", "gt", &[2]);
    def_inline(rt, "<=", lte, "Numbers", "lte", &[2]);
    def_inline(rt, ">=", gte, "Numbers", "gte", &[2]);
    def_inline(rt, "==", num_eq, "Numbers", "equiv", &[2]);
    def_inline(rt, "=", equals, "Util", "equiv", &[2]);
    def_inline(rt, "inc", inc, "Numbers", "inc", &[1]);
    def_inline(rt, "dec", dec, "Numbers", "dec", &[1]);
    def_inline(rt, "zero?", zero, "Numbers", "isZero", &[1]);
    def_inline(rt, "pos?", pos, "Numbers", "isPos", &[1]);
    def_inline(rt, "neg?", neg, "Numbers", "isNeg", &[1]);
    def_inline(rt, "quot", quot, "Numbers", "quotient", &[2]);
    def_inline(rt, "rem", rem, "Numbers", "remainder", &[2]);
    def_inline(rt, "count", count, "RT", "count", &[1]);
    def_inline(rt, "nth", nth, "RT", "nth", &[2]);
    def_inline(rt, "get", get, "RT", "get", &[2]);
    def_inline(rt, "long", to_long, "RT", "longCast", &[1]);
    def_inline(rt, "double", to_double, "RT", "doubleCast", &[1]);
    def_inline(rt, "identical?", identical, "Util", "identical", &[2]);
    def(rt, "not=", not_equals);
    def(rt, "mod", modulo);
    def(rt, "max", max);
    def(rt, "min", min);
    def(rt, "even?", even);
    def(rt, "odd?", odd);

    def(rt, "list", list);
    def(rt, "vector", vector);
    def(rt, "vec", vec);
    def(rt, "hash-map", hash_map);
    def(rt, "hash-set", hash_set);
    def(rt, "first", first);
    def(rt, "second", second);
    def(rt, "last", last);
    def(rt, "rest", rest);
    def(rt, "next", next);
    def(rt, "cons", cons);
    def(rt, "conj", conj);
    def(rt, "assoc", assoc);
    def(rt, "dissoc", dissoc);
    def(rt, "contains?", contains);
    def(rt, "seq", seq);
    def(rt, "empty?", empty);
    def(rt, "keys", keys);
    def(rt, "vals", vals);
    def(rt, "concat", concat);
    def(rt, "reverse", reverse);
    def(rt, "range", range);
    def(rt, "into", into);
    def(rt, "map", map);
    def(rt, "filter", filter);
    def(rt, "reduce", reduce);
    def(rt, "apply", apply);

    def(rt, "nil?", is_nil);
    def(rt, "some?", is_some);
    def(rt, "not", not);
    def(rt, "identity", identity);
    def(rt, "string?", is_string);
    def(rt, "number?", is_number);
    def(rt, "keyword?", is_keyword);
    def(rt, "fn?", is_fn);
    def(rt, "vector?", is_vector);
    def(rt, "map?", is_map);
    def(rt, "hash", hash);
    def(rt, "str", str);
    def(rt, "pr-str", pr_str);
    def(rt, "println", println);
    def(rt, "print", print);
    def(rt, "prn", prn);
    def(rt, "name", name);
    def(rt, "keyword", keyword);
    def(rt, "symbol", symbol);
    def(rt, "gensym", gensym);
    def(rt, "type", type_of);
    def(rt, "instance?", instance);
    def(rt, "ex-info", ex_info);
    def(rt, "ex-message", ex_message);
    def(rt, "ex-data", ex_data);
    def(rt, "deref", deref);
    def(rt, "meta", meta);
    def(rt, "in-ns", in_ns);
    def(rt, "push-thread-bindings", push_thread_bindings);
    def(rt, "pop-thread-bindings", pop_thread_bindings);
    def(rt, "-make-protocol", make_protocol);
    def(rt, "-protocol-method", protocol_method);
    def(rt, "extend", extend);
    def(rt, "satisfies?", satisfies);
}
