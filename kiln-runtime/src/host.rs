//! Host classes
//!
//! The built-in class library the compiler can call into directly:
//! arithmetic on `Numbers`, collection helpers on `RT`, `Math`, strings,
//! `StringBuilder` and the exception constructors. Members carry full
//! signatures so the analyzer can pick overloads and emit unboxed calls.
//! Calls the analyzer could not resolve go through the reflective entry
//! points at the bottom of this file.

use std::sync::Arc;

use kir_core::{HostKind, HostType, Prim};
use parking_lot::Mutex;

use crate::classes::{class_id, Class, ClassTable, HostFn, HostMember};
use crate::coll;
use crate::error::{Result, Thrown};
use crate::numbers;
use crate::runtime::Runtime;
use crate::value::{ExceptionObj, HostObject, Instance, Slot, Value};

const L: HostType = HostType::Prim(Prim::Long);
const D: HostType = HostType::Prim(Prim::Double);
const I: HostType = HostType::Prim(Prim::Int);
const B: HostType = HostType::Prim(Prim::Bool);
const O: HostType = HostType::Object;

fn class(name: &str) -> HostType {
    HostType::Class(name.to_string())
}

fn string() -> HostType {
    class("String")
}

fn member(kind: HostKind, name: &'static str, params: &[HostType], ret: HostType, func: HostFn) -> HostMember {
    HostMember {
        name,
        kind,
        params: params.to_vec(),
        ret,
        func,
    }
}

fn static_method(name: &'static str, params: &[HostType], ret: HostType, func: HostFn) -> HostMember {
    member(HostKind::StaticMethod, name, params, ret, func)
}

fn method(name: &'static str, params: &[HostType], ret: HostType, func: HostFn) -> HostMember {
    member(HostKind::Method, name, params, ret, func)
}

fn static_field(name: &'static str, ty: HostType, func: HostFn) -> HostMember {
    member(HostKind::StaticField, name, &[], ty, func)
}

fn ctor(params: &[HostType], ty: HostType, func: HostFn) -> HostMember {
    member(HostKind::Constructor, "new", params, ty, func)
}

// ========== Argument access ==========

fn bad_arg(i: usize) -> Thrown {
    Thrown::illegal_argument(format!("bad host argument {}", i))
}

fn long(args: &[Slot], i: usize) -> Result<i64> {
    args.get(i).and_then(Slot::as_long).ok_or_else(|| bad_arg(i))
}

fn double(args: &[Slot], i: usize) -> Result<f64> {
    args.get(i).and_then(Slot::as_double).ok_or_else(|| bad_arg(i))
}

fn int(args: &[Slot], i: usize) -> Result<i32> {
    args.get(i).and_then(Slot::as_int).ok_or_else(|| bad_arg(i))
}

fn obj(args: &[Slot], i: usize) -> Value {
    args.get(i).map(Slot::to_value).unwrap_or(Value::Nil)
}

fn text(args: &[Slot], i: usize) -> Result<Arc<str>> {
    match obj(args, i) {
        Value::Str(s) => Ok(s),
        Value::Nil => Err(Thrown::new(class_id::NULL_POINTER, "null string")),
        other => Err(Thrown::class_cast(&other, "String")),
    }
}

fn string_slot(s: impl AsRef<str>) -> Slot {
    Slot::Obj(Value::string(s))
}

// ========== Class members ==========

fn numbers_members() -> Vec<HostMember> {
    macro_rules! arith {
        ($name:literal, $checked:expr, $float:expr, $generic:path) => {
            vec![
                static_method($name, &[L, L], L, |_, a| {
                    $checked(long(a, 0)?, long(a, 1)?)
                        .map(Slot::Long)
                        .ok_or_else(numbers::overflow)
                }),
                static_method($name, &[D, D], D, |_, a| {
                    Ok(Slot::Double($float(double(a, 0)?, double(a, 1)?)))
                }),
                static_method($name, &[O, O], O, |_, a| {
                    $generic(&obj(a, 0), &obj(a, 1)).map(Slot::Obj)
                }),
            ]
        };
    }
    macro_rules! compare {
        ($name:literal, $op:tt, $generic:path) => {
            vec![
                static_method($name, &[L, L], B, |_, a| {
                    Ok(Slot::Bool(long(a, 0)? $op long(a, 1)?))
                }),
                static_method($name, &[D, D], B, |_, a| {
                    Ok(Slot::Bool(double(a, 0)? $op double(a, 1)?))
                }),
                static_method($name, &[O, O], B, |_, a| {
                    $generic(&obj(a, 0), &obj(a, 1)).map(Slot::Bool)
                }),
            ]
        };
    }
    macro_rules! predicate {
        ($name:literal, $op:tt, $generic:path) => {
            vec![
                static_method($name, &[L], B, |_, a| Ok(Slot::Bool(long(a, 0)? $op 0))),
                static_method($name, &[D], B, |_, a| Ok(Slot::Bool(double(a, 0)? $op 0.0))),
                static_method($name, &[O], B, |_, a| $generic(&obj(a, 0)).map(Slot::Bool)),
            ]
        };
    }

    let mut members = Vec::new();
    members.extend(arith!("add", i64::checked_add, |x: f64, y: f64| x + y, numbers::add));
    members.extend(arith!("minus", i64::checked_sub, |x: f64, y: f64| x - y, numbers::minus));
    members.extend(arith!("multiply", i64::checked_mul, |x: f64, y: f64| x * y, numbers::multiply));
    members.extend(compare!("lt", <, numbers::lt));
    members.extend(compare!("lte", <=, numbers::lte));
    members.extend(compare!("gt", >, numbers::gt));
    members.extend(compare!("gte", >=, numbers::gte));
    members.extend(compare!("equiv", ==, numbers::num_equiv));
    members.extend(predicate!("isZero", ==, numbers::is_zero));
    members.extend(predicate!("isPos", >, numbers::is_pos));
    members.extend(predicate!("isNeg", <, numbers::is_neg));
    members.extend([
        static_method("divide", &[D, D], D, |_, a| Ok(Slot::Double(double(a, 0)? / double(a, 1)?))),
        static_method("divide", &[O, O], O, |_, a| numbers::divide(&obj(a, 0), &obj(a, 1)).map(Slot::Obj)),
        static_method("quotient", &[L, L], L, |_, a| match long(a, 1)? {
            0 => Err(numbers::divide_by_zero()),
            y => long(a, 0)?.checked_div(y).map(Slot::Long).ok_or_else(numbers::overflow),
        }),
        static_method("quotient", &[O, O], O, |_, a| numbers::quotient(&obj(a, 0), &obj(a, 1)).map(Slot::Obj)),
        static_method("remainder", &[L, L], L, |_, a| match long(a, 1)? {
            0 => Err(numbers::divide_by_zero()),
            y => Ok(Slot::Long(long(a, 0)?.wrapping_rem(y))),
        }),
        static_method("remainder", &[O, O], O, |_, a| numbers::remainder(&obj(a, 0), &obj(a, 1)).map(Slot::Obj)),
        static_method("inc", &[L], L, |_, a| long(a, 0)?.checked_add(1).map(Slot::Long).ok_or_else(numbers::overflow)),
        static_method("inc", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)? + 1.0))),
        static_method("inc", &[O], O, |_, a| numbers::inc(&obj(a, 0)).map(Slot::Obj)),
        static_method("dec", &[L], L, |_, a| long(a, 0)?.checked_sub(1).map(Slot::Long).ok_or_else(numbers::overflow)),
        static_method("dec", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)? - 1.0))),
        static_method("dec", &[O], O, |_, a| numbers::dec(&obj(a, 0)).map(Slot::Obj)),
    ]);
    members
}

fn rt_members() -> Vec<HostMember> {
    vec![
        static_method("count", &[O], I, |_, a| {
            coll::count(&obj(a, 0)).map(|n| Slot::Int(n as i32))
        }),
        static_method("nth", &[O, I], O, |_, a| {
            coll::nth(&obj(a, 0), int(a, 1)? as i64, None).map(Slot::Obj)
        }),
        static_method("get", &[O, O], O, |_, a| {
            Ok(Slot::Obj(coll::get(&obj(a, 0), &obj(a, 1), Value::Nil)))
        }),
        static_method("intCast", &[L], I, |_, a| {
            let n = long(a, 0)?;
            i32::try_from(n)
                .map(Slot::Int)
                .map_err(|_| Thrown::illegal_argument(format!("Value out of range for int: {}", n)))
        }),
        static_method("intCast", &[O], I, |_, a| Slot::unbox(obj(a, 0), Prim::Int)),
        static_method("longCast", &[L], L, |_, a| Ok(Slot::Long(long(a, 0)?))),
        static_method("longCast", &[O], L, |_, a| Slot::unbox(obj(a, 0), Prim::Long)),
        static_method("doubleCast", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)?))),
        static_method("doubleCast", &[O], D, |_, a| Slot::unbox(obj(a, 0), Prim::Double)),
        static_method("booleanCast", &[O], B, |_, a| Ok(Slot::Bool(obj(a, 0).is_truthy()))),
    ]
}

fn util_members() -> Vec<HostMember> {
    vec![
        static_method("equiv", &[L, L], B, |_, a| Ok(Slot::Bool(long(a, 0)? == long(a, 1)?))),
        static_method("equiv", &[D, D], B, |_, a| Ok(Slot::Bool(double(a, 0)? == double(a, 1)?))),
        static_method("equiv", &[O, O], B, |_, a| Ok(Slot::Bool(obj(a, 0).equiv(&obj(a, 1))))),
        static_method("identical", &[O, O], B, |_, a| {
            Ok(Slot::Bool(obj(a, 0).identical(&obj(a, 1))))
        }),
        static_method("hasheq", &[O], I, |_, a| Ok(Slot::Int(obj(a, 0).hasheq()))),
    ]
}

fn math_members() -> Vec<HostMember> {
    vec![
        static_field("PI", D, |_, _| Ok(Slot::Double(std::f64::consts::PI))),
        static_field("E", D, |_, _| Ok(Slot::Double(std::f64::consts::E))),
        static_method("abs", &[L], L, |_, a| Ok(Slot::Long(long(a, 0)?.wrapping_abs()))),
        static_method("abs", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)?.abs()))),
        static_method("max", &[L, L], L, |_, a| Ok(Slot::Long(long(a, 0)?.max(long(a, 1)?)))),
        static_method("max", &[D, D], D, |_, a| Ok(Slot::Double(double(a, 0)?.max(double(a, 1)?)))),
        static_method("min", &[L, L], L, |_, a| Ok(Slot::Long(long(a, 0)?.min(long(a, 1)?)))),
        static_method("min", &[D, D], D, |_, a| Ok(Slot::Double(double(a, 0)?.min(double(a, 1)?)))),
        static_method("sqrt", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)?.sqrt()))),
        static_method("pow", &[D, D], D, |_, a| Ok(Slot::Double(double(a, 0)?.powf(double(a, 1)?)))),
        static_method("floor", &[D], D, |_, a| Ok(Slot::Double(double(a, 0)?.floor()))),
    ]
}

fn long_members() -> Vec<HostMember> {
    vec![
        static_field("MAX_VALUE", L, |_, _| Ok(Slot::Long(i64::MAX))),
        static_field("MIN_VALUE", L, |_, _| Ok(Slot::Long(i64::MIN))),
        static_method("parseLong", &[string()], L, |_, a| {
            let s = text(a, 0)?;
            s.trim()
                .parse::<i64>()
                .map(Slot::Long)
                .map_err(|_| Thrown::illegal_argument(format!("For input string: \"{}\"", s)))
        }),
        static_method("valueOf", &[L], class("Long"), |_, a| Ok(Slot::Obj(Value::Long(long(a, 0)?)))),
    ]
}

fn integer_members() -> Vec<HostMember> {
    vec![
        static_field("MAX_VALUE", I, |_, _| Ok(Slot::Int(i32::MAX))),
        static_field("MIN_VALUE", I, |_, _| Ok(Slot::Int(i32::MIN))),
    ]
}

fn double_members() -> Vec<HostMember> {
    vec![
        static_field("MAX_VALUE", D, |_, _| Ok(Slot::Double(f64::MAX))),
        static_method("parseDouble", &[string()], D, |_, a| {
            let s = text(a, 0)?;
            s.trim()
                .parse::<f64>()
                .map(Slot::Double)
                .map_err(|_| Thrown::illegal_argument(format!("For input string: \"{}\"", s)))
        }),
        static_method("isNaN", &[D], B, |_, a| Ok(Slot::Bool(double(a, 0)?.is_nan()))),
    ]
}

fn system_members() -> Vec<HostMember> {
    fn since_epoch() -> std::time::Duration {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
    }
    vec![
        static_method("currentTimeMillis", &[], L, |_, _| {
            Ok(Slot::Long(since_epoch().as_millis() as i64))
        }),
        static_method("nanoTime", &[], L, |_, _| Ok(Slot::Long(since_epoch().as_nanos() as i64))),
    ]
}

fn object_members() -> Vec<HostMember> {
    vec![
        method("toString", &[], string(), |_, a| Ok(string_slot(obj(a, 0).to_str()))),
        method("hashCode", &[], I, |_, a| Ok(Slot::Int(obj(a, 0).hasheq()))),
        method("equals", &[O], B, |_, a| Ok(Slot::Bool(obj(a, 0).equiv(&obj(a, 1))))),
    ]
}

fn string_members() -> Vec<HostMember> {
    fn char_index(s: &str, i: i32) -> Result<usize> {
        let n = s.chars().count();
        usize::try_from(i)
            .ok()
            .filter(|i| *i <= n)
            .ok_or_else(|| Thrown::index_out_of_bounds(i as i64))
    }
    vec![
        static_method("valueOf", &[O], string(), |_, a| Ok(string_slot(obj(a, 0).to_str()))),
        method("length", &[], I, |_, a| Ok(Slot::Int(text(a, 0)?.chars().count() as i32))),
        method("isEmpty", &[], B, |_, a| Ok(Slot::Bool(text(a, 0)?.is_empty()))),
        method("toUpperCase", &[], string(), |_, a| Ok(string_slot(text(a, 0)?.to_uppercase()))),
        method("toLowerCase", &[], string(), |_, a| Ok(string_slot(text(a, 0)?.to_lowercase()))),
        method("trim", &[], string(), |_, a| Ok(string_slot(text(a, 0)?.trim()))),
        method("substring", &[I], string(), |_, a| {
            let s = text(a, 0)?;
            let start = char_index(&s, int(a, 1)?)?;
            Ok(string_slot(s.chars().skip(start).collect::<String>()))
        }),
        method("substring", &[I, I], string(), |_, a| {
            let s = text(a, 0)?;
            let start = char_index(&s, int(a, 1)?)?;
            let end = char_index(&s, int(a, 2)?)?;
            if end < start {
                return Err(Thrown::index_out_of_bounds((end as i64) - (start as i64)));
            }
            Ok(string_slot(s.chars().skip(start).take(end - start).collect::<String>()))
        }),
        method("charAt", &[I], class("Character"), |_, a| {
            let s = text(a, 0)?;
            let i = int(a, 1)?;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Slot::Obj(Value::Char(c)))
                .ok_or_else(|| Thrown::index_out_of_bounds(i as i64))
        }),
        method("indexOf", &[string()], I, |_, a| {
            let s = text(a, 0)?;
            let needle = text(a, 1)?;
            Ok(Slot::Int(match s.find(&*needle) {
                Some(byte) => s[..byte].chars().count() as i32,
                None => -1,
            }))
        }),
        method("startsWith", &[string()], B, |_, a| {
            Ok(Slot::Bool(text(a, 0)?.starts_with(&*text(a, 1)?)))
        }),
        method("endsWith", &[string()], B, |_, a| {
            Ok(Slot::Bool(text(a, 0)?.ends_with(&*text(a, 1)?)))
        }),
        method("contains", &[string()], B, |_, a| {
            Ok(Slot::Bool(text(a, 0)?.contains(&*text(a, 1)?)))
        }),
        method("concat", &[string()], string(), |_, a| {
            Ok(string_slot(format!("{}{}", text(a, 0)?, text(a, 1)?)))
        }),
    ]
}

fn string_builder_members() -> Vec<HostMember> {
    fn buffer(args: &[Slot]) -> Result<Arc<HostObject>> {
        match obj(args, 0) {
            Value::Host(h) => Ok(h),
            other => Err(Thrown::class_cast(&other, "StringBuilder")),
        }
    }
    fn new_buffer(init: String) -> Slot {
        Slot::Obj(Value::Host(Arc::new(HostObject::StringBuilder(Mutex::new(init)))))
    }
    vec![
        ctor(&[], class("StringBuilder"), |_, _| Ok(new_buffer(String::new()))),
        ctor(&[string()], class("StringBuilder"), |_, a| Ok(new_buffer(text(a, 0)?.to_string()))),
        method("append", &[O], class("StringBuilder"), |_, a| {
            let h = buffer(a)?;
            match h.as_ref() {
                HostObject::StringBuilder(buf) => buf.lock().push_str(&obj(a, 1).to_str()),
            }
            Ok(Slot::Obj(Value::Host(h)))
        }),
        method("length", &[], I, |_, a| {
            let h = buffer(a)?;
            match h.as_ref() {
                HostObject::StringBuilder(buf) => Ok(Slot::Int(buf.lock().chars().count() as i32)),
            }
        }),
        method("toString", &[], string(), |_, a| Ok(string_slot(obj(a, 0).to_str()))),
    ]
}

fn new_exception(class: u32, message: Option<String>, data: Value) -> Slot {
    Slot::Obj(Value::Exception(Arc::new(ExceptionObj {
        class,
        message,
        data,
        cause: None,
    })))
}

fn exception_members(id: u32) -> Vec<HostMember> {
    macro_rules! ctors {
        ($id:expr, $name:expr) => {
            vec![
                ctor(&[], class($name), |_, _| Ok(new_exception($id, None, Value::Nil))),
                ctor(&[string()], class($name), |_, a| {
                    Ok(new_exception($id, Some(text(a, 0)?.to_string()), Value::Nil))
                }),
            ]
        };
    }
    let mut members = match id {
        class_id::THROWABLE => ctors!(class_id::THROWABLE, "Throwable"),
        class_id::EXCEPTION => ctors!(class_id::EXCEPTION, "Exception"),
        class_id::RUNTIME_EXCEPTION => ctors!(class_id::RUNTIME_EXCEPTION, "RuntimeException"),
        class_id::ILLEGAL_ARGUMENT => ctors!(class_id::ILLEGAL_ARGUMENT, "IllegalArgumentException"),
        class_id::ILLEGAL_STATE => ctors!(class_id::ILLEGAL_STATE, "IllegalStateException"),
        class_id::ARITHMETIC => ctors!(class_id::ARITHMETIC, "ArithmeticException"),
        class_id::UNSUPPORTED => ctors!(class_id::UNSUPPORTED, "UnsupportedOperationException"),
        class_id::EXCEPTION_INFO => vec![ctor(&[string(), O], class("ExceptionInfo"), |_, a| {
            Ok(new_exception(
                class_id::EXCEPTION_INFO,
                Some(text(a, 0)?.to_string()),
                obj(a, 1),
            ))
        })],
        _ => Vec::new(),
    };
    if id == class_id::THROWABLE {
        members.push(method("getMessage", &[], string(), |_, a| match obj(a, 0) {
            Value::Exception(e) => Ok(Slot::Obj(
                e.message.as_deref().map(Value::string).unwrap_or(Value::Nil),
            )),
            other => Err(Thrown::class_cast(&other, "Throwable")),
        }));
    }
    if id == class_id::EXCEPTION_INFO {
        members.push(method("getData", &[], O, |_, a| match obj(a, 0) {
            Value::Exception(e) => Ok(Slot::Obj(e.data.clone())),
            other => Err(Thrown::class_cast(&other, "ExceptionInfo")),
        }));
    }
    members
}

fn members_for(id: u32) -> Vec<HostMember> {
    match id {
        class_id::OBJECT => object_members(),
        class_id::NUMBERS => numbers_members(),
        class_id::RT => rt_members(),
        class_id::UTIL => util_members(),
        class_id::MATH => math_members(),
        class_id::LONG => long_members(),
        class_id::INTEGER => integer_members(),
        class_id::DOUBLE => double_members(),
        class_id::SYSTEM => system_members(),
        class_id::STRING => string_members(),
        class_id::STRING_BUILDER => string_builder_members(),
        id if (class_id::THROWABLE..=class_id::ARITY).contains(&id) => exception_members(id),
        _ => Vec::new(),
    }
}

/// Register every built-in class
pub fn install(classes: &ClassTable) {
    for (id, name, supers) in class_id::BUILTINS {
        classes.insert(Class {
            id: *id,
            name: Arc::from(*name),
            supers: supers.to_vec(),
            members: members_for(*id),
            deftype: None,
        });
    }
}

// ========== Reflective calls ==========

fn accepts(classes: &ClassTable, param: &HostType, value: &Value) -> bool {
    match (param, value) {
        (HostType::Object, _) => true,
        (HostType::Prim(Prim::Long | Prim::Int), Value::Long(_)) => true,
        (HostType::Prim(Prim::Double | Prim::Float), Value::Double(_) | Value::Long(_)) => true,
        (HostType::Prim(Prim::Bool), Value::Bool(_)) => true,
        (HostType::Class(_), Value::Nil) => true,
        (HostType::Class(name), v) => classes
            .lookup(name)
            .map(|c| classes.is_subclass(v.type_id(), c.id))
            .unwrap_or(false),
        _ => false,
    }
}

fn to_slot(param: &HostType, value: Value) -> Result<Slot> {
    match param.prim() {
        Some(p) => Slot::unbox(value, p),
        None => Ok(Slot::Obj(value)),
    }
}

fn result_value(member: &HostMember, slot: Slot) -> Value {
    match member.ret {
        HostType::Void => Value::Nil,
        _ => slot.into_value(),
    }
}

impl Runtime {
    fn call_matching(
        &self,
        candidates: Vec<HostMember>,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Option<Result<Value>> {
        let chosen = candidates.into_iter().find(|m| {
            m.params.len() == args.len()
                && m.params
                    .iter()
                    .zip(args.iter())
                    .all(|(p, a)| accepts(&self.classes, p, a))
        })?;
        let run = || {
            let mut slots = Vec::with_capacity(args.len() + 1);
            if let Some(r) = receiver {
                slots.push(Slot::Obj(r));
            }
            for (p, a) in chosen.params.iter().zip(args) {
                slots.push(to_slot(p, a)?);
            }
            let out = (chosen.func)(self, &slots)?;
            Ok(result_value(&chosen, out))
        };
        Some(run())
    }

    /// `(. target name args...)` with an unknown target class
    pub fn invoke_method_reflective(&self, target: Value, name: &str, args: Vec<Value>) -> Result<Value> {
        if target.is_nil() {
            return Err(Thrown::new(
                class_id::NULL_POINTER,
                format!("Cannot invoke method {} on nil", name),
            ));
        }
        if let Value::Instance(inst) = &target {
            if args.is_empty() {
                if let Some(i) = inst.ty.field_index(name) {
                    return Ok(inst.fields.lock()[i].to_value());
                }
            }
            if let Some(unit) = inst.ty.methods.read().clone() {
                if let Some(code) = unit
                    .unit
                    .methods
                    .iter()
                    .find(|m| m.name == name && m.accepts(args.len()))
                {
                    return self.execute_method(&unit, code, &target, args);
                }
            }
        }
        let class = self
            .classes
            .get(target.type_id())
            .ok_or_else(|| Thrown::illegal_argument(format!("No class for {}", target.class_name())))?;
        let argc = args.len();
        let candidates = self.classes.find_members(&class, HostKind::Method, name);
        self.call_matching(candidates, Some(target.clone()), args)
            .unwrap_or_else(|| {
                Err(Thrown::illegal_argument(format!(
                    "No matching method {} found taking {} args for class {}",
                    name,
                    argc,
                    target.class_name()
                )))
            })
    }

    /// `(Class/member args...)` when no overload could be chosen statically
    pub fn invoke_static_reflective(&self, class: &str, name: &str, args: Vec<Value>) -> Result<Value> {
        let c = self
            .classes
            .lookup(class)
            .ok_or_else(|| Thrown::illegal_argument(format!("Unable to resolve classname: {}", class)))?;
        if args.is_empty() {
            if let Some(field) = c.members(HostKind::StaticField, name).next() {
                let out = (field.func)(self, &[])?;
                return Ok(out.into_value());
            }
        }
        let candidates = self.classes.find_members(&c, HostKind::StaticMethod, name);
        self.call_matching(candidates, None, args).unwrap_or_else(|| {
            Err(Thrown::illegal_argument(format!(
                "No matching method {} found for class {}",
                name, class
            )))
        })
    }

    /// `(. target -field)` or a zero-argument method with an unknown target class
    pub fn get_field_reflective(&self, target: Value, name: &str) -> Result<Value> {
        let field = name.strip_prefix('-').unwrap_or(name);
        if let Value::Instance(inst) = &target {
            if let Some(i) = inst.ty.field_index(field) {
                return Ok(inst.fields.lock()[i].to_value());
            }
        }
        if field != name {
            return Err(Thrown::illegal_argument(format!(
                "No matching field found: {} for class {}",
                field,
                target.class_name()
            )));
        }
        self.invoke_method_reflective(target, name, Vec::new())
    }

    /// `(new Class args...)` resolved at run time
    pub fn construct_reflective(&self, class: u32, args: Vec<Value>) -> Result<Value> {
        let c = self
            .classes
            .get(class)
            .ok_or_else(|| Thrown::illegal_argument(format!("No class with id {}", class)))?;
        if let Some(def) = &c.deftype {
            if args.len() != def.fields.len() {
                return Err(Thrown::illegal_argument(format!(
                    "No matching ctor found for class {}",
                    c.name
                )));
            }
            let mut slots = Vec::with_capacity(args.len());
            for (field, arg) in def.fields.iter().zip(args) {
                slots.push(match field.prim {
                    Some(p) => Slot::unbox(arg, p)?,
                    None => Slot::Obj(arg),
                });
            }
            return Ok(Value::Instance(Arc::new(Instance {
                ty: def.clone(),
                fields: Mutex::new(slots),
            })));
        }
        let candidates = self.classes.find_members(&c, HostKind::Constructor, "new");
        self.call_matching(candidates, None, args).unwrap_or_else(|| {
            Err(Thrown::illegal_argument(format!(
                "No matching ctor found for class {}",
                c.name
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(classes: &ClassTable, class: &str, kind: HostKind, name: &str, params: &[HostType]) -> HostMember {
        let c = classes.lookup(class).unwrap();
        classes
            .find_members(&c, kind, name)
            .into_iter()
            .find(|m| m.params == params)
            .unwrap()
    }

    #[test]
    fn test_numbers_overloads_are_registered() {
        let classes = ClassTable::new();
        install(&classes);
        let numbers = classes.lookup("Numbers").unwrap();
        assert_eq!(numbers.members(HostKind::StaticMethod, "add").count(), 3);
        assert_eq!(numbers.members(HostKind::StaticMethod, "lt").count(), 3);
    }

    #[test]
    fn test_string_inherits_object_methods() {
        let classes = ClassTable::new();
        install(&classes);
        let m = find(&classes, "String", HostKind::Method, "hashCode", &[]);
        assert_eq!(m.ret, I);
    }

    #[test]
    fn test_accepts_widens_numbers() {
        let classes = ClassTable::new();
        install(&classes);
        assert!(accepts(&classes, &D, &Value::Long(1)));
        assert!(!accepts(&classes, &L, &Value::Double(1.0)));
        assert!(accepts(&classes, &class("Number"), &Value::Long(1)));
        assert!(!accepts(&classes, &class("String"), &Value::Long(1)));
    }
}
