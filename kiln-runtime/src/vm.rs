//! Stack machine interpreter
//!
//! Each method activation gets its own locals and operand stack. Exceptions
//! are Rust `Err` values; when one escapes an instruction the method's
//! handler table is searched in order, and a matching handler resumes with
//! an operand stack holding only the exception.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kir_core::{Label, MethodCode, Op};
use log::trace;
use parking_lot::Mutex;

use crate::classes::class_id;
use crate::coll;
use crate::error::{Result, Thrown};
use crate::loader::LoadedUnit;
use crate::namespace::Var;
use crate::protocol::{Dispatcher, DispatcherTable, ProtocolMethod};
use crate::runtime::Runtime;
use crate::value::{Closure, NativeKind, Slot, Value};

/// Nesting limit for VM calls on one thread, whatever the frame size
const MAX_CALL_DEPTH: usize = 100_000;

thread_local! {
    /// (call depth, stack address at the outermost call)
    static CALLS: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
}

/// Counts one VM activation on this thread until dropped
struct CallGuard;

impl CallGuard {
    fn enter(budget: usize) -> Result<CallGuard> {
        let marker = 0u8;
        let here = std::hint::black_box(std::ptr::addr_of!(marker)) as usize;
        CALLS.with(|calls| {
            let (depth, base) = calls.get();
            let base = if depth == 0 { here } else { base };
            if depth >= MAX_CALL_DEPTH || base.saturating_sub(here) > budget {
                return Err(Thrown::new(
                    class_id::STACK_OVERFLOW,
                    format!("Call stack exhausted at depth {}", depth),
                ));
            }
            calls.set((depth + 1, base));
            Ok(CallGuard)
        })
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        CALLS.with(|calls| {
            let (depth, base) = calls.get();
            calls.set((depth.saturating_sub(1), base));
        });
    }
}

struct Frame<'a> {
    unit: &'a Arc<LoadedUnit>,
    code: &'a MethodCode,
    this: &'a Value,
    locals: Vec<Slot>,
    stack: Vec<Slot>,
}

fn internal(message: &str) -> Thrown {
    Thrown::illegal_state(format!("internal VM error: {}", message))
}

impl<'a> Frame<'a> {
    fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    fn push_value(&mut self, value: Value) {
        self.stack.push(Slot::Obj(value));
    }

    fn pop(&mut self) -> Result<Slot> {
        self.stack.pop().ok_or_else(|| internal("stack underflow"))
    }

    fn pop_value(&mut self) -> Result<Value> {
        Ok(self.pop()?.into_value())
    }

    /// Pop `n` slots, returned in push order
    fn pop_n(&mut self, n: usize) -> Result<Vec<Slot>> {
        if self.stack.len() < n {
            return Err(internal("stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn pop_values(&mut self, n: usize) -> Result<Vec<Value>> {
        Ok(self.pop_n(n)?.into_iter().map(Slot::into_value).collect())
    }

    fn local(&mut self, slot: u16) -> Result<&mut Slot> {
        self.locals
            .get_mut(slot as usize)
            .ok_or_else(|| internal("local out of range"))
    }

    fn constant(&self, index: u32) -> Result<&'a Value> {
        self.unit
            .constants
            .get(index as usize)
            .ok_or_else(|| internal("constant out of range"))
    }

    fn var(&self, index: u32) -> Result<&'a Arc<Var>> {
        match self.constant(index)? {
            Value::Var(v) => Ok(v),
            _ => Err(internal("constant is not a var")),
        }
    }

    fn class(&self, index: u32) -> Result<(u32, &'a str)> {
        match self.constant(index)? {
            Value::Type(t) => Ok((t.id, &t.name)),
            _ => Err(internal("constant is not a class")),
        }
    }

    fn name(&self, index: u32) -> Result<&'a str> {
        self.constant(index)?
            .as_str()
            .ok_or_else(|| internal("constant is not a member name"))
    }

    fn fields(&self) -> Result<&'a Mutex<Vec<Slot>>> {
        match self.this {
            Value::Fn(c) => Ok(&c.fields),
            Value::Instance(i) => Ok(&i.fields),
            _ => Err(internal("no fields on this")),
        }
    }

    fn target(&self, label: Label) -> Result<usize> {
        self.code
            .label_pc(label)
            .ok_or_else(|| internal("unbound label"))
    }
}

impl Runtime {
    /// Call any invokable value
    pub fn invoke(&self, f: &Value, args: Vec<Value>) -> Result<Value> {
        match f {
            Value::Fn(c) => match c.unit.unit.method_for(args.len()) {
                Some(code) => self.execute_method(&c.unit, code, f, args),
                None => Err(Thrown::arity(args.len(), c.name())),
            },
            Value::Native(n) => match n.kind {
                NativeKind::Fn(func) => func(self, &args),
                NativeKind::Macro(_) => Err(Thrown::illegal_state(format!(
                    "Can't take value of a macro: {}",
                    n.name
                ))),
            },
            Value::Var(v) => self.invoke(&v.get()?, args),
            Value::Keyword(_) | Value::Map(_) | Value::Set(_) => match args.as_slice() {
                [coll] => Ok(lookup(f, coll, Value::Nil)),
                [coll, default] => Ok(lookup(f, coll, default.clone())),
                _ => Err(Thrown::arity(args.len(), &f.to_string())),
            },
            Value::Vector(_) => match args.as_slice() {
                [Value::Long(i)] => coll::nth(f, *i, None),
                [other] => Err(Thrown::illegal_argument(format!(
                    "Key must be integer, got {}",
                    other.class_name()
                ))),
                _ => Err(Thrown::arity(args.len(), "vector")),
            },
            Value::ProtocolMethod(m) => self.call_protocol_method(m, args),
            other => Err(Thrown::class_cast(other, "IFn")),
        }
    }

    /// Uncached protocol dispatch, used when a protocol method is called
    /// as a value
    pub fn call_protocol_method(&self, method: &ProtocolMethod, args: Vec<Value>) -> Result<Value> {
        let target = args
            .first()
            .cloned()
            .ok_or_else(|| Thrown::arity(0, &method.name))?;
        let d = method
            .protocol
            .find(&method.name, target.type_id(), &self.classes)
            .ok_or_else(|| method.protocol.missing(&method.name, &target))?;
        self.run_dispatcher(d, &method.name, args)
    }

    fn run_dispatcher(&self, id: u32, method: &str, mut args: Vec<Value>) -> Result<Value> {
        let dispatcher = self
            .dispatchers
            .get(id)
            .ok_or_else(|| internal("unknown dispatcher"))?;
        match dispatcher.as_ref() {
            Dispatcher::Fn(f) => self.invoke(f, args),
            Dispatcher::Method { unit, name } => {
                let this = if args.is_empty() {
                    Value::Nil
                } else {
                    args.remove(0)
                };
                let code = unit
                    .unit
                    .methods
                    .iter()
                    .find(|m| m.name == **name && m.accepts(args.len()))
                    .ok_or_else(|| Thrown::arity(args.len() + 1, method))?;
                self.execute_method(unit, code, &this, args)
            }
            Dispatcher::Field(i) => match args.first() {
                Some(Value::Instance(inst)) => Ok(inst.fields.lock()[*i as usize].to_value()),
                _ => Err(internal("field dispatch on a non-instance")),
            },
            Dispatcher::Lookup => Err(internal("lookup dispatcher on a protocol site")),
        }
    }

    /// Run one method body. `args` excludes `this`.
    pub(crate) fn execute_method(
        &self,
        unit: &Arc<LoadedUnit>,
        code: &MethodCode,
        this: &Value,
        args: Vec<Value>,
    ) -> Result<Value> {
        if !code.accepts(args.len()) {
            return Err(Thrown::arity(args.len(), unit.name()));
        }
        let _guard = CallGuard::enter(self.stack_budget())?;
        let fixed = code.arity as usize;
        let needed = fixed + 1 + usize::from(code.variadic);
        let mut locals = vec![Slot::default(); (code.max_locals as usize).max(needed)];
        locals[0] = Slot::Obj(this.clone());
        let mut args = args.into_iter();
        for (i, arg) in args.by_ref().take(fixed).enumerate() {
            locals[i + 1] = match code.params.get(i).copied().flatten() {
                Some(p) => Slot::unbox(arg, p)?,
                None => Slot::Obj(arg),
            };
        }
        if code.variadic {
            let rest: Vec<Value> = args.collect();
            locals[fixed + 1] = Slot::Obj(if rest.is_empty() {
                Value::Nil
            } else {
                Value::list(rest)
            });
        }

        let mut frame = Frame {
            unit,
            code,
            this,
            locals,
            stack: Vec::with_capacity(8),
        };
        let mut pc = 0usize;
        loop {
            let at = pc;
            let op = code
                .code
                .get(pc)
                .ok_or_else(|| internal("control fell off the end"))?;
            pc += 1;
            match self.step(&mut frame, op, &mut pc) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(thrown) => match self.find_handler(code, at, &thrown) {
                    Some(target) => {
                        trace!("{}: handler at {} caught {}", unit.name(), target, thrown);
                        frame.stack.clear();
                        frame.push_value(thrown.0);
                        pc = target;
                    }
                    None => return Err(thrown),
                },
            }
        }
    }

    fn find_handler(&self, code: &MethodCode, pc: usize, thrown: &Thrown) -> Option<usize> {
        code.handlers.iter().find_map(|h| {
            let start = code.label_pc(h.start)?;
            let end = code.label_pc(h.end)?;
            if pc < start || pc >= end {
                return None;
            }
            let matches = match &h.catch {
                None => true,
                Some(class) => self
                    .classes
                    .lookup(class)
                    .map(|c| self.is_instance(&thrown.0, c.id))
                    .unwrap_or(false),
            };
            if matches {
                code.label_pc(h.target)
            } else {
                None
            }
        })
    }

    fn step(&self, frame: &mut Frame<'_>, op: &Op, pc: &mut usize) -> Result<Option<Value>> {
        match op {
            Op::Const(i) => {
                let v = frame.constant(*i)?.clone();
                frame.push_value(v);
            }
            Op::Nil => frame.push_value(Value::Nil),
            Op::PushBool(b) => frame.push(Slot::Bool(*b)),
            Op::PushLong(n) => frame.push(Slot::Long(*n)),
            Op::PushDouble(d) => frame.push(Slot::Double(*d)),
            Op::PushInt(n) => frame.push(Slot::Int(*n)),
            Op::Pop => {
                frame.pop()?;
            }
            Op::Dup => {
                let top = frame.pop()?;
                frame.push(top.clone());
                frame.push(top);
            }
            Op::Box(_) => {
                let v = frame.pop_value()?;
                frame.push_value(v);
            }
            Op::Unbox(p) => {
                let v = frame.pop_value()?;
                frame.push(Slot::unbox(v, *p)?);
            }
            Op::Convert { to, .. } => {
                let s = frame.pop()?;
                frame.push(s.convert(*to)?);
            }
            Op::Load(slot) => {
                let s = frame.local(*slot)?.clone();
                frame.push(s);
            }
            Op::LoadClear(slot) => {
                let s = std::mem::take(frame.local(*slot)?);
                frame.push(s);
            }
            Op::Store(slot) => {
                let s = frame.pop()?;
                *frame.local(*slot)? = s;
            }
            Op::Clear(slot) => {
                *frame.local(*slot)? = Slot::default();
            }
            Op::LoadThis => {
                let this = frame.this.clone();
                frame.push_value(this);
            }
            Op::LoadField(i) => {
                let s = frame.fields()?.lock()[*i as usize].clone();
                frame.push(s);
            }
            Op::LoadFieldClear(i) => {
                let s = std::mem::take(&mut frame.fields()?.lock()[*i as usize]);
                frame.push(s);
            }
            Op::StoreField(i) => {
                let s = frame.pop()?;
                frame.fields()?.lock()[*i as usize] = s;
            }
            Op::InitField(i) => {
                let s = frame.pop()?;
                match frame.pop_value()? {
                    Value::Fn(c) => match c.fields.lock().get_mut(*i as usize) {
                        Some(field) => *field = s,
                        None => return Err(internal("field out of range")),
                    },
                    _ => return Err(internal("field init on a non-closure")),
                }
            }
            Op::VarGet(i) => {
                let v = frame.var(*i)?.get()?;
                frame.push_value(v);
            }
            Op::VarSet(i) => {
                let v = frame.pop_value()?;
                let v = frame.var(*i)?.set(v)?;
                frame.push_value(v);
            }
            Op::VarDef { var, init, meta } => {
                let var = frame.var(*var)?.clone();
                if let Some(meta) = meta {
                    var.set_meta(frame.constant(*meta)?);
                }
                if *init {
                    let v = frame.pop_value()?;
                    var.bind_root(v);
                }
                frame.push_value(Value::Var(var));
            }
            Op::Jump(l) => *pc = frame.target(*l)?,
            Op::JumpIfFalsy(l) => {
                if !frame.pop_value()?.is_truthy() {
                    *pc = frame.target(*l)?;
                }
            }
            Op::JumpIfFalse(l) => {
                let s = frame.pop()?;
                let b = s
                    .as_bool()
                    .ok_or_else(|| Thrown::class_cast(&s.to_value(), "Boolean"))?;
                if !b {
                    *pc = frame.target(*l)?;
                }
            }
            Op::JumpIfNotEquiv(l) => {
                let b = frame.pop_value()?;
                let a = frame.pop_value()?;
                if !a.equiv(&b) {
                    *pc = frame.target(*l)?;
                }
            }
            Op::JumpIfNotIdentical(l) => {
                let b = frame.pop_value()?;
                let a = frame.pop_value()?;
                if !a.identical(&b) {
                    *pc = frame.target(*l)?;
                }
            }
            Op::Hash => {
                let v = frame.pop_value()?;
                frame.push(Slot::Int(v.hasheq()));
            }
            Op::ShiftMask { shift, mask } => {
                let s = frame.pop()?;
                let h = s.as_int().ok_or_else(|| internal("shift-mask on non-int"))?;
                frame.push(Slot::Int((h >> shift) & (*mask as i32)));
            }
            Op::TableSwitch {
                low,
                targets,
                default,
            } => {
                let s = frame.pop()?;
                let k = s.as_int().ok_or_else(|| internal("switch on non-int"))?;
                let label = usize::try_from(k as i64 - *low as i64)
                    .ok()
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                *pc = frame.target(*label)?;
            }
            Op::LookupSwitch {
                keys,
                targets,
                default,
            } => {
                let s = frame.pop()?;
                let k = s.as_int().ok_or_else(|| internal("switch on non-int"))?;
                let label = keys
                    .iter()
                    .position(|key| *key == k)
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                *pc = frame.target(*label)?;
            }
            Op::Invoke(argc) => {
                let args = frame.pop_values(*argc as usize)?;
                let f = frame.pop_value()?;
                let v = self.invoke(&f, args)?;
                frame.push_value(v);
            }
            Op::InvokeStatic { method, argc } => {
                let member = host_member(frame, *method)?;
                let args = frame.pop_n(*argc as usize)?;
                let out = (member.func)(self, &args)?;
                frame.push(host_result(member, out));
            }
            Op::InvokeVirtual { method, argc } => {
                let member = host_member(frame, *method)?;
                let args = frame.pop_n(*argc as usize + 1)?;
                if matches!(args.first(), Some(Slot::Obj(Value::Nil))) {
                    return Err(Thrown::new(
                        class_id::NULL_POINTER,
                        format!("Cannot invoke method {} on nil", member.name),
                    ));
                }
                let out = (member.func)(self, &args)?;
                frame.push(host_result(member, out));
            }
            Op::InvokeReflective { member, argc } => {
                let name = frame.name(*member)?;
                let args = frame.pop_values(*argc as usize)?;
                let target = frame.pop_value()?;
                let v = self.invoke_method_reflective(target, name, args)?;
                frame.push_value(v);
            }
            Op::InvokeStaticReflective {
                class,
                member,
                argc,
            } => {
                let (_, class) = frame.class(*class)?;
                let name = frame.name(*member)?;
                let args = frame.pop_values(*argc as usize)?;
                let v = self.invoke_static_reflective(class, name, args)?;
                frame.push_value(v);
            }
            Op::GetStatic(i) => {
                let member = host_member(frame, *i)?;
                let out = (member.func)(self, &[])?;
                frame.push(host_result(member, out));
            }
            Op::GetField { ty, index } => {
                let (id, name) = frame.class(*ty)?;
                let target = frame.pop_value()?;
                let slot = match &target {
                    Value::Instance(inst) if inst.ty.id == id => {
                        inst.fields.lock()[*index as usize].clone()
                    }
                    other => return Err(Thrown::class_cast(other, name)),
                };
                frame.push(slot);
            }
            Op::GetFieldReflective(i) => {
                let name = frame.name(*i)?;
                let target = frame.pop_value()?;
                let v = self.get_field_reflective(target, name)?;
                frame.push_value(v);
            }
            Op::New { ctor, argc } => {
                let member = host_member(frame, *ctor)?;
                let args = frame.pop_n(*argc as usize)?;
                let out = (member.func)(self, &args)?;
                frame.push(out);
            }
            Op::NewReflective { class, argc } | Op::NewInstance { ty: class, argc } => {
                let (id, _) = frame.class(*class)?;
                let args = frame.pop_values(*argc as usize)?;
                let v = self.construct_reflective(id, args)?;
                frame.push_value(v);
            }
            Op::NewFn { unit, captured } => {
                let child = frame
                    .unit
                    .children
                    .get(*unit as usize)
                    .ok_or_else(|| internal("unit out of range"))?
                    .clone();
                let fields = frame.pop_n(*captured as usize)?;
                frame.push_value(Value::Fn(Arc::new(Closure {
                    unit: child,
                    fields: Mutex::new(fields),
                })));
            }
            Op::KeywordInvoke { site } => {
                let target = frame.pop_value()?;
                let v = self.keyword_invoke(frame.unit, *site, target)?;
                frame.push_value(v);
            }
            Op::ProtocolInvoke { site, argc } => {
                let args = frame.pop_values(*argc as usize)?;
                let v = self.protocol_invoke(frame.unit, *site, args)?;
                frame.push_value(v);
            }
            Op::InstanceOf(i) => {
                let (id, _) = frame.class(*i)?;
                let v = frame.pop_value()?;
                frame.push(Slot::Bool(self.is_instance(&v, id)));
            }
            Op::MakeVector(n) => {
                let items = frame.pop_values(*n as usize)?;
                frame.push_value(Value::vector(items));
            }
            Op::MakeMap(n) => {
                let items = frame.pop_values(*n as usize * 2)?;
                let mut pairs = items.into_iter();
                let mut map = indexmap::IndexMap::with_capacity(*n as usize);
                while let (Some(k), Some(v)) = (pairs.next(), pairs.next()) {
                    map.insert(k, v);
                }
                frame.push_value(Value::Map(Arc::new(map)));
            }
            Op::MakeSet(n) => {
                let items = frame.pop_values(*n as usize)?;
                frame.push_value(Value::Set(Arc::new(items.into_iter().collect())));
            }
            Op::Throw => {
                let v = frame.pop_value()?;
                return Err(match v {
                    Value::Exception(_) => Thrown(v),
                    other => Thrown::class_cast(&other, "Throwable"),
                });
            }
            Op::Return => return Ok(Some(frame.pop_value()?)),
        }
        Ok(None)
    }

    fn keyword_invoke(&self, unit: &LoadedUnit, site: u32, target: Value) -> Result<Value> {
        let cell = unit
            .keyword_sites
            .get(site as usize)
            .ok_or_else(|| internal("keyword site out of range"))?;
        let type_id = target.type_id();
        let d = match cell.cache.lookup(type_id) {
            Some(d) => d,
            None => {
                let d = match &target {
                    Value::Instance(inst) if cell.keyword.ns().is_none() => {
                        match inst.ty.field_index(cell.keyword.name()) {
                            Some(i) => self.dispatchers.field(type_id, i as u16),
                            None => DispatcherTable::LOOKUP,
                        }
                    }
                    _ => DispatcherTable::LOOKUP,
                };
                cell.cache.install(type_id, d);
                d
            }
        };
        if d != DispatcherTable::LOOKUP {
            if let (Some(Dispatcher::Field(i)), Value::Instance(inst)) =
                (self.dispatchers.get(d).as_deref(), &target)
            {
                return Ok(inst.fields.lock()[*i as usize].to_value());
            }
        }
        Ok(coll::get(&target, &Value::Keyword(cell.keyword.clone()), Value::Nil))
    }

    fn protocol_invoke(&self, unit: &LoadedUnit, site: u32, args: Vec<Value>) -> Result<Value> {
        let cell = unit
            .protocol_sites
            .get(site as usize)
            .ok_or_else(|| internal("protocol site out of range"))?;
        let method = &cell.method;
        let target = args.first().cloned().unwrap_or(Value::Nil);
        let type_id = target.type_id();
        let generation = method.protocol.generation();
        if cell.generation.swap(generation, Ordering::Relaxed) != generation {
            cell.cache.invalidate();
        }
        let d = match cell.cache.lookup(type_id) {
            Some(d) => d,
            None => {
                let d = method
                    .protocol
                    .find(&method.name, type_id, &self.classes)
                    .ok_or_else(|| method.protocol.missing(&method.name, &target))?;
                cell.cache.install(type_id, d);
                d
            }
        };
        self.run_dispatcher(d, &method.name, args)
    }
}

fn lookup(f: &Value, coll: &Value, default: Value) -> Value {
    match f {
        Value::Keyword(_) => coll::get(coll, f, default),
        _ => coll::get(f, coll, default),
    }
}

fn host_member<'a>(frame: &Frame<'a>, index: u32) -> Result<&'a crate::classes::HostMember> {
    frame
        .unit
        .hosts
        .get(index as usize)
        .and_then(Option::as_ref)
        .ok_or_else(|| internal("constant is not a host member"))
}

fn host_result(member: &crate::classes::HostMember, out: Slot) -> Slot {
    match member.ret {
        kir_core::HostType::Void => Slot::Obj(Value::Nil),
        _ => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdn::{Form, Keyword, Symbol};
    use kir_core::{
        Capture, Constant, HostKind, HostRef, HostType, KeywordSite, MethodBuilder, Prim,
        ProtocolSite, Unit, UnitKind,
    };

    use crate::cache::CacheStats;
    use crate::classes::class_id;
    use crate::protocol::Protocol;
    use crate::runtime::USER_NS;

    fn unit(methods: Vec<MethodCode>, constants: Vec<Constant>) -> Unit {
        Unit {
            name: "test$fn".to_string(),
            kind: UnitKind::Fn { once: false },
            methods,
            closed_over: Vec::new(),
            constants,
            keyword_sites: Vec::new(),
            protocol_sites: Vec::new(),
            children: Vec::new(),
        }
    }

    fn run(rt: &Runtime, unit: Unit, args: Vec<Value>) -> Result<Value> {
        let loaded = rt.load(Arc::new(unit)).unwrap();
        rt.invoke(&rt.instantiate(&loaded), args)
    }

    #[test]
    fn test_handler_catches_by_class() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        let (start, end, target) = (b.new_label(), b.new_label(), b.new_label());
        b.mark(start);
        b.emit(Op::Nil);
        b.emit(Op::Throw);
        b.mark(end);
        b.mark(target);
        b.emit(Op::Return);
        b.handler(start, end, target, Some("ClassCastException".to_string()));

        let rt = Runtime::new();
        let caught = run(&rt, unit(vec![b.finish()], Vec::new()), Vec::new()).unwrap();
        assert_eq!(caught.type_id(), class_id::CLASS_CAST);
    }

    #[test]
    fn test_unmatched_handler_propagates() {
        let mut b = MethodBuilder::new("invoke", 0, false);
        let (start, end, target) = (b.new_label(), b.new_label(), b.new_label());
        b.mark(start);
        b.emit(Op::PushLong(1));
        b.emit(Op::Throw);
        b.mark(end);
        b.mark(target);
        b.emit(Op::Return);
        b.handler(start, end, target, Some("ArithmeticException".to_string()));

        let rt = Runtime::new();
        let err = run(&rt, unit(vec![b.finish()], Vec::new()), Vec::new()).unwrap_err();
        assert_eq!(err.class(), class_id::CLASS_CAST);
    }

    #[test]
    fn test_variadic_rest_arg() {
        let mut b = MethodBuilder::new("invoke", 1, true);
        b.emit(Op::Load(2));
        b.emit(Op::Return);
        let u = unit(vec![b.finish()], Vec::new());

        let rt = Runtime::new();
        let loaded = rt.load(Arc::new(u)).unwrap();
        let f = rt.instantiate(&loaded);
        assert!(rt.invoke(&f, vec![Value::Long(1)]).unwrap().is_nil());
        let rest = rt
            .invoke(&f, vec![Value::Long(1), Value::Long(2), Value::Long(3)])
            .unwrap();
        assert_eq!(rest.to_string(), "(2 3)");
        let err = rt.invoke(&f, Vec::new()).unwrap_err();
        assert_eq!(err.class(), class_id::ARITY);
    }

    #[test]
    fn test_load_clear_releases_slot() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        b.emit(Op::LoadClear(1));
        b.emit(Op::Pop);
        b.emit(Op::Load(1));
        b.emit(Op::Return);

        let rt = Runtime::new();
        let v = run(&rt, unit(vec![b.finish()], Vec::new()), vec![Value::string("held")]).unwrap();
        assert!(v.is_nil());
    }

    #[test]
    fn test_new_fn_captures_fields() {
        let mut inner = MethodBuilder::new("invoke", 0, false);
        inner.emit(Op::LoadField(0));
        inner.emit(Op::Return);
        let mut child = unit(vec![inner.finish()], Vec::new());
        child.closed_over.push(Capture {
            name: "x".to_string(),
            prim: None,
            mutable: false,
        });

        let mut outer = MethodBuilder::new("invoke", 1, false);
        outer.emit(Op::Load(1));
        outer.emit(Op::NewFn { unit: 0, captured: 1 });
        outer.emit(Op::Return);
        let mut parent = unit(vec![outer.finish()], Vec::new());
        parent.children.push(Arc::new(child));

        let rt = Runtime::new();
        let closure = run(&rt, parent, vec![Value::keyword("seen")]).unwrap();
        let v = rt.invoke(&closure, Vec::new()).unwrap();
        assert_eq!(v, Value::keyword("seen"));
    }

    #[test]
    fn test_static_host_call_on_primitives() {
        let mut b = MethodBuilder::new("invoke", 1, false)
            .with_signature(vec![Some(Prim::Long)], Some(Prim::Long));
        b.emit(Op::Load(1));
        b.emit(Op::InvokeStatic { method: 0, argc: 1 });
        b.emit(Op::Box(Prim::Long));
        b.emit(Op::Return);
        let inc = Constant::Host(HostRef {
            class: "Numbers".to_string(),
            member: "inc".to_string(),
            kind: HostKind::StaticMethod,
            params: vec![HostType::Prim(Prim::Long)],
            ret: HostType::Prim(Prim::Long),
        });

        let rt = Runtime::new();
        let v = run(&rt, unit(vec![b.finish()], vec![inc]), vec![Value::Long(41)]).unwrap();
        assert_eq!(v.as_long(), Some(42));
    }

    #[test]
    fn test_keyword_site_caches_by_type() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        b.emit(Op::Load(1));
        b.emit(Op::KeywordInvoke { site: 0 });
        b.emit(Op::Return);
        let mut u = unit(vec![b.finish()], Vec::new());
        u.keyword_sites.push(KeywordSite {
            keyword: Keyword::new("a"),
        });

        let rt = Runtime::new();
        let loaded = rt.load(Arc::new(u)).unwrap();
        let f = rt.instantiate(&loaded);
        let m1 = Value::map([(Value::keyword("a"), Value::Long(1))]);
        let m2 = Value::map([(Value::keyword("a"), Value::Long(2))]);
        let v = Value::vector(vec![Value::Long(1)]);

        assert_eq!(rt.invoke(&f, vec![m1]).unwrap().as_long(), Some(1));
        assert_eq!(rt.invoke(&f, vec![m2]).unwrap().as_long(), Some(2));
        assert!(rt.invoke(&f, vec![v]).unwrap().is_nil());
        assert_eq!(
            loaded.keyword_sites[0].cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                updates: 2
            }
        );
    }

    #[test]
    fn test_keyword_site_alternating_types_stays_correct() {
        let mut b = MethodBuilder::new("invoke", 1, false);
        b.emit(Op::Load(1));
        b.emit(Op::KeywordInvoke { site: 0 });
        b.emit(Op::Return);
        let mut u = unit(vec![b.finish()], Vec::new());
        u.keyword_sites.push(KeywordSite {
            keyword: Keyword::new("a"),
        });

        let rt = Runtime::new();
        let loaded = rt.load(Arc::new(u)).unwrap();
        let f = rt.instantiate(&loaded);
        let map = Value::map([(Value::keyword("a"), Value::Long(1))]);
        let set = Value::Set(Arc::new([Value::keyword("a")].into_iter().collect()));

        assert_eq!(rt.invoke(&f, vec![map.clone()]).unwrap().as_long(), Some(1));
        assert_eq!(rt.invoke(&f, vec![set]).unwrap(), Value::keyword("a"));
        assert_eq!(rt.invoke(&f, vec![map]).unwrap().as_long(), Some(1));
        assert_eq!(
            loaded.keyword_sites[0].cache.stats(),
            CacheStats {
                hits: 0,
                misses: 3,
                updates: 3
            }
        );
    }

    /// A one-argument fn returning `kw`
    fn answer(rt: &Runtime, kw: &str) -> Value {
        let mut b = MethodBuilder::new("invoke", 1, false);
        b.emit(Op::Const(0));
        b.emit(Op::Return);
        let u = unit(vec![b.finish()], vec![Constant::Form(Form::keyword(kw))]);
        let loaded = rt.load(Arc::new(u)).unwrap();
        rt.instantiate(&loaded)
    }

    fn extend(rt: &Runtime, protocol: &Protocol, type_id: u32, kw: &str) {
        let d = rt.dispatchers.register(Dispatcher::Fn(answer(rt, kw)));
        protocol.register("pm", type_id, d);
    }

    /// Protocol `P` with method `pm`, and a loaded fn calling `pm` on
    /// its argument through one protocol site
    fn protocol_caller(rt: &Runtime) -> (Arc<Protocol>, Arc<LoadedUnit>) {
        let protocol = Arc::new(Protocol::new(
            Symbol::qualified(USER_NS, "P"),
            vec![Arc::from("pm")],
        ));
        rt.intern(USER_NS, "pm")
            .bind_root(Value::ProtocolMethod(Arc::new(ProtocolMethod {
                protocol: protocol.clone(),
                name: Arc::from("pm"),
            })));

        let mut b = MethodBuilder::new("invoke", 1, false);
        b.emit(Op::Load(1));
        b.emit(Op::ProtocolInvoke { site: 0, argc: 1 });
        b.emit(Op::Return);
        let mut u = unit(vec![b.finish()], Vec::new());
        u.protocol_sites.push(ProtocolSite {
            method_var: Symbol::qualified(USER_NS, "pm"),
        });
        (protocol, rt.load(Arc::new(u)).unwrap())
    }

    #[test]
    fn test_protocol_site_alternating_types_stays_correct() {
        let rt = Runtime::new();
        let (protocol, loaded) = protocol_caller(&rt);
        extend(&rt, &protocol, class_id::LONG, "long");
        extend(&rt, &protocol, class_id::STRING, "string");
        let f = rt.instantiate(&loaded);

        assert_eq!(rt.invoke(&f, vec![Value::Long(1)]).unwrap(), Value::keyword("long"));
        assert_eq!(rt.invoke(&f, vec![Value::string("s")]).unwrap(), Value::keyword("string"));
        assert_eq!(rt.invoke(&f, vec![Value::Long(2)]).unwrap(), Value::keyword("long"));
        assert_eq!(
            loaded.protocol_sites[0].cache.stats(),
            CacheStats {
                hits: 0,
                misses: 3,
                updates: 3
            }
        );
    }

    #[test]
    fn test_protocol_site_sees_reextension() {
        let rt = Runtime::new();
        let (protocol, loaded) = protocol_caller(&rt);
        extend(&rt, &protocol, class_id::LONG, "old");
        let f = rt.instantiate(&loaded);

        assert_eq!(rt.invoke(&f, vec![Value::Long(1)]).unwrap(), Value::keyword("old"));
        assert_eq!(rt.invoke(&f, vec![Value::Long(1)]).unwrap(), Value::keyword("old"));
        extend(&rt, &protocol, class_id::LONG, "new");
        assert_eq!(rt.invoke(&f, vec![Value::Long(1)]).unwrap(), Value::keyword("new"));
        assert_eq!(
            loaded.protocol_sites[0].cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                updates: 2
            }
        );
    }

    #[test]
    fn test_call_depth_is_bounded() {
        // a fn that calls itself through its var
        let rt = Runtime::new();
        let var = Symbol::qualified(USER_NS, "spin");
        let mut b = MethodBuilder::new("invoke", 0, false);
        b.emit(Op::VarGet(0));
        b.emit(Op::Invoke(0));
        b.emit(Op::Return);
        let loaded = rt
            .load(Arc::new(unit(vec![b.finish()], vec![Constant::Var(var)])))
            .unwrap();
        let f = rt.instantiate(&loaded);
        rt.intern(USER_NS, "spin").bind_root(f.clone());

        let err = rt.invoke(&f, Vec::new()).unwrap_err();
        assert_eq!(err.class(), class_id::STACK_OVERFLOW);
        assert!(rt.is_instance(&err.0, class_id::ERROR));
        CALLS.with(|calls| assert_eq!(calls.get().0, 0));
    }
}
