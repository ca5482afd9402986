//! Top-level driver
//!
//! [`Compiler`] owns a runtime and the options forms are compiled with.
//! Each top-level form is macroexpanded and then either evaluated
//! directly or compiled into a thunk that is loaded and called.

use std::path::Path;
use std::sync::Arc;

use kdn::{Form, Symbol};
use kir_core::Unit;
use kiln_runtime::{Runtime, Value, CORE_NS};
use log::debug;

use crate::analyze::analyze;
use crate::context::{CompileContext, Context, WARN_ON_REFLECTION};
use crate::error::{CompileError, Result, Warning};
use crate::eval::eval;
use crate::expr::Expr;
use crate::macroexpand::macroexpand;
use crate::options::CompileOptions;

pub struct Compiler {
    rt: Arc<Runtime>,
    options: CompileOptions,
    warnings: Vec<Warning>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self::with_runtime(Arc::new(Runtime::new()), options)
    }

    /// A compiler sharing an existing runtime
    pub fn with_runtime(rt: Arc<Runtime>, options: CompileOptions) -> Self {
        let var = rt.intern(CORE_NS, WARN_ON_REFLECTION);
        if !var.is_bound() {
            var.bind_root(Value::Bool(false));
        }
        var.set_dynamic(true);
        Self {
            rt,
            options,
            warnings: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.rt
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CompileOptions {
        &mut self.options
    }

    /// Warnings collected since the last call to [`Compiler::take_warnings`]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Evaluate one top-level form
    pub fn eval(&mut self, form: &Form) -> Result<Value> {
        let mut ctx = CompileContext::new(&self.rt, &self.options);
        ctx.set_position(form);
        let result = eval_top(&mut ctx, form);
        let (line, column) = (ctx.scope.line, ctx.scope.column);
        self.warnings.extend(ctx.take_warnings());
        result.map_err(|e| e.locate(self.options.file.as_deref(), line, column))
    }

    /// Read and evaluate every form in `source`, returning the last value.
    /// A failing form stops the load; definitions made before it stay.
    pub fn load_str(&mut self, source: &str) -> Result<Value> {
        let reader = kdn::reader(source).map_err(|e| self.read_error(&e))?;
        let mut last = Value::Nil;
        for form in reader {
            let form = form.map_err(|e| self.read_error(&kdn::Error::from(e)))?;
            last = self.eval(&form)?;
        }
        Ok(last)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Value> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompileError::read(&kdn::Error::from(e)).locate(Some(&path.display().to_string()), 0, 0)
        })?;
        let previous = self.options.file.replace(path.display().to_string());
        let result = self.load_str(&source);
        self.options.file = previous;
        result
    }

    /// Evaluate a single expression given as text
    pub fn eval_str(&mut self, source: &str) -> Result<Value> {
        let form = kdn::read_str(source).map_err(|e| self.read_error(&e))?;
        self.eval(&form)
    }

    /// Compile a form as the body of a no-argument fn without running it
    pub fn compile(&mut self, form: &Form) -> Result<Arc<Unit>> {
        let mut ctx = CompileContext::new(&self.rt, &self.options);
        ctx.set_position(form);
        let result = macroexpand(&mut ctx, form).and_then(|f| compile_thunk(&mut ctx, &f));
        let (line, column) = (ctx.scope.line, ctx.scope.column);
        self.warnings.extend(ctx.take_warnings());
        result.map_err(|e| e.locate(self.options.file.as_deref(), line, column))
    }

    /// Disassembly of every form in `source`. Forms are evaluated as they
    /// are compiled so later forms see earlier definitions.
    pub fn disasm(&mut self, source: &str) -> Result<String> {
        let forms = kdn::read_all(source).map_err(|e| self.read_error(&e))?;
        let mut out = String::new();
        for form in forms {
            let unit = self.compile(&form)?;
            out.push_str(&unit.to_string());
            self.eval(&form)?;
        }
        Ok(out)
    }

    fn read_error(&self, e: &kdn::Error) -> CompileError {
        let mut err = CompileError::read(e);
        err.file = self.options.file.clone();
        err
    }
}

/// True for collections the driver compiles rather than evaluates
fn needs_compilation(form: &Form) -> bool {
    match form {
        Form::List(items) => match items.first() {
            Some(Form::Symbol(s)) => !s.name().starts_with("def"),
            _ => !items.is_empty(),
        },
        Form::Vector(_) | Form::Map(_) | Form::Set(_) => true,
        _ => false,
    }
}

fn eval_top(ctx: &mut CompileContext<'_>, form: &Form) -> Result<Value> {
    let form = macroexpand(ctx, form)?;
    if let Some(items) = form.as_list() {
        if items.first() == Some(&Form::symbol("do")) {
            let mut last = Value::Nil;
            for item in &items[1..] {
                ctx.set_position(item);
                last = eval_top(ctx, item)?;
            }
            return Ok(last);
        }
    }

    if needs_compilation(&form) {
        let unit = compile_thunk(ctx, &form)?;
        let loaded = ctx
            .rt
            .load(unit)
            .map_err(|e| CompileError::resolution(e.to_string()))?;
        let thunk = ctx.rt.instantiate(&loaded);
        return ctx.rt.invoke(&thunk, Vec::new()).map_err(CompileError::eval);
    }
    let expr = analyze(ctx, Context::Eval, &form)?;
    eval(ctx.rt, &expr)
}

fn compile_thunk(ctx: &mut CompileContext<'_>, form: &Form) -> Result<Arc<Unit>> {
    let thunk = Form::list(vec![
        Form::Symbol(Symbol::new("fn*")),
        Form::vector(Vec::new()),
        form.clone(),
    ])
    .with_meta(form.meta().cloned());
    match analyze(ctx, Context::Expression, &thunk)? {
        Expr::Fn(f) => {
            debug!("compiled thunk {}", f.unit.name);
            Ok(f.unit)
        }
        _ => Err(CompileError::syntax("Top-level form did not compile to a fn")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, WarningKind};

    fn run(source: &str) -> Value {
        Compiler::default().load_str(source).unwrap()
    }

    #[test]
    fn test_load_returns_last_value() {
        assert_eq!(run("(def x 1) (def y 2) (+ x y)").as_long(), Some(3));
    }

    #[test]
    fn test_do_evaluates_in_order() {
        let v = run("(do (defmacro twice [x] (list 'do x x)) (twice 5))");
        assert_eq!(v.as_long(), Some(5));
    }

    #[test]
    fn test_loop_compiles_through_thunk() {
        let v = run("(loop [i 0 acc 0] (if (< i 5) (recur (inc i) (+ acc i)) acc))");
        assert_eq!(v.as_long(), Some(10));
    }

    #[test]
    fn test_failure_keeps_earlier_definitions() {
        let mut c = Compiler::default();
        let err = c.load_str("(def kept 7)\n(undefined-thing 1)\n(def never 1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(err.line, 2);
        assert_eq!(c.eval_str("kept").unwrap().as_long(), Some(7));
        assert!(c.runtime().resolve_var(&Symbol::new("never")).is_none());
    }

    #[test]
    fn test_error_location_uses_file_name() {
        let mut c = Compiler::new(CompileOptions::default().file("a.kiln"));
        let err = c.load_str("\n\n(if)").unwrap_err();
        assert_eq!(err.to_string(), "SyntaxError: Too few arguments to if, compiling:(a.kiln:3:1)");
    }

    #[test]
    fn test_reflection_warnings_are_collected() {
        let mut c = Compiler::new(CompileOptions::default().warn_on_reflection(true));
        c.load_str("(fn* [x] (.length x))").unwrap();
        assert_eq!(c.warnings().len(), 1);
        assert_eq!(c.warnings()[0].kind, WarningKind::Reflection);
        assert!(c.take_warnings()[0].message.starts_with("Reflection warning, NO_SOURCE_PATH:1:"));
        assert!(c.warnings().is_empty());
    }

    #[test]
    fn test_warn_on_reflection_var_is_dynamic() {
        let c = Compiler::default();
        let var = c
            .runtime()
            .resolve_var(&Symbol::qualified(CORE_NS, WARN_ON_REFLECTION))
            .unwrap();
        assert!(var.is_dynamic());
        assert_eq!(var.root().map(|v| v.is_truthy()), Some(false));
    }

    #[test]
    fn test_primitive_return_is_enforced() {
        let mut c = Compiler::default();
        c.load_str("(defn f ^long [^long x] (if (> x 0) x 1.5))").unwrap();
        assert_eq!(c.eval_str("(f -1)").unwrap(), Value::Long(1));
        assert_eq!(c.eval_str("(let [y (f -1)] (+ y 1))").unwrap(), Value::Long(2));

        c.load_str("(defn g ^double [n] n)").unwrap();
        assert_eq!(c.eval_str("(g 3)").unwrap(), Value::Double(3.0));
        let err = c.eval_str("(g :k)").unwrap_err();
        assert!(err.message.starts_with("ClassCastException: "), "{}", err.message);
    }

    #[test]
    fn test_runaway_recursion_is_catchable() {
        let mut c = Compiler::default();
        c.load_str("(defn r [n] (if (zero? n) 0 (inc (r (dec n)))))").unwrap();
        assert_eq!(c.eval_str("(r 20)").unwrap().as_long(), Some(20));

        let err = c.eval_str("(r 100000000)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval);
        assert!(err.message.starts_with("StackOverflowError: "), "{}", err.message);

        let v = c
            .eval_str("(try (r 100000000) (catch Throwable e :overflow))")
            .unwrap();
        assert_eq!(v, Value::keyword("overflow"));
        // the depth count unwinds with the error
        assert_eq!(c.eval_str("(r 20)").unwrap().as_long(), Some(20));
    }

    #[test]
    fn test_reextending_protocol_reaches_cached_sites() {
        let mut c = Compiler::default();
        let v = c
            .load_str(
                "(defprotocol P (pm [this]))
                 (extend-type Long P (pm [this] :old))
                 (defn cp [o] (pm o))
                 (cp 1)
                 (extend-type Long P (pm [this] :new))
                 (cp 1)",
            )
            .unwrap();
        assert_eq!(v, Value::keyword("new"));
    }

    #[test]
    fn test_reify_closes_over_locals() {
        let mut c = Compiler::default();
        let v = c
            .load_str(
                "(defprotocol Shape (area [this]) (scale [this k]))
                 (defn sq [^long side]
                   (reify Shape
                     (area [this] (* side side))
                     (scale [this k] (* side k))))
                 (+ (area (sq 3)) (scale (sq 2) 10))",
            )
            .unwrap();
        assert_eq!(v, Value::Long(29));
        let v = c.load_str("(let [x 5] (area (reify* [Shape] (area [this] x))))").unwrap();
        assert_eq!(v, Value::Long(5));
        let err = c.load_str("(reify* [Shape] (perimeter [this] 1))").unwrap_err();
        assert_eq!(err.message, "Can't define method not in interfaces: perimeter");
        let err = c
            .load_str(
                "(deftype Cell [^:unsynchronized-mutable v]
                   Shape (area [this] (area (reify* [Shape] (area [r] (set! v 1))))))",
            )
            .unwrap_err();
        assert_eq!(err.message, "Cannot assign to non-mutable: v");
    }

    #[test]
    fn test_disasm_lists_thunk() {
        let out = Compiler::default().disasm("(+ 1 2)").unwrap();
        assert!(out.starts_with("unit user$fn__"));
        assert!(out.contains("invoke.static"));
    }
}
