//! Compile context
//!
//! Everything analysis needs beyond the form itself: the runtime it
//! resolves against, the lexical environment, the binding/method/object
//! arenas, the locals-clearing path tree and collected warnings.
//!
//! Dynamically scoped state (current method, clear path, loop target,
//! source position) lives in [`Scope`]. Nested analysis enters a scope
//! through [`CompileContext::enter`]; the returned guard restores the
//! previous scope and lexical environment when dropped, including on
//! early return through `?`.

use std::ops::{Deref, DerefMut};

use kdn::{Form, Symbol};
use kir_core::Prim;
use kiln_runtime::{Runtime, CORE_NS};
use log::{trace, warn};

use crate::env::{
    BindingId, LocalBinding, MethodFrame, MethodId, ObjFrame, ObjId, ObjKind, UseId, UseSite,
};
use crate::error::{Warning, WarningKind};
use crate::expr::LocalRef;
use crate::options::CompileOptions;
use crate::path::{PathArena, PathId};

/// Name of the dynamic var that turns on reflection warnings at run time
pub const WARN_ON_REFLECTION: &str = "*warn-on-reflection*";

/// Where the value of an expression goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Value is discarded
    Statement,
    /// Value is consumed by an enclosing expression
    Expression,
    /// Value leaves the method
    Return,
    /// Top-level form evaluated without emission
    Eval,
}

/// Dynamically scoped analysis state
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub method: Option<MethodId>,
    pub next_slot: u16,
    pub clear_path: Option<PathId>,
    pub clear_root: Option<PathId>,
    /// Bindings a `recur` in tail position rebinds
    pub loop_locals: Option<Vec<BindingId>>,
    /// Inside a try body
    pub no_recur: bool,
    pub in_catch_finally: bool,
    /// `Return` context here really leaves the method
    pub method_return: bool,
    /// Lexical environment entries below this index are not visible
    pub env_floor: usize,
    pub line: u32,
    pub column: u32,
}

pub struct CompileContext<'rt> {
    pub rt: &'rt Runtime,
    pub options: &'rt CompileOptions,
    pub scope: Scope,
    env: Vec<(Symbol, BindingId)>,
    pub(crate) bindings: Vec<LocalBinding>,
    pub(crate) uses: Vec<UseSite>,
    pub(crate) paths: PathArena,
    pub(crate) methods: Vec<MethodFrame>,
    pub(crate) objs: Vec<ObjFrame>,
    warnings: Vec<Warning>,
}

/// Restores the enclosing scope on drop
pub struct ScopeGuard<'a, 'rt> {
    ctx: &'a mut CompileContext<'rt>,
    saved: Option<Scope>,
    env_len: usize,
}

impl<'a, 'rt> Deref for ScopeGuard<'a, 'rt> {
    type Target = CompileContext<'rt>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<'a, 'rt> DerefMut for ScopeGuard<'a, 'rt> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<'a, 'rt> Drop for ScopeGuard<'a, 'rt> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.ctx.scope = saved;
        }
        self.ctx.env.truncate(self.env_len);
    }
}

impl<'rt> CompileContext<'rt> {
    pub fn new(rt: &'rt Runtime, options: &'rt CompileOptions) -> Self {
        Self {
            rt,
            options,
            scope: Scope::default(),
            env: Vec::new(),
            bindings: Vec::new(),
            uses: Vec::new(),
            paths: PathArena::new(),
            methods: Vec::new(),
            objs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Enter a nested scope; changes made through the guard are undone
    /// when it drops
    pub fn enter(&mut self) -> ScopeGuard<'_, 'rt> {
        let saved = Some(self.scope.clone());
        let env_len = self.env.len();
        ScopeGuard {
            ctx: self,
            saved,
            env_len,
        }
    }

    // ========== Source position ==========

    /// Track the position of `form` if it has one
    pub fn set_position(&mut self, form: &Form) {
        if let Some(line) = form.line() {
            self.scope.line = line;
            self.scope.column = form.column().unwrap_or(0);
        }
    }

    pub fn line(&self) -> u32 {
        self.scope.line
    }

    pub fn file(&self) -> &str {
        self.options.file_name()
    }

    // ========== Warnings ==========

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let warning = Warning {
            kind,
            message: message.into(),
            file: self.options.file.clone(),
            line: self.scope.line,
            column: self.scope.column,
        };
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn warn_on_reflection(&self) -> bool {
        self.options.warn_on_reflection
            || self
                .rt
                .resolve_var(&Symbol::qualified(CORE_NS, WARN_ON_REFLECTION))
                .and_then(|v| v.get().ok())
                .map(|v| v.is_truthy())
                .unwrap_or(false)
    }

    // ========== Frames ==========

    pub fn new_obj(&mut self, name: impl Into<String>, kind: ObjKind, once: bool) -> ObjId {
        self.objs.push(ObjFrame::new(name, kind, once));
        ObjId((self.objs.len() - 1) as u32)
    }

    pub fn new_method(&mut self, obj: ObjId, parent: Option<MethodId>) -> MethodId {
        self.methods.push(MethodFrame::new(obj, parent));
        MethodId((self.methods.len() - 1) as u32)
    }

    pub fn obj(&self, id: ObjId) -> &ObjFrame {
        &self.objs[id.index()]
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut ObjFrame {
        &mut self.objs[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodFrame {
        &self.methods[id.index()]
    }

    pub fn binding(&self, id: BindingId) -> &LocalBinding {
        &self.bindings[id.index()]
    }

    pub fn binding_mut(&mut self, id: BindingId) -> &mut LocalBinding {
        &mut self.bindings[id.index()]
    }

    pub fn use_site(&self, id: UseId) -> &UseSite {
        &self.uses[id.index()]
    }

    /// Bindings owned by a method, in creation order
    pub fn method_bindings(&self, method: MethodId) -> impl Iterator<Item = &LocalBinding> + '_ {
        self.bindings
            .iter()
            .filter(move |b| b.method == Some(method))
    }

    // ========== Locals ==========

    /// Hand out the next free slot of the current method
    pub fn alloc_slot(&mut self) -> u16 {
        let slot = self.scope.next_slot;
        self.scope.next_slot += 1;
        if let Some(m) = self.scope.method {
            let frame = &mut self.methods[m.index()];
            frame.max_slot = frame.max_slot.max(slot);
        }
        slot
    }

    /// Allocate a slot for a new local and make it visible by name
    pub fn register_local(
        &mut self,
        sym: &Symbol,
        tag: Option<String>,
        prim: Option<Prim>,
        is_arg: bool,
    ) -> BindingId {
        let idx = self.alloc_slot();
        self.push_binding(sym, idx, tag, prim, is_arg)
    }

    /// Bind `sym` to slot 0, the method's own object
    pub fn register_this(&mut self, sym: &Symbol, tag: Option<String>) -> BindingId {
        let id = self.push_binding(sym, 0, tag, None, false);
        self.binding_mut(id).can_be_cleared = false;
        id
    }

    fn push_binding(
        &mut self,
        sym: &Symbol,
        idx: u16,
        tag: Option<String>,
        prim: Option<Prim>,
        is_arg: bool,
    ) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        let name = sym.without_meta();
        trace!("local {} -> slot {}{}", name, idx, prim.map(|p| format!(" ^{}", p)).unwrap_or_default());
        self.bindings.push(LocalBinding {
            name: name.clone(),
            idx,
            tag,
            prim,
            is_arg,
            method: self.scope.method,
            clear_root: self.scope.clear_root,
            can_be_cleared: true,
            mutable: false,
            recur_mismatch: false,
            used_in_catch_finally: false,
        });
        if let Some(m) = self.scope.method {
            self.methods[m.index()].locals.insert(id);
        }
        self.env.push((name, id));
        id
    }

    /// Make an existing binding visible under its name
    pub fn bind_name(&mut self, id: BindingId) {
        let name = self.binding(id).name.clone();
        self.env.push((name, id));
    }

    /// Innermost visible binding for an unqualified symbol
    pub fn lookup_local(&self, sym: &Symbol) -> Option<BindingId> {
        if sym.ns().is_some() {
            return None;
        }
        self.env[self.scope.env_floor.min(self.env.len())..]
            .iter()
            .rev()
            .find(|(name, _)| name.name() == sym.name())
            .map(|(_, id)| *id)
    }

    /// Length of the lexical environment, for hiding it behind `env_floor`
    pub fn env_depth(&self) -> usize {
        self.env.len()
    }

    /// Names of every visible local, innermost last
    pub fn local_names(&self) -> Vec<Symbol> {
        self.env[self.scope.env_floor.min(self.env.len())..]
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Record that `binding` is read from `method`: every enclosing
    /// object between here and the binding's owner carries it as a field
    pub fn close_over(&mut self, binding: BindingId, method: Option<MethodId>) {
        let Some(m) = method else { return };
        let frame = &self.methods[m.index()];
        if !frame.locals.contains(&binding) {
            let (obj, parent) = (frame.obj, frame.parent);
            if self.objs[obj.index()].closes.insert(binding) {
                trace!("{} closes over {}", self.objs[obj.index()].name, self.binding(binding).name);
            }
            self.close_over(binding, parent);
        } else if self.scope.in_catch_finally {
            self.binding_mut(binding).used_in_catch_finally = true;
        }
    }

    /// A use of `binding` at the current position. Earlier uses on the
    /// same path lose their clear flag; this one becomes the new clearing
    /// candidate when it sits under the binding's own clear root.
    pub fn reference_local(&mut self, binding: BindingId, tag: Option<String>) -> LocalRef {
        self.close_over(binding, self.scope.method);
        let path = self.scope.clear_path;
        let site = UseId(self.uses.len() as u32);
        self.uses.push(UseSite {
            binding,
            path,
            should_clear: false,
        });

        let b = self.binding(binding);
        let (idx, clear_root, prim) = (b.idx, b.clear_root, b.prim);
        let tag = tag.or_else(|| b.tag.clone());
        if let (Some(m), Some(here)) = (self.scope.method, path) {
            if idx > 0 {
                let earlier = self.methods[m.index()]
                    .clear_sites
                    .get(&binding)
                    .cloned()
                    .unwrap_or_default();
                for s in earlier {
                    let same_path = self.uses[s.index()]
                        .path
                        .map(|p| self.paths.on_same_path(here, p))
                        .unwrap_or(false);
                    if same_path {
                        self.uses[s.index()].should_clear = false;
                    }
                }
                if self.scope.clear_root == clear_root {
                    self.uses[site.index()].should_clear = true;
                    self.methods[m.index()]
                        .clear_sites
                        .entry(binding)
                        .or_default()
                        .push(site);
                }
            }
        }
        LocalRef {
            binding,
            site,
            prim,
            tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ctx(f: impl FnOnce(&mut CompileContext<'_>)) {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        f(&mut ctx);
    }

    fn enter_method(ctx: &mut CompileContext<'_>, parent: Option<MethodId>) -> MethodId {
        let obj = ctx.new_obj("f", ObjKind::Fn, false);
        let m = ctx.new_method(obj, parent);
        ctx.scope.method = Some(m);
        ctx.scope.next_slot = 1;
        let root = ctx.paths.path(None);
        ctx.scope.clear_path = Some(root);
        ctx.scope.clear_root = Some(root);
        m
    }

    #[test]
    fn test_scope_guard_restores_env_and_scope() {
        with_ctx(|ctx| {
            ctx.scope.line = 4;
            let x = Symbol::new("x");
            {
                let mut inner = ctx.enter();
                inner.scope.line = 10;
                inner.register_local(&x, None, None, false);
                assert!(inner.lookup_local(&x).is_some());
            }
            assert_eq!(ctx.scope.line, 4);
            assert!(ctx.lookup_local(&x).is_none());
        });
    }

    #[test]
    fn test_guard_restores_on_error_path() {
        fn fails(ctx: &mut CompileContext<'_>) -> Result<(), ()> {
            let mut inner = ctx.enter();
            inner.scope.no_recur = true;
            inner.register_local(&Symbol::new("y"), None, None, false);
            Err(())
        }
        with_ctx(|ctx| {
            assert!(fails(ctx).is_err());
            assert!(!ctx.scope.no_recur);
            assert!(ctx.lookup_local(&Symbol::new("y")).is_none());
        });
    }

    #[test]
    fn test_slots_are_reused_after_scope_exit() {
        with_ctx(|ctx| {
            enter_method(ctx, None);
            let a = {
                let mut inner = ctx.enter();
                inner.register_local(&Symbol::new("a"), None, None, false)
            };
            let b = ctx.register_local(&Symbol::new("b"), None, None, false);
            assert_eq!(ctx.binding(a).idx, ctx.binding(b).idx);
        });
    }

    #[test]
    fn test_capture_is_transitive() {
        with_ctx(|ctx| {
            let outer = enter_method(ctx, None);
            let x = ctx.register_local(&Symbol::new("x"), None, None, false);
            let m1 = enter_method(ctx, Some(outer));
            let m2 = enter_method(ctx, Some(m1));
            let m3 = enter_method(ctx, Some(m2));
            ctx.scope.method = Some(m3);
            ctx.reference_local(x, None);
            for m in [m1, m2, m3] {
                let obj = ctx.method(m).obj;
                assert!(ctx.obj(obj).closes.contains(&x));
            }
            let owner = ctx.method(outer).obj;
            assert!(!ctx.obj(owner).closes.contains(&x));
        });
    }

    #[test]
    fn test_sequential_uses_clear_only_the_last() {
        with_ctx(|ctx| {
            enter_method(ctx, None);
            let x = ctx.register_local(&Symbol::new("x"), None, None, false);
            let first = ctx.reference_local(x, None);
            let second = ctx.reference_local(x, None);
            assert!(!ctx.use_site(first.site).should_clear);
            assert!(ctx.use_site(second.site).should_clear);
        });
    }

    #[test]
    fn test_branch_uses_both_clear() {
        with_ctx(|ctx| {
            enter_method(ctx, None);
            let x = ctx.register_local(&Symbol::new("x"), None, None, false);
            let branch = ctx.paths.branch(ctx.scope.clear_path);
            let then = ctx.paths.path(Some(branch));
            let els = ctx.paths.path(Some(branch));
            ctx.scope.clear_path = Some(then);
            let a = ctx.reference_local(x, None);
            ctx.scope.clear_path = Some(els);
            let b = ctx.reference_local(x, None);
            assert!(ctx.use_site(a.site).should_clear);
            assert!(ctx.use_site(b.site).should_clear);
        });
    }

    #[test]
    fn test_use_in_finally_is_marked() {
        with_ctx(|ctx| {
            enter_method(ctx, None);
            let x = ctx.register_local(&Symbol::new("x"), None, None, false);
            ctx.scope.in_catch_finally = true;
            ctx.reference_local(x, None);
            assert!(ctx.binding(x).used_in_catch_finally);
        });
    }

    #[test]
    fn test_env_floor_hides_outer_locals() {
        with_ctx(|ctx| {
            let x = Symbol::new("x");
            ctx.register_local(&x, None, None, false);
            let mut inner = ctx.enter();
            inner.scope.env_floor = 1;
            assert!(inner.lookup_local(&x).is_none());
        });
    }
}
