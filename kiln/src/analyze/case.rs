//! `case*`: constant-time dispatch on literal test values
//!
//! Tests are reduced to 32-bit keys, either the value itself for small
//! integers or its hash. Keys that fit a small range become a table
//! switch directly; otherwise a shift and mask is searched for that keeps
//! them distinct in a small range, and failing that the switch is sparse.
//! Distinct tests sharing a hash land in one bucket and are told apart by
//! comparing each in turn.

use std::collections::{BTreeMap, HashSet};

use kdn::{Form, Symbol};
use kiln_runtime::core::next_gensym_id;
use kiln_runtime::CORE_NS;

use super::{analyze, operand, wrap_in_once_fn};
use crate::context::{CompileContext, Context};
use crate::error::{CompileError, Result, WarningKind};
use crate::expr::{CaseBucket, CaseEntry, CaseExpr, CaseTestType, Expr, SwitchType};

/// Widest key span emitted as a table switch
const MAX_TABLE_SPAN: i64 = 8192;
const MAX_MASK_BITS: u32 = 13;

pub(super) fn analyze_case(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    form: &Form,
    items: &[Form],
) -> Result<Expr> {
    if cx == Context::Eval {
        return analyze(ctx, cx, &wrap_in_once_fn(form));
    }
    if items.len() < 2 {
        return Err(CompileError::syntax("Too few arguments to case*"));
    }
    let line = ctx.line();
    let clauses = &items[2..];
    let (pairs, default_form) = if clauses.len() % 2 == 1 {
        (&clauses[..clauses.len() - 1], clauses.last())
    } else {
        (clauses, None)
    };

    // (test, index of its then form)
    let mut tests: Vec<(Form, usize)> = Vec::new();
    for (i, pair) in pairs.chunks(2).enumerate() {
        let literals: Vec<&Form> = match &pair[0] {
            Form::List(group) if !group.is_empty() => group.iter().collect(),
            other => vec![other],
        };
        for lit in literals {
            let lit = lit.with_meta(None);
            if tests.iter().any(|(t, _)| *t == lit) {
                return Err(CompileError::syntax(format!(
                    "Duplicate case test constant: {}",
                    lit
                )));
            }
            tests.push((lit, i));
        }
    }

    let mut scope = ctx.enter();
    let value = analyze(&mut scope, operand(cx), &items[1])?;
    let temp_sym = Symbol::new(format!("case__temp__{}", next_gensym_id()));
    let temp = scope.register_local(&temp_sym, None, None, false);

    if tests.is_empty() {
        let default = analyze_default(&mut scope, cx, default_form, &temp_sym)?;
        return Ok(Expr::Do(vec![value, default]));
    }

    let test_type = test_type(&tests);
    let mut grouped: BTreeMap<i32, Vec<(Form, usize)>> = BTreeMap::new();
    for (test, then) in tests {
        grouped.entry(raw_key(test_type, &test)).or_default().push((test, then));
    }
    if grouped.values().any(|g| g.len() > 1) {
        let message = format!(
            "hash collision of some case test constants, {}:{}",
            scope.file(),
            line
        );
        scope.warn(WarningKind::CaseCollision, message);
    }

    let keys: Vec<i32> = grouped.keys().copied().collect();
    let (switch, shift, mask) = if fits_table(&keys) {
        (SwitchType::Compact, 0, 0)
    } else if let Some((shift, mask)) = min_hash(&keys) {
        (SwitchType::Compact, shift, mask)
    } else {
        (SwitchType::Sparse, 0, 0)
    };

    let parent = scope.scope.clear_path;
    let branch = scope.paths.branch(parent);
    let mut buckets = Vec::with_capacity(grouped.len());
    for (raw, group) in grouped {
        let mut entries = Vec::with_capacity(group.len());
        for (test, then) in group {
            let mut arm = scope.enter();
            arm.scope.clear_path = Some(arm.paths.path(Some(branch)));
            let then = analyze(&mut arm, cx, &pairs[then * 2 + 1])?;
            entries.push(CaseEntry { test, then });
        }
        let key = if mask == 0 { raw } else { (raw >> shift) & mask as i32 };
        buckets.push(CaseBucket { key, entries });
    }
    buckets.sort_by_key(|b| b.key);

    let default = {
        let mut arm = scope.enter();
        arm.scope.clear_path = Some(arm.paths.path(Some(branch)));
        analyze_default(&mut arm, cx, default_form, &temp_sym)?
    };

    Ok(Expr::Case(Box::new(CaseExpr {
        expr: value,
        temp,
        test_type,
        shift,
        mask,
        switch,
        buckets,
        default,
        line,
    })))
}

/// The default branch; without one, a miss throws
fn analyze_default(
    ctx: &mut CompileContext<'_>,
    cx: Context,
    default: Option<&Form>,
    temp: &Symbol,
) -> Result<Expr> {
    if let Some(form) = default {
        return analyze(ctx, cx, form);
    }
    let message = Form::list(vec![
        Form::Symbol(Symbol::qualified(CORE_NS, "str")),
        Form::string("No matching clause: "),
        Form::Symbol(temp.clone()),
    ]);
    let throw = Form::list(vec![
        Form::symbol("throw"),
        Form::list(vec![
            Form::symbol("new"),
            Form::symbol("IllegalArgumentException"),
            message,
        ]),
    ]);
    analyze(ctx, cx, &throw)
}

fn test_type(tests: &[(Form, usize)]) -> CaseTestType {
    let is_int = |f: &Form| matches!(f, Form::Long(n) if i32::try_from(*n).is_ok());
    if tests.iter().all(|(t, _)| is_int(t)) {
        CaseTestType::Int
    } else if tests.iter().all(|(t, _)| matches!(t, Form::Keyword(_))) {
        CaseTestType::HashIdentity
    } else {
        CaseTestType::HashEquiv
    }
}

fn raw_key(test_type: CaseTestType, test: &Form) -> i32 {
    match (test_type, test) {
        (CaseTestType::Int, Form::Long(n)) => *n as i32,
        _ => test.hasheq(),
    }
}

fn fits_table(keys: &[i32]) -> bool {
    match (keys.iter().min(), keys.iter().max()) {
        (Some(&lo), Some(&hi)) => (hi as i64 - lo as i64) < MAX_TABLE_SPAN,
        _ => true,
    }
}

/// Smallest mask, then smallest shift, keeping every key distinct
fn min_hash(keys: &[i32]) -> Option<(u8, u32)> {
    for bits in 1..=MAX_MASK_BITS {
        let mask = (1u32 << bits) - 1;
        for shift in 0..32u8 {
            let mut seen = HashSet::with_capacity(keys.len());
            if keys.iter().all(|&h| seen.insert((h >> shift) & mask as i32)) {
                return Some((shift, mask));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::CompileOptions;
    use kiln_runtime::Runtime;

    fn analyze_case_src(source: &str) -> (Result<Expr>, Vec<String>) {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        let form = kdn::read_str(source).unwrap();
        let expr = analyze(&mut ctx, Context::Expression, &wrap_in_once_fn(&form));
        let warnings = ctx.take_warnings().into_iter().map(|w| w.message).collect();
        (expr, warnings)
    }

    fn find_case(expr: &Expr) -> Option<&CaseExpr> {
        match expr {
            Expr::Case(c) => Some(c),
            Expr::Let(l) => find_case(&l.body),
            Expr::Do(body) => body.iter().find_map(find_case),
            _ => None,
        }
    }

    #[test]
    fn test_int_tests_fit_table() {
        assert_eq!(test_type(&[(Form::Long(1), 0), (Form::Long(3), 1)]), CaseTestType::Int);
        assert!(fits_table(&[1, 2, 100]));
        assert!(!fits_table(&[0, 1 << 20]));
    }

    #[test]
    fn test_test_type_selection() {
        let kw = |s: &str| (Form::keyword(s), 0);
        assert_eq!(test_type(&[kw("a"), kw("b")]), CaseTestType::HashIdentity);
        assert_eq!(test_type(&[kw("a"), (Form::string("b"), 1)]), CaseTestType::HashEquiv);
        assert_eq!(test_type(&[(Form::Long(1 << 40), 0)]), CaseTestType::HashEquiv);
    }

    #[test]
    fn test_min_hash_keeps_keys_distinct() {
        let keys = [0x1000_0000, 0x2000_0000, 0x3000_0000];
        let (shift, mask) = min_hash(&keys).unwrap();
        let masked: HashSet<i32> = keys.iter().map(|h| (h >> shift) & mask as i32).collect();
        assert_eq!(masked.len(), keys.len());
        assert_eq!(mask, 3);
    }

    #[test]
    fn test_duplicate_test_constant() {
        let (expr, _) = analyze_case_src("(let* [x 1] (case* x 1 :a (2 1) :b))");
        let err = expr.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("Duplicate case test constant: 1"));
    }

    #[test]
    fn test_grouped_tests_share_branch_form() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        ctx.register_local(&Symbol::new("x"), None, None, false);
        let form = kdn::read_str("(case* x (1 2 3) :small 10 :ten :other)").unwrap();
        let expr = analyze(&mut ctx, Context::Expression, &form).unwrap();
        let case = find_case(&expr).unwrap();
        assert_eq!(case.buckets.len(), 4);
        let small = case
            .buckets
            .iter()
            .filter(|b| matches!(&b.entries[0].then, Expr::Const(Form::Keyword(k)) if k.name() == "small"))
            .count();
        assert_eq!(small, 3);
        assert!(!case.buckets.iter().any(CaseBucket::is_collision));
    }

    #[test]
    fn test_colliding_hashes_share_bucket_and_warn() {
        // 1 and 4294967296 fold to the same hash
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        let form = kdn::read_str("(case* x 1 :one 4294967296 :big 2 :two :none)").unwrap();
        ctx.register_local(&Symbol::new("x"), None, None, false);
        let expr = analyze(&mut ctx, Context::Expression, &form).unwrap();
        let case = find_case(&expr).unwrap();
        assert_eq!(case.test_type, CaseTestType::HashEquiv);
        assert_eq!(case.buckets.iter().filter(|b| b.is_collision()).count(), 1);
        assert_eq!(case.buckets.len(), 2);
        let warnings = ctx.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with("hash collision of some case test constants"));
    }

    #[test]
    fn test_keyword_case_is_identity() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        ctx.register_local(&Symbol::new("k"), None, None, false);
        let form = kdn::read_str("(case* k :a 1 :b 2 :c 3)").unwrap();
        let expr = analyze(&mut ctx, Context::Expression, &form).unwrap();
        let case = find_case(&expr).unwrap();
        assert_eq!(case.test_type, CaseTestType::HashIdentity);
        assert_eq!(case.buckets.len(), 3);
        assert!(case.buckets.windows(2).all(|w| w[0].key < w[1].key));
        // no default: a miss throws
        assert!(matches!(case.default, Expr::Throw(_)));
    }

    #[test]
    fn test_wide_int_keys_use_shift_mask() {
        let rt = Runtime::new();
        let options = CompileOptions::default();
        let mut ctx = CompileContext::new(&rt, &options);
        ctx.register_local(&Symbol::new("n"), None, None, false);
        let form = kdn::read_str("(case* n 0 :a 65536 :b 131072 :c nil)").unwrap();
        let expr = analyze(&mut ctx, Context::Expression, &form).unwrap();
        let case = find_case(&expr).unwrap();
        assert_eq!(case.test_type, CaseTestType::Int);
        assert_eq!(case.switch, SwitchType::Compact);
        assert_ne!(case.mask, 0);
        assert_eq!(case.shift, 16);
    }
}
