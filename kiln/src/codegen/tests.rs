//! Codegen tests

use kir_core::verify_unit;

use crate::{CompileOptions, Compiler};

fn compile_with(compiler: &mut Compiler, source: &str) -> String {
    let form = kdn::read_str(source).unwrap();
    let unit = compiler.compile(&form).unwrap();
    verify_unit(&unit).unwrap();
    unit.to_string()
}

fn compile(source: &str) -> String {
    compile_with(&mut Compiler::default(), source)
}

#[test]
fn test_statement_values_are_popped() {
    let kir = compile("(fn* [] (str 1) 2)");
    assert!(kir.contains("pop"));
    assert!(kir.contains("return"));
}

#[test]
fn test_unused_literals_emit_nothing() {
    let kir = compile("(fn* [] 1 :k \"s\" nil)");
    assert!(!kir.contains("pop"));
    assert!(kir.contains("nil"));
}

#[test]
fn test_primitive_arithmetic_uses_static_call() {
    let kir = compile("(fn* [^long a ^long b] (+ a b))");
    assert!(kir.contains("Numbers.add(long, long) -> long"));
    assert!(kir.contains("invoke.static"));
    assert!(kir.contains("load 1"));
    assert!(kir.contains("load 2"));
    assert!(!kir.contains("unbox"));
    assert!(kir.contains("box.long"));
}

#[test]
fn test_boxed_args_pick_object_overload() {
    let kir = compile("(fn* [a b] (+ a b))");
    assert!(kir.contains("Numbers.add(Object, Object)"));
    assert!(!kir.contains("box.long"));
}

#[test]
fn test_loop_locals_stay_primitive() {
    let kir = compile("(fn* [n] (loop* [i 0] (if (< i n) (recur (inc i)) i)))");
    assert!(kir.contains("push.long 0"));
    assert!(kir.contains("jump.false"));
    assert!(kir.contains("jump L"));
}

#[test]
fn test_recur_stores_right_to_left() {
    let kir = compile("(fn* [a b] (if a (recur b a) b))");
    let store2 = kir.find("store 2").unwrap();
    let store1 = kir.find("store 1").unwrap();
    assert!(store2 < store1);
}

#[test]
fn test_tail_call_clears_dead_locals() {
    let kir = compile("(fn* [x y] (str x))");
    assert!(kir.contains("load.clear 1"));
    assert!(kir.contains("clear 2"));
}

#[test]
fn test_clearing_can_be_disabled() {
    let mut compiler = Compiler::new(CompileOptions::default().disable_locals_clearing(true));
    let kir = compile_with(&mut compiler, "(fn* [x y] (str x))");
    assert!(!kir.contains("clear"));
    assert!(kir.contains("load 1"));
}

#[test]
fn test_branches_clear_on_each_path() {
    let kir = compile("(fn* [x t] (if t (str x) (str x 1)))");
    assert_eq!(kir.matches("load.clear 1").count(), 2);
}

#[test]
fn test_closure_loads_captures() {
    let kir = compile("(fn* [x] (fn* [] x))");
    assert!(kir.contains("new.fn unit0 1"));
    assert!(kir.contains("closed 0 x"));
    assert!(kir.contains("field 0"));
    assert!(!kir.contains("field.clear"));
}

#[test]
fn test_once_fn_clears_its_fields() {
    let kir = compile("(fn* [x] ((^:once fn* [] (str x))))");
    assert!(kir.contains("^:once"));
    assert!(kir.contains("field.clear 0"));
}

#[test]
fn test_letfn_patches_sibling_fields() {
    let kir = compile("(fn* [] (letfn* [a (fn* [] (b)) b (fn* [] (a))] (a)))");
    assert_eq!(kir.matches("field.init 0").count(), 2);
}

#[test]
fn test_keyword_invoke_site() {
    let kir = compile("(fn* [m] (:k m))");
    assert!(kir.contains("site0 keyword :k"));
    assert!(kir.contains("keyword.invoke site0"));
}

#[test]
fn test_protocol_invoke_site() {
    let mut compiler = Compiler::default();
    compiler
        .load_str("(defprotocol Shape (area [s]))")
        .unwrap();
    let kir = compile_with(&mut compiler, "(fn* [s] (area s))");
    assert!(kir.contains("site0 protocol user/area"));
    assert!(kir.contains("protocol.invoke site0 1"));
}

#[test]
fn test_try_catch_finally_handlers() {
    let kir = compile("(fn* [] (try (str 1) (catch Exception e 2) (finally (println \"done\"))))");
    assert!(kir.contains("Exception\n"));
    assert!(kir.contains(" any\n"));
    // finally runs on the normal path, after the catch, and in the catch-all
    assert!(kir.matches("var.get #").count() >= 3);
    assert!(kir.contains("throw"));
}

#[test]
fn test_catch_handler_precedes_catch_all() {
    let kir = compile("(fn* [] (try (str 1) (catch Exception e e) (finally (str 2))))");
    let typed = kir.find("Exception\n").unwrap();
    let any = kir.find(" any\n").unwrap();
    assert!(typed < any);
}

#[test]
fn test_try_in_expression_is_wrapped() {
    let kir = compile("(fn* [] (str (try 1 (catch Exception e 2))))");
    assert!(kir.contains("^:once"));
}

#[test]
fn test_int_case_uses_tableswitch() {
    let kir = compile("(fn* [x] (case* x 1 :a 2 :b 3 :c :none))");
    assert!(kir.contains("instance-of"));
    assert!(kir.contains("unbox.int"));
    assert!(kir.contains("tableswitch low=1"));
    assert_eq!(kir.matches("jump.not-equiv").count(), 3);
}

#[test]
fn test_keyword_case_compares_identity() {
    let kir = compile("(fn* [x] (case* x :a 1 :b 2 :c 3))");
    assert!(kir.contains("hash"));
    assert_eq!(kir.matches("jump.not-identical").count(), 3);
    assert!(kir.contains("No matching clause: "));
}

#[test]
fn test_wide_int_case_shifts() {
    let kir = compile("(fn* [x] (case* x 0 :a 65536 :b 131072 :c nil))");
    assert!(kir.contains("shift-mask 16"));
}

#[test]
fn test_reflective_member_access() {
    let kir = compile("(fn* [x] (. x -foo))");
    assert!(kir.contains("get.field-reflective"));
    let kir = compile("(fn* [x] (.foo x 1))");
    assert!(kir.contains("invoke.reflective"));
    let kir = compile("(fn* [x] (Math/abs x))");
    assert!(kir.contains("invoke.static-reflective"));
}

#[test]
fn test_deftype_field_access() {
    let mut compiler = Compiler::default();
    compiler.load_str("(deftype* Pair [^long a b])").unwrap();
    let kir = compile_with(&mut compiler, "(fn* [^Pair p] (. p -a))");
    assert!(kir.contains("get.field #"));
    assert!(kir.contains("box.long"));
    let kir = compile_with(&mut compiler, "(fn* [] (new Pair 1 2))");
    assert!(kir.contains("new.instance"));
}

#[test]
fn test_reify_builds_instance_from_captures() {
    let mut compiler = Compiler::default();
    compiler.load_str("(defprotocol Shape (area [this]))").unwrap();
    let kir = compile_with(&mut compiler, "(fn* [^long n] (reify* [Shape] (area [this] n)))");
    assert!(kir.contains("$reify__"));
    assert!(kir.contains("closed 0 n ^long"));
    assert!(kir.contains("new.instance #"));
    assert!(kir.contains("field 0"));
}

#[test]
fn test_def_emits_var_def() {
    let kir = compile("(fn* [] (def x 1))");
    assert!(kir.contains("var.def #"));
    assert!(kir.contains(" init"));
}

#[test]
fn test_collections() {
    let kir = compile("(fn* [a] [a {a 1} #{a}])");
    assert!(kir.contains("make.vector 3"));
    assert!(kir.contains("make.map 1"));
    assert!(kir.contains("make.set 1"));
}

#[test]
fn test_primitive_return_casts_every_exit() {
    let kir = compile("(fn* ^long [^long x] (if (> x 0) x 1.5))");
    assert!(kir.contains("convert double->long"));
    assert!(!kir.contains("box.double"));

    let kir = compile("(fn* ^double [x] x)");
    assert!(kir.contains("unbox.double"));
    assert!(kir.contains("box.double"));
}
