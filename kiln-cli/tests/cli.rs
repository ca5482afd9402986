//! End-to-end tests for the kiln binary

use std::io::Write;
use std::process::{Command, Output};
use tempfile::NamedTempFile;

fn kiln(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .args(args)
        .output()
        .expect("failed to run kiln")
}

fn source_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

#[test]
fn test_eval_prints_value() {
    let out = kiln(&["eval", "(+ 40 2)"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "42");
}

#[test]
fn test_run_file() {
    let file = source_file("(defn fact [n] (if (< n 2) 1 (* n (fact (dec n)))))\n(fact 10)\n");
    let out = kiln(&["run", file.path().to_str().unwrap()]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "3628800");
}

#[test]
fn test_compile_error_reports_location() {
    let file = source_file("(def x 1)\n(let [y])\n");
    let out = kiln(&["run", file.path().to_str().unwrap()]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("compiling:("), "{}", err);
    assert!(err.contains(":2:1)"), "{}", err);
}

#[test]
fn test_disasm_expression() {
    let out = kiln(&["disasm", "-e", "(fn [^long a] (inc a))"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let kir = stdout(&out);
    assert!(kir.contains("unit "));
    assert!(kir.contains("Numbers.inc(long) -> long"));
}

#[test]
fn test_reflection_warning_on_stderr() {
    let out = kiln(&["--warn-reflection", "eval", "(fn [x] (.size x))"]);
    assert!(out.status.success());
    assert!(stderr(&out).contains("Reflection warning"));
}

#[test]
fn test_strict_rejects_reflection() {
    let out = kiln(&["--strict", "eval", "(fn [x] (.size x))"]);
    assert!(!out.status.success());
}

#[test]
fn test_missing_file_fails() {
    let out = kiln(&["run", "/nonexistent/file.kiln"]);
    assert!(!out.status.success());
}

#[test]
fn test_deep_recursion_runs_on_large_stack() {
    let out = kiln(&[
        "eval",
        "(defn r [n] (if (zero? n) 0 (inc (r (dec n))))) (r 2000)",
    ]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "2000");
}

#[test]
fn test_unbounded_recursion_reports_overflow() {
    let out = kiln(&["eval", "(defn r [n] (inc (r n))) (r 0)"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("StackOverflowError"), "{}", stderr(&out));
}
