//! kiln certification harness
//!
//! Helpers the cucumber steps use to run source through a fresh compiler
//! and observe values, errors, warnings and emitted kIR as text.

use kiln::{CompileOptions, Compiler};

/// Everything a scenario can observe about one evaluation
#[derive(Debug, Default, Clone)]
pub struct Outcome {
    /// Printed value of the last form
    pub value: Option<String>,
    /// `Kind: message` of the first failure
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

/// Load `definitions`, then evaluate `expr` in the same compiler
pub fn evaluate(definitions: &str, expr: &str, options: CompileOptions) -> Outcome {
    let mut compiler = Compiler::new(options);
    let mut outcome = Outcome::default();
    let result = compiler
        .load_str(definitions)
        .and_then(|_| compiler.load_str(expr));
    match result {
        Ok(value) => outcome.value = Some(value.to_string()),
        Err(e) => outcome.error = Some(format!("{}: {}", e.kind, e.message)),
    }
    outcome.warnings = compiler
        .take_warnings()
        .into_iter()
        .map(|w| w.message)
        .collect();
    outcome
}

/// Verified disassembly of `expr` compiled after `definitions` are loaded
pub fn disassemble(definitions: &str, expr: &str, options: CompileOptions) -> Result<String, String> {
    let mut compiler = Compiler::new(options);
    compiler.load_str(definitions).map_err(|e| e.to_string())?;
    let form = kdn::read_str(expr).map_err(|e| e.to_string())?;
    let unit = compiler.compile(&form).map_err(|e| e.to_string())?;
    kir_core::verify_unit(&unit).map_err(|e| e.to_string())?;
    Ok(unit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_keeps_definitions() {
        let out = evaluate("(def x 2)", "(* x 21)", CompileOptions::default());
        assert_eq!(out.value.as_deref(), Some("42"));
        assert!(out.error.is_none());
    }

    #[test]
    fn test_evaluate_reports_error_kind() {
        let out = evaluate("", "(if)", CompileOptions::default());
        assert_eq!(out.error.as_deref(), Some("SyntaxError: Too few arguments to if"));
    }
}
