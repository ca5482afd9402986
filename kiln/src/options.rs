//! Compiler configuration

/// Options that affect analysis and emission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Refuse reflective fallback; unresolved host calls are errors
    pub strict: bool,
    pub warn_on_reflection: bool,
    /// Warn when loop locals lose their primitive type
    pub warn_on_boxing: bool,
    pub disable_locals_clearing: bool,
    /// Source file reported in errors and warnings
    pub file: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn warn_on_reflection(mut self, warn: bool) -> Self {
        self.warn_on_reflection = warn;
        self
    }

    pub fn warn_on_boxing(mut self, warn: bool) -> Self {
        self.warn_on_boxing = warn;
        self
    }

    pub fn disable_locals_clearing(mut self, disable: bool) -> Self {
        self.disable_locals_clearing = disable;
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn file_name(&self) -> &str {
        self.file.as_deref().unwrap_or(crate::error::NO_SOURCE_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_setters() {
        let opts = CompileOptions::new()
            .strict(true)
            .warn_on_reflection(true)
            .file("core.kiln");
        assert!(opts.strict);
        assert!(opts.warn_on_reflection);
        assert!(!opts.disable_locals_clearing);
        assert_eq!(opts.file_name(), "core.kiln");
        assert_eq!(CompileOptions::default().file_name(), "NO_SOURCE_PATH");
    }
}
