//! # KDN - Kiln Data Notation
//!
//! The form layer shared by the kiln compiler and runtime: symbols,
//! keywords, collections with metadata, hashing, and the reader.
//!
//! ## Example
//!
//! ```rust
//! use kdn::Form;
//!
//! let form = kdn::read_str("(defn sq [^long x] (* x x))").unwrap();
//! let items = form.as_list().unwrap();
//! assert_eq!(items[0], Form::symbol("defn"));
//! assert_eq!(form.line(), Some(1));
//! ```
//!
//! ## Syntax
//!
//! | Form | Syntax |
//! |------|--------|
//! | nil / bool | `nil`, `true`, `false` |
//! | long / double | `42`, `-7`, `2.5`, `1e3` |
//! | char / string | `\a`, `\newline`, `"text"` |
//! | keyword / symbol | `:k`, `:ns/k`, `foo`, `Math/abs` |
//! | list / vector / map / set | `(...)`, `[...]`, `{...}`, `#{...}` |
//! | quote / var | `'x`, `#'x` |
//! | metadata | `^long x`, `^:once f`, `^{:k v} x` |
//! | discard | `#_form` |

mod error;
mod form;
pub mod hash;
mod lexer;
mod reader;

pub use error::{Error, LexError, ReadError, Result};
pub use form::{write_escaped, Coll, Form, Keyword, Meta, Symbol};
pub use lexer::{Lexer, Located, Token};
pub use reader::Reader;

/// Read exactly one form from source
pub fn read_str(source: &str) -> Result<Form> {
    let tokens = Lexer::new(source).tokenize()?;
    Ok(Reader::new(tokens).read_single()?)
}

/// Read every top-level form from source
pub fn read_all(source: &str) -> Result<Vec<Form>> {
    reader(source)?
        .map(|r| r.map_err(Error::from))
        .collect()
}

/// A reader that yields top-level forms one at a time
pub fn reader(source: &str) -> Result<Reader> {
    let tokens = Lexer::new(source).tokenize()?;
    Ok(Reader::new(tokens))
}

/// Read all forms from a file
pub fn read_file(path: &std::path::Path) -> Result<Vec<Form>> {
    let source = std::fs::read_to_string(path)?;
    read_all(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_simple() {
        assert_eq!(read_str("nil").unwrap(), Form::Nil);
        assert_eq!(read_str("42").unwrap(), Form::Long(42));
        assert_eq!(read_str("\"s\"").unwrap(), Form::string("s"));
        assert_eq!(read_str(":k").unwrap(), Form::keyword("k"));
    }

    #[test]
    fn test_read_all() {
        let forms = read_all("(def x 1)\n(inc x)\n").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1].line(), Some(2));
    }

    #[test]
    fn test_error_positions() {
        let err = read_all("(foo\n  [1 2").unwrap_err();
        assert_eq!(err.position(), Some((2, 3)));
        let err = read_str("\"abc").unwrap_err();
        assert!(matches!(err, Error::Lex(_)));
    }

    #[test]
    fn test_display_round_trip() {
        let source = "(let* [x 1 y [2 3]] {:a x, :b #{y}})";
        let form = read_str(source).unwrap();
        assert_eq!(read_str(&form.to_string()).unwrap(), form);
    }
}
