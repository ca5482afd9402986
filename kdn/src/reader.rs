//! KDN Reader
//!
//! Turns a token stream into forms, one top-level form at a time.

use crate::error::{ReadError, ReadResult};
use crate::form::{Form, Meta};
use crate::lexer::{Located, Token};

/// Reader over a tokenized source
pub struct Reader {
    tokens: Vec<Located>,
    pos: usize,
}

impl Reader {
    pub fn new(tokens: Vec<Located>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Read the next top-level form, or `None` at end of input
    pub fn next_form(&mut self) -> ReadResult<Option<Form>> {
        loop {
            match self.peek() {
                Token::Eof => return Ok(None),
                Token::Discard => {
                    self.advance();
                    self.read_form()?;
                }
                _ => return self.read_form().map(Some),
            }
        }
    }

    /// Read exactly one form, rejecting trailing input
    pub fn read_single(&mut self) -> ReadResult<Form> {
        let (line, column) = self.location();
        let form = self
            .next_form()?
            .ok_or_else(|| ReadError::unexpected_eof(line, column))?;
        if self.next_form()?.is_some() {
            let (line, column) = self.location();
            return Err(ReadError::new("trailing input after form", line, column));
        }
        Ok(form)
    }

    fn read_form(&mut self) -> ReadResult<Form> {
        let (line, column) = self.location();
        let token = self.peek().clone();
        match token {
            Token::Nil => self.literal(Form::Nil),
            Token::Bool(b) => self.literal(Form::Bool(b)),
            Token::Long(n) => self.literal(Form::Long(n)),
            Token::Double(d) => self.literal(Form::Double(d)),
            Token::Char(c) => self.literal(Form::Char(c)),
            Token::Str(s) => self.literal(Form::string(s)),
            Token::Keyword(k) => self.literal(Form::keyword(&k)),
            Token::Symbol(s) => {
                self.advance();
                Ok(Form::symbol(&s).with_meta(Some(Meta::at(line, column))))
            }
            Token::LParen => {
                let items = self.read_delimited(Token::RParen, "list")?;
                Ok(Form::list(items).with_meta(Some(Meta::at(line, column))))
            }
            Token::LBracket => {
                let items = self.read_delimited(Token::RBracket, "vector")?;
                Ok(Form::vector(items).with_meta(Some(Meta::at(line, column))))
            }
            Token::HashBrace => {
                let items = self.read_delimited(Token::RBrace, "set")?;
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        return Err(ReadError::new(
                            format!("Duplicate key: {}", item),
                            line,
                            column,
                        ));
                    }
                }
                Ok(Form::set(items).with_meta(Some(Meta::at(line, column))))
            }
            Token::LBrace => {
                let items = self.read_delimited(Token::RBrace, "map")?;
                if items.len() % 2 != 0 {
                    return Err(ReadError::new(
                        "Map literal must contain an even number of forms",
                        line,
                        column,
                    ));
                }
                let mut pairs: Vec<(Form, Form)> = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    if pairs.iter().any(|(existing, _)| *existing == k) {
                        return Err(ReadError::new(
                            format!("Duplicate key: {}", k),
                            line,
                            column,
                        ));
                    }
                    pairs.push((k, v));
                }
                Ok(Form::map(pairs).with_meta(Some(Meta::at(line, column))))
            }
            Token::Quote => {
                self.advance();
                let quoted = self.read_required(line, column)?;
                Ok(Form::list(vec![Form::symbol("quote"), quoted])
                    .with_meta(Some(Meta::at(line, column))))
            }
            Token::VarQuote => {
                self.advance();
                let target = self.read_required(line, column)?;
                Ok(Form::list(vec![Form::symbol("var"), target])
                    .with_meta(Some(Meta::at(line, column))))
            }
            Token::Caret => {
                self.advance();
                let meta_form = self.read_required(line, column)?;
                let extra = match meta_form {
                    Form::Symbol(s) => {
                        let mut m = Meta::new();
                        m.insert(Form::keyword("tag"), Form::Symbol(s.without_meta()));
                        m
                    }
                    Form::Keyword(k) => {
                        let mut m = Meta::new();
                        m.insert(Form::Keyword(k), Form::Bool(true));
                        m
                    }
                    Form::Map(pairs) => Meta::from_pairs(&pairs),
                    _ => {
                        return Err(ReadError::new(
                            "Metadata must be Symbol, Keyword or Map",
                            line,
                            column,
                        ))
                    }
                };
                let target = self.read_required(line, column)?;
                if !matches!(target, Form::Symbol(_)) && !target.is_collection() {
                    return Err(ReadError::new(
                        "Metadata can only be applied to symbols and collections",
                        line,
                        column,
                    ));
                }
                let mut meta = target.meta().cloned().unwrap_or_default();
                meta.merge(&extra);
                Ok(target.with_meta(Some(meta)))
            }
            Token::Discard => {
                self.advance();
                self.read_form()?;
                self.read_form()
            }
            Token::Eof => Err(ReadError::unexpected_eof(line, column)),
            Token::RParen | Token::RBracket | Token::RBrace => Err(ReadError::new(
                format!("Unmatched delimiter: {}", token),
                line,
                column,
            )),
        }
    }

    fn literal(&mut self, form: Form) -> ReadResult<Form> {
        self.advance();
        Ok(form)
    }

    fn read_required(&mut self, line: u32, column: u32) -> ReadResult<Form> {
        if matches!(self.peek(), Token::Eof) {
            return Err(ReadError::unexpected_eof(line, column));
        }
        self.read_form()
    }

    /// Read forms up to `close`; the opening token is still current
    fn read_delimited(&mut self, close: Token, what: &str) -> ReadResult<Vec<Form>> {
        let (line, column) = self.location();
        self.advance();
        let mut items = Vec::new();
        loop {
            match self.peek() {
                t if *t == close => {
                    self.advance();
                    return Ok(items);
                }
                Token::Eof => {
                    return Err(ReadError::new(
                        format!("EOF while reading {}", what),
                        line,
                        column,
                    ))
                }
                Token::Discard => {
                    self.advance();
                    self.read_form()?;
                }
                _ => items.push(self.read_form()?),
            }
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|l| &l.token)
            .unwrap_or(&Token::Eof)
    }

    fn location(&self) -> (u32, u32) {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|l| (l.line, l.column))
            .unwrap_or((1, 1))
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }
}

impl Iterator for Reader {
    type Item = ReadResult<Form>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_form().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn read(source: &str) -> Form {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Reader::new(tokens).read_single().unwrap()
    }

    fn read_err(source: &str) -> ReadError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Reader::new(tokens).read_single().unwrap_err()
    }

    #[test]
    fn test_list_with_position() {
        let form = read("\n  (foo 1 :k)");
        assert_eq!(form.line(), Some(2));
        assert_eq!(form.column(), Some(3));
        let items = form.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], Form::keyword("k"));
    }

    #[test]
    fn test_quote_and_var() {
        assert_eq!(
            read("'x"),
            Form::list(vec![Form::symbol("quote"), Form::symbol("x")])
        );
        assert_eq!(
            read("#'inc"),
            Form::list(vec![Form::symbol("var"), Form::symbol("inc")])
        );
    }

    #[test]
    fn test_metadata_forms() {
        let form = read("^long x");
        let sym = form.as_symbol().unwrap();
        assert_eq!(sym.tag().map(|t| t.name()), Some("long"));

        let form = read("^:once (fn* [] 1)");
        assert!(form.meta().unwrap().flag("once"));
        assert_eq!(form.line(), Some(1));

        let form = read("^{:doc \"d\" :dynamic true} *x*");
        let meta = form.meta().unwrap();
        assert!(meta.flag("dynamic"));
        assert_eq!(meta.get_kw("doc"), Some(&Form::string("d")));
    }

    #[test]
    fn test_discard_and_comments() {
        let form = read("[1 #_2 3] ; trailing");
        assert_eq!(form, Form::vector(vec![Form::Long(1), Form::Long(3)]));
    }

    #[test]
    fn test_iterates_top_level_forms() {
        let tokens = Lexer::new("(def a 1) a #_ignored :done").tokenize().unwrap();
        let forms: Vec<Form> = Reader::new(tokens).map(|f| f.unwrap()).collect();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[2], Form::keyword("done"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(read_err("(1 2").message, "EOF while reading list");
        assert_eq!(read_err(")").message, "Unmatched delimiter: )");
        assert!(read_err("{:a}").message.contains("even number"));
        assert!(read_err("^1 x").message.contains("Metadata must be"));
        assert!(read_err("{:a 1 :a 2}").message.contains("Duplicate key"));
    }
}
