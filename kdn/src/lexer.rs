//! KDN Lexer
//!
//! Tokenizes source text, tagging every token with its 1-based line and
//! column.

use crate::error::{LexError, LexResult};
use std::iter::Peekable;
use std::str::Chars;

/// Token types for KDN
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
    Char(char),
    Keyword(String),
    Symbol(String),

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBracket,  // [
    RBracket,  // ]
    LBrace,    // {
    RBrace,    // }
    HashBrace, // #{

    // Reader macros
    Quote,    // '
    VarQuote, // #'
    Caret,    // ^
    Discard,  // #_

    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Nil => write!(f, "nil"),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Long(n) => write!(f, "{}", n),
            Token::Double(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Char(c) => write!(f, "\\{}", c),
            Token::Keyword(k) => write!(f, ":{}", k),
            Token::Symbol(s) => write!(f, "{}", s),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::HashBrace => write!(f, "#{{"),
            Token::Quote => write!(f, "'"),
            Token::VarQuote => write!(f, "#'"),
            Token::Caret => write!(f, "^"),
            Token::Discard => write!(f, "#_"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with the position of its first character
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

/// Lexer for KDN source
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire source; the last token is always `Eof`
    pub fn tokenize(&mut self) -> LexResult<Vec<Located>> {
        let mut tokens = Vec::new();
        loop {
            let located = self.next_token()?;
            let done = matches!(located.token, Token::Eof);
            tokens.push(located);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> LexResult<Located> {
        self.skip_whitespace_and_comments();

        let (line, column) = (self.line, self.column);
        let Some(ch) = self.peek_char() else {
            return Ok(Located {
                token: Token::Eof,
                line,
                column,
            });
        };

        let token = match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '\'' => self.single(Token::Quote),
            '^' => self.single(Token::Caret),
            '#' => {
                self.advance();
                match self.peek_char() {
                    Some('{') => self.single(Token::HashBrace),
                    Some('\'') => self.single(Token::VarQuote),
                    Some('_') => self.single(Token::Discard),
                    Some(c) => {
                        return Err(LexError::new(
                            format!("No dispatch macro for: {}", c),
                            line,
                            column,
                        ))
                    }
                    None => return Err(LexError::new("EOF after '#'", line, column)),
                }
            }
            '"' => self.scan_string(line, column)?,
            '\\' => self.scan_char(line, column)?,
            ':' => self.scan_keyword(line, column)?,
            '-' | '+' => {
                self.advance();
                if self
                    .peek_char()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
                {
                    self.scan_number(ch == '-', line, column)?
                } else {
                    self.scan_symbol(ch.to_string())
                }
            }
            c if c.is_ascii_digit() => self.scan_number(false, line, column)?,
            c if is_symbol_start(c) => self.scan_symbol(String::new()),
            c => {
                return Err(LexError::new(
                    format!("unexpected character: '{}'", c),
                    line,
                    column,
                ))
            }
        };

        Ok(Located {
            token,
            line,
            column,
        })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self, line: u32, column: u32) -> LexResult<Token> {
        self.advance();
        let mut s = String::new();

        loop {
            match self.advance() {
                Some('"') => return Ok(Token::Str(s)),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(c) => {
                        return Err(LexError::new(
                            format!("Unsupported escape character: \\{}", c),
                            self.line,
                            self.column,
                        ))
                    }
                    None => return Err(LexError::new("EOF while reading string", line, column)),
                },
                Some(c) => s.push(c),
                None => return Err(LexError::new("EOF while reading string", line, column)),
            }
        }
    }

    fn scan_char(&mut self, line: u32, column: u32) -> LexResult<Token> {
        self.advance();
        let mut name = String::new();
        if let Some(first) = self.advance() {
            name.push(first);
        }
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let c = match name.as_str() {
            "newline" => '\n',
            "space" => ' ',
            "tab" => '\t',
            "return" => '\r',
            _ => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(LexError::new(
                            format!("Unsupported character: \\{}", name),
                            line,
                            column,
                        ))
                    }
                }
            }
        };
        Ok(Token::Char(c))
    }

    fn scan_keyword(&mut self, line: u32, column: u32) -> LexResult<Token> {
        self.advance();
        let mut name = String::new();

        while let Some(c) = self.peek_char() {
            if is_symbol_continue(c) {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if name.is_empty() || name.starts_with(':') || name.ends_with('/') {
            Err(LexError::new(
                format!("Invalid token: :{}", name),
                line,
                column,
            ))
        } else {
            Ok(Token::Keyword(name))
        }
    }

    fn scan_symbol(&mut self, prefix: String) -> Token {
        let mut name = prefix;

        while let Some(c) = self.peek_char() {
            if is_symbol_continue(c) {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match name.as_str() {
            "nil" => Token::Nil,
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            _ => Token::Symbol(name),
        }
    }

    /// Scan a number; a leading sign has already been consumed
    fn scan_number(&mut self, negative: bool, line: u32, column: u32) -> LexResult<Token> {
        let mut s = String::new();
        if negative {
            s.push('-');
        }

        let mut is_double = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                s.push(c);
                self.advance();
            } else if c == '.' && !is_double {
                is_double = true;
                s.push(c);
                self.advance();
            } else if c == 'e' || c == 'E' {
                is_double = true;
                s.push(c);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.peek_char() {
                    s.push(sign);
                    self.advance();
                }
            } else if is_symbol_continue(c) {
                s.push(c);
                self.advance();
                return Err(LexError::new(
                    format!("Invalid number: {}", s),
                    line,
                    column,
                ));
            } else {
                break;
            }
        }

        if is_double {
            s.parse::<f64>()
                .map(Token::Double)
                .map_err(|_| LexError::new(format!("Invalid number: {}", s), line, column))
        } else {
            s.parse::<i64>()
                .map(Token::Long)
                .map_err(|_| LexError::new(format!("Invalid number: {}", s), line, column))
        }
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic()
        || matches!(
            c,
            '_' | '*' | '/' | '!' | '?' | '<' | '>' | '=' | '&' | '.' | '%' | '$' | '|'
        )
}

fn is_symbol_continue(c: char) -> bool {
    is_symbol_start(c) || c.is_ascii_digit() || matches!(c, '-' | '+' | '\'' | ':' | '#')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    fn lex_one(source: &str) -> Token {
        let tokens = lex(source);
        assert_eq!(tokens.len(), 2);
        tokens.into_iter().next().unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(lex_one("nil"), Token::Nil);
        assert_eq!(lex_one("true"), Token::Bool(true));
        assert_eq!(lex_one("42"), Token::Long(42));
        assert_eq!(lex_one("-17"), Token::Long(-17));
        assert_eq!(lex_one("+3"), Token::Long(3));
        assert_eq!(lex_one("2.5"), Token::Double(2.5));
        assert_eq!(lex_one("1e3"), Token::Double(1000.0));
    }

    #[test]
    fn test_symbols() {
        assert_eq!(lex_one("-"), Token::Symbol("-".into()));
        assert_eq!(lex_one("->>"), Token::Symbol("->>".into()));
        assert_eq!(lex_one("Math/abs"), Token::Symbol("Math/abs".into()));
        assert_eq!(lex_one(".toString"), Token::Symbol(".toString".into()));
        assert_eq!(lex_one("StringBuilder."), Token::Symbol("StringBuilder.".into()));
        assert_eq!(lex_one("*out*"), Token::Symbol("*out*".into()));
    }

    #[test]
    fn test_chars_and_strings() {
        assert_eq!(lex_one("\\a"), Token::Char('a'));
        assert_eq!(lex_one("\\newline"), Token::Char('\n'));
        assert_eq!(lex_one("\"a\\tb\""), Token::Str("a\tb".into()));
    }

    #[test]
    fn test_reader_macros() {
        assert_eq!(
            lex("'x #'y ^z #_w #{"),
            vec![
                Token::Quote,
                Token::Symbol("x".into()),
                Token::VarQuote,
                Token::Symbol("y".into()),
                Token::Caret,
                Token::Symbol("z".into()),
                Token::Discard,
                Token::Symbol("w".into()),
                Token::HashBrace,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("(a\n  b)").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn test_errors() {
        assert!(Lexer::new("\"open").tokenize().is_err());
        assert!(Lexer::new("12abc").tokenize().is_err());
        assert!(Lexer::new("#?").tokenize().is_err());
        assert!(Lexer::new(":").tokenize().is_err());
    }
}
