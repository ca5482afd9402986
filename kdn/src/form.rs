//! KDN forms
//!
//! The immutable data model produced by the reader and consumed by the
//! compiler. Symbols and collections may carry metadata; equality and
//! hashing ignore it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::hash;

/// A possibly namespace-qualified symbol
#[derive(Clone)]
pub struct Symbol {
    ns: Option<Arc<str>>,
    name: Arc<str>,
    meta: Option<Arc<Meta>>,
}

impl Symbol {
    /// Unqualified symbol
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            ns: None,
            name: Arc::from(name.as_ref()),
            meta: None,
        }
    }

    /// Namespace-qualified symbol
    pub fn qualified(ns: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            ns: Some(Arc::from(ns.as_ref())),
            name: Arc::from(name.as_ref()),
            meta: None,
        }
    }

    /// Split `ns/name` at the first slash. A lone `/` is the division symbol.
    pub fn parse(text: &str) -> Self {
        match text.find('/') {
            Some(i) if text != "/" && i > 0 && i + 1 < text.len() => {
                Self::qualified(&text[..i], &text[i + 1..])
            }
            _ => Self::new(text),
        }
    }

    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Meta) -> Self {
        Self {
            ns: self.ns.clone(),
            name: self.name.clone(),
            meta: Some(Arc::new(meta)),
        }
    }

    pub fn without_meta(&self) -> Self {
        Self {
            ns: self.ns.clone(),
            name: self.name.clone(),
            meta: None,
        }
    }

    /// The `:tag` metadata entry, if it names a symbol (`^long x`)
    pub fn tag(&self) -> Option<&Symbol> {
        self.meta().and_then(|m| m.tag())
    }

    pub fn is_qualified(&self) -> bool {
        self.ns.is_some()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A keyword (`:foo`, `:ns/foo`)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Keyword {
    ns: Option<Arc<str>>,
    name: Arc<str>,
}

impl Keyword {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            ns: None,
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn qualified(ns: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            ns: Some(Arc::from(ns.as_ref())),
            name: Arc::from(name.as_ref()),
        }
    }

    /// Parse the text after the leading colon
    pub fn parse(text: &str) -> Self {
        let sym = Symbol::parse(text);
        match sym.ns() {
            Some(ns) => Self::qualified(ns, sym.name()),
            None => Self::new(sym.name()),
        }
    }

    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

/// Form metadata: source position plus arbitrary entries
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meta {
    pub line: Option<u32>,
    pub column: Option<u32>,
    entries: Vec<(Form, Form)>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(line: u32, column: u32) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &Form) -> Option<&Form> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up an unqualified keyword entry
    pub fn get_kw(&self, name: &str) -> Option<&Form> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Form::Keyword(kw) if kw.ns().is_none() && kw.name() == name))
            .map(|(_, v)| v)
    }

    /// True when `:name` is present and truthy
    pub fn flag(&self, name: &str) -> bool {
        self.get_kw(name).map(Form::is_truthy).unwrap_or(false)
    }

    pub fn tag(&self) -> Option<&Symbol> {
        match self.get_kw("tag") {
            Some(Form::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: Form, value: Form) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Entries of `other` override ours; positions are kept unless `other` has them
    pub fn merge(&mut self, other: &Meta) {
        for (k, v) in &other.entries {
            self.insert(k.clone(), v.clone());
        }
        if other.line.is_some() {
            self.line = other.line;
            self.column = other.column;
        }
    }

    pub fn entries(&self) -> &[(Form, Form)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.line.is_none()
    }

    /// All entries as a map form, including `:line`/`:column`
    pub fn to_form(&self) -> Form {
        let mut pairs = Vec::new();
        if let Some(line) = self.line {
            pairs.push((Form::keyword("line"), Form::Long(line as i64)));
        }
        if let Some(column) = self.column {
            pairs.push((Form::keyword("column"), Form::Long(column as i64)));
        }
        pairs.extend(self.entries.iter().cloned());
        Form::map(pairs)
    }

    /// Build metadata from a map form, lifting `:line`/`:column` out
    pub fn from_pairs(pairs: &[(Form, Form)]) -> Self {
        let mut meta = Meta::new();
        for (k, v) in pairs {
            match (k, v) {
                (Form::Keyword(kw), Form::Long(n)) if kw.ns().is_none() && kw.name() == "line" => {
                    meta.line = Some(*n as u32)
                }
                (Form::Keyword(kw), Form::Long(n))
                    if kw.ns().is_none() && kw.name() == "column" =>
                {
                    meta.column = Some(*n as u32)
                }
                _ => meta.insert(k.clone(), v.clone()),
            }
        }
        meta
    }
}

/// An immutable collection body with optional metadata
#[derive(Clone, Debug)]
pub struct Coll<T> {
    items: Arc<[T]>,
    meta: Option<Arc<Meta>>,
}

impl<T> Coll<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::from(items),
            meta: None,
        }
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Option<Meta>) -> Self {
        Self {
            items: self.items.clone(),
            meta: meta.map(Arc::new),
        }
    }
}

impl<T> Deref for Coll<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

/// A form as produced by the reader
#[derive(Clone, Debug)]
pub enum Form {
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    Char(char),
    Str(Arc<str>),
    Keyword(Keyword),
    Symbol(Symbol),
    List(Coll<Form>),
    Vector(Coll<Form>),
    Map(Coll<(Form, Form)>),
    Set(Coll<Form>),
}

impl Form {
    pub fn symbol(text: &str) -> Form {
        Form::Symbol(Symbol::parse(text))
    }

    pub fn keyword(text: &str) -> Form {
        Form::Keyword(Keyword::parse(text))
    }

    pub fn string(text: impl AsRef<str>) -> Form {
        Form::Str(Arc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Form>) -> Form {
        Form::List(Coll::new(items))
    }

    pub fn vector(items: Vec<Form>) -> Form {
        Form::Vector(Coll::new(items))
    }

    pub fn map(pairs: Vec<(Form, Form)>) -> Form {
        Form::Map(Coll::new(pairs))
    }

    pub fn set(items: Vec<Form>) -> Form {
        Form::Set(Coll::new(items))
    }

    /// Everything except nil and false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Form::Nil | Form::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Form::Nil)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Form::List(_) | Form::Vector(_) | Form::Map(_) | Form::Set(_)
        )
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Form::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Form::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match self {
            Form::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Form]> {
        match self {
            Form::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Form::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for a list whose head is the unqualified symbol `name`
    pub fn is_call_to(&self, name: &str) -> bool {
        match self.as_list().and_then(|items| items.first()) {
            Some(Form::Symbol(s)) => s.ns().is_none() && s.name() == name,
            _ => false,
        }
    }

    pub fn meta(&self) -> Option<&Meta> {
        match self {
            Form::Symbol(s) => s.meta(),
            Form::List(c) | Form::Vector(c) | Form::Set(c) => c.meta(),
            Form::Map(c) => c.meta(),
            _ => None,
        }
    }

    /// Replace metadata on symbols and collections; other forms are returned as is
    pub fn with_meta(&self, meta: Option<Meta>) -> Form {
        match self {
            Form::Symbol(s) => match meta {
                Some(m) => Form::Symbol(s.with_meta(m)),
                None => Form::Symbol(s.without_meta()),
            },
            Form::List(c) => Form::List(c.with_meta(meta)),
            Form::Vector(c) => Form::Vector(c.with_meta(meta)),
            Form::Set(c) => Form::Set(c.with_meta(meta)),
            Form::Map(c) => Form::Map(c.with_meta(meta)),
            other => other.clone(),
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.meta().and_then(|m| m.line)
    }

    pub fn column(&self) -> Option<u32> {
        self.meta().and_then(|m| m.column)
    }

    /// Host-facing type name, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Form::Nil => "nil",
            Form::Bool(_) => "Boolean",
            Form::Long(_) => "Long",
            Form::Double(_) => "Double",
            Form::Char(_) => "Character",
            Form::Str(_) => "String",
            Form::Keyword(_) => "Keyword",
            Form::Symbol(_) => "Symbol",
            Form::List(_) => "PersistentList",
            Form::Vector(_) => "PersistentVector",
            Form::Map(_) => "PersistentMap",
            Form::Set(_) => "PersistentSet",
        }
    }

    /// Hash consistent with `=`
    pub fn hasheq(&self) -> i32 {
        match self {
            Form::Nil => 0,
            Form::Bool(b) => hash::hash_bool(*b),
            Form::Long(n) => hash::hash_long(*n),
            Form::Double(d) => hash::hash_double(*d),
            Form::Char(c) => *c as i32,
            Form::Str(s) => hash::hash_str(s),
            Form::Keyword(k) => hash::hash_keyword(k.ns(), k.name()),
            Form::Symbol(s) => hash::hash_symbol(s.ns(), s.name()),
            Form::List(items) | Form::Vector(items) => {
                hash::hash_ordered(items.iter().map(Form::hasheq))
            }
            Form::Set(items) => hash::hash_unordered(items.iter().map(Form::hasheq)),
            Form::Map(pairs) => hash::hash_unordered(
                pairs
                    .iter()
                    .map(|(k, v)| hash::hash_ordered([k.hasheq(), v.hasheq()].into_iter())),
            ),
        }
    }
}

impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Form::Nil, Form::Nil) => true,
            (Form::Bool(a), Form::Bool(b)) => a == b,
            (Form::Long(a), Form::Long(b)) => a == b,
            (Form::Double(a), Form::Double(b)) => a == b,
            (Form::Char(a), Form::Char(b)) => a == b,
            (Form::Str(a), Form::Str(b)) => a == b,
            (Form::Keyword(a), Form::Keyword(b)) => a == b,
            (Form::Symbol(a), Form::Symbol(b)) => a == b,
            (Form::List(a) | Form::Vector(a), Form::List(b) | Form::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Form::Set(a), Form::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x == y))
            }
            (Form::Map(a), Form::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            _ => false,
        }
    }
}

impl Eq for Form {}

impl Hash for Form {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hasheq());
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Form::Nil => write!(f, "nil"),
            Form::Bool(b) => write!(f, "{}", b),
            Form::Long(n) => write!(f, "{}", n),
            Form::Double(d) => {
                if d.is_finite() && d.fract() == 0.0 {
                    write!(f, "{:.1}", d)
                } else {
                    write!(f, "{}", d)
                }
            }
            Form::Char(c) => match c {
                '\n' => write!(f, "\\newline"),
                ' ' => write!(f, "\\space"),
                '\t' => write!(f, "\\tab"),
                c => write!(f, "\\{}", c),
            },
            Form::Str(s) => write_escaped(f, s),
            Form::Keyword(k) => write!(f, "{}", k),
            Form::Symbol(s) => write!(f, "{}", s),
            Form::List(items) => write_seq(f, "(", items, ")"),
            Form::Vector(items) => write_seq(f, "[", items, "]"),
            Form::Set(items) => write_seq(f, "#{", items, "}"),
            Form::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Form], close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// Write a string literal with reader escapes
pub fn write_escaped(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse() {
        let s = Symbol::parse("Math/abs");
        assert_eq!(s.ns(), Some("Math"));
        assert_eq!(s.name(), "abs");

        let div = Symbol::parse("/");
        assert_eq!(div.ns(), None);
        assert_eq!(div.name(), "/");

        let plain = Symbol::parse("foo.bar");
        assert_eq!(plain.ns(), None);
    }

    #[test]
    fn test_equality_ignores_meta() {
        let a = Symbol::new("x").with_meta(Meta::at(3, 4));
        assert_eq!(a, Symbol::new("x"));
        let tagged = Form::list(vec![Form::Long(1)]).with_meta(Some(Meta::at(1, 1)));
        assert_eq!(tagged, Form::list(vec![Form::Long(1)]));
    }

    #[test]
    fn test_sequential_equality() {
        let list = Form::list(vec![Form::Long(1), Form::Long(2)]);
        let vec = Form::vector(vec![Form::Long(1), Form::Long(2)]);
        assert_eq!(list, vec);
        assert_eq!(list.hasheq(), vec.hasheq());
        assert_ne!(Form::Long(1), Form::Double(1.0));
    }

    #[test]
    fn test_map_equality_is_unordered() {
        let a = Form::map(vec![
            (Form::keyword("a"), Form::Long(1)),
            (Form::keyword("b"), Form::Long(2)),
        ]);
        let b = Form::map(vec![
            (Form::keyword("b"), Form::Long(2)),
            (Form::keyword("a"), Form::Long(1)),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.hasheq(), b.hasheq());
    }

    #[test]
    fn test_meta_flags_and_tag() {
        let mut meta = Meta::new();
        meta.insert(Form::keyword("once"), Form::Bool(true));
        meta.insert(Form::keyword("tag"), Form::symbol("long"));
        assert!(meta.flag("once"));
        assert!(!meta.flag("dynamic"));
        assert_eq!(meta.tag().map(|s| s.name()), Some("long"));
    }

    #[test]
    fn test_display() {
        let form = Form::list(vec![
            Form::symbol("str"),
            Form::string("a\"b"),
            Form::Double(2.0),
            Form::Char('x'),
        ]);
        assert_eq!(form.to_string(), "(str \"a\\\"b\" 2.0 \\x)");
    }
}
