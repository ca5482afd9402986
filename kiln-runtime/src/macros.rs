//! Built-in macros
//!
//! Implemented natively over forms. Each receives the whole call form and
//! its arguments and returns the expansion; the compiler re-expands the
//! result until it reaches a special form or a plain invocation.

use std::sync::Arc;

use kdn::{Form, Meta, Symbol};

use crate::core::next_gensym_id;
use crate::runtime::{Runtime, CORE_NS};
use crate::value::{NativeFn, NativeKind, NativeMacroPtr, Value};

type Expansion = Result<Form, String>;

fn sym(name: &str) -> Form {
    Form::Symbol(Symbol::new(name))
}

fn call(head: &str, args: impl IntoIterator<Item = Form>) -> Form {
    let mut items = vec![sym(head)];
    items.extend(args);
    Form::list(items)
}

fn quote(form: Form) -> Form {
    call("quote", [form])
}

fn gensym(prefix: &str) -> Form {
    sym(&format!("{}__{}__auto__", prefix, next_gensym_id()))
}

fn do_body(body: &[Form]) -> Form {
    match body {
        [single] => single.clone(),
        _ => call("do", body.iter().cloned()),
    }
}

fn expect_symbol<'a>(form: &'a Form, what: &str) -> Result<&'a Symbol, String> {
    form.as_symbol()
        .ok_or_else(|| format!("{} must be a symbol, got {}", what, form.type_name()))
}

fn expect_vector<'a>(form: Option<&'a Form>, what: &str) -> Result<&'a [Form], String> {
    form.and_then(Form::as_vector)
        .ok_or_else(|| format!("{} requires a vector for its binding", what))
}

fn min_args(args: &[Form], n: usize, name: &str) -> Result<(), String> {
    if args.len() < n {
        return Err(format!(
            "Wrong number of args ({}) passed to: {}",
            args.len(),
            name
        ));
    }
    Ok(())
}

/// Rename the head of a form, keeping its arguments and metadata
fn rename(form: &Form, args: &[Form], to: &str) -> Form {
    let mut items = vec![sym(to)];
    items.extend(args.iter().cloned());
    Form::list(items).with_meta(form.meta().cloned())
}

// ========== Definitions ==========

/// Split `name doc? attr-map? body...` into the name symbol with merged
/// metadata and the remaining forms
fn definition_header<'a>(args: &'a [Form], what: &str) -> Result<(Symbol, &'a [Form]), String> {
    min_args(args, 1, what)?;
    let name = expect_symbol(&args[0], "First argument to def")?;
    let mut meta = name.meta().cloned().unwrap_or_default();
    let mut rest = &args[1..];
    if let [Form::Str(doc), tail @ ..] = rest {
        if !tail.is_empty() {
            meta.insert(Form::keyword("doc"), Form::Str(doc.clone()));
            rest = tail;
        }
    }
    if let [Form::Map(attrs), tail @ ..] = rest {
        if !tail.is_empty() {
            meta.merge(&Meta::from_pairs(attrs));
            rest = tail;
        }
    }
    Ok((name.with_meta(meta), rest))
}

/// Normalize `[params] body...` or `([params] body...)+` into arity lists
fn arities(rest: &[Form]) -> Result<Vec<Vec<Form>>, String> {
    match rest.first() {
        Some(Form::Vector(_)) => Ok(vec![rest.to_vec()]),
        Some(Form::List(_)) => rest
            .iter()
            .map(|f| {
                f.as_list()
                    .filter(|items| matches!(items.first(), Some(Form::Vector(_))))
                    .map(<[Form]>::to_vec)
                    .ok_or_else(|| "Parameter declaration missing".to_string())
            })
            .collect(),
        _ => Err("Parameter declaration missing".to_string()),
    }
}

fn fn_form(name: &Symbol, arities: Vec<Vec<Form>>) -> Form {
    let mut items = vec![sym("fn*"), Form::Symbol(name.without_meta())];
    items.extend(arities.into_iter().map(Form::list));
    Form::list(items)
}

fn defn(_: &Form, args: &[Form]) -> Expansion {
    let (name, rest) = definition_header(args, "defn")?;
    let fun = fn_form(&name, arities(rest)?);
    Ok(call("def", [Form::Symbol(name), fun]))
}

/// Macro functions take the calling form and the local environment
/// ahead of their declared parameters
fn defmacro(_: &Form, args: &[Form]) -> Expansion {
    let (name, rest) = definition_header(args, "defmacro")?;
    let arities = arities(rest)?
        .into_iter()
        .map(|mut arity| {
            let mut params = vec![sym("&form"), sym("&env")];
            params.extend(arity[0].as_vector().unwrap_or_default().iter().cloned());
            arity[0] = Form::vector(params);
            arity
        })
        .collect();
    let mut meta = name.meta().cloned().unwrap_or_default();
    meta.insert(Form::keyword("macro"), Form::Bool(true));
    let name = name.with_meta(meta);
    let fun = fn_form(&name, arities);
    Ok(call("def", [Form::Symbol(name), fun]))
}

fn declare(_: &Form, args: &[Form]) -> Expansion {
    Ok(call("do", args.iter().map(|name| call("def", [name.clone()]))))
}

// ========== Conditionals ==========

fn when(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "when")?;
    Ok(call("if", [args[0].clone(), do_body(&args[1..])]))
}

fn when_not(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "when-not")?;
    Ok(call("if", [args[0].clone(), Form::Nil, do_body(&args[1..])]))
}

fn if_not(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 2, "if-not")?;
    let otherwise = args.get(2).cloned().unwrap_or(Form::Nil);
    Ok(call("if", [args[0].clone(), otherwise, args[1].clone()]))
}

fn cond(_: &Form, args: &[Form]) -> Expansion {
    if args.len() % 2 != 0 {
        return Err("cond requires an even number of forms".into());
    }
    Ok(args.chunks(2).rev().fold(Form::Nil, |otherwise, clause| {
        call("if", [clause[0].clone(), clause[1].clone(), otherwise])
    }))
}

fn and(_: &Form, args: &[Form]) -> Expansion {
    Ok(match args {
        [] => Form::Bool(true),
        [only] => only.clone(),
        [first, rest @ ..] => {
            let g = gensym("and");
            call(
                "let*",
                [
                    Form::vector(vec![g.clone(), first.clone()]),
                    call("if", [g.clone(), call("and", rest.iter().cloned()), g]),
                ],
            )
        }
    })
}

fn or(_: &Form, args: &[Form]) -> Expansion {
    Ok(match args {
        [] => Form::Nil,
        [only] => only.clone(),
        [first, rest @ ..] => {
            let g = gensym("or");
            call(
                "let*",
                [
                    Form::vector(vec![g.clone(), first.clone()]),
                    call("if", [g.clone(), g, call("or", rest.iter().cloned())]),
                ],
            )
        }
    })
}

fn conditional_binding(args: &[Form], what: &str) -> Result<(Form, Form), String> {
    min_args(args, 2, what)?;
    match expect_vector(args.first(), what)? {
        [name, test] => Ok((name.clone(), test.clone())),
        _ => Err(format!("{} requires exactly 2 forms in binding vector", what)),
    }
}

fn if_let(_: &Form, args: &[Form]) -> Expansion {
    let (name, test) = conditional_binding(args, "if-let")?;
    let g = gensym("temp");
    let then = call("let*", [Form::vector(vec![name, g.clone()]), args[1].clone()]);
    let otherwise = args.get(2).cloned().unwrap_or(Form::Nil);
    Ok(call(
        "let*",
        [
            Form::vector(vec![g.clone(), test]),
            call("if", [g, then, otherwise]),
        ],
    ))
}

fn when_let(_: &Form, args: &[Form]) -> Expansion {
    let (name, test) = conditional_binding(args, "when-let")?;
    let g = gensym("temp");
    let mut then = vec![sym("let*"), Form::vector(vec![name, g.clone()])];
    then.extend(args[1..].iter().cloned());
    Ok(call(
        "let*",
        [
            Form::vector(vec![g.clone(), test]),
            call("if", [g, Form::list(then)]),
        ],
    ))
}

/// `(case e test then ... default?)` binds `e` once and hands off to `case*`
fn case(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "case")?;
    let g = gensym("case");
    let mut body = vec![sym("case*"), g.clone()];
    body.extend(args[1..].iter().cloned());
    Ok(call(
        "let*",
        [Form::vector(vec![g, args[0].clone()]), Form::list(body)],
    ))
}

// ========== Threading ==========

fn thread(args: &[Form], last: bool) -> Form {
    let mut acc = args[0].clone();
    for step in &args[1..] {
        acc = match step {
            Form::List(items) if !items.is_empty() => {
                let mut next: Vec<Form> = items.to_vec();
                if last {
                    next.push(acc);
                } else {
                    next.insert(1, acc);
                }
                Form::list(next).with_meta(step.meta().cloned())
            }
            other => Form::list(vec![other.clone(), acc]),
        };
    }
    acc
}

fn thread_first(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "->")?;
    Ok(thread(args, false))
}

fn thread_last(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "->>")?;
    Ok(thread(args, true))
}

// ========== Binding forms ==========

fn let_(form: &Form, args: &[Form]) -> Expansion {
    expect_vector(args.first(), "let")?;
    Ok(rename(form, args, "let*"))
}

fn loop_(form: &Form, args: &[Form]) -> Expansion {
    expect_vector(args.first(), "loop")?;
    Ok(rename(form, args, "loop*"))
}

fn fn_(form: &Form, args: &[Form]) -> Expansion {
    Ok(rename(form, args, "fn*"))
}

/// `(letfn [(f [x] ...) ...] body)` to `(letfn* [f (fn* f [x] ...) ...] body)`
fn letfn(_: &Form, args: &[Form]) -> Expansion {
    let specs = expect_vector(args.first(), "letfn")?;
    let mut bindings = Vec::with_capacity(specs.len() * 2);
    for spec in specs {
        let items = spec
            .as_list()
            .ok_or_else(|| "letfn bindings must be function specs".to_string())?;
        let name = expect_symbol(
            items.first().unwrap_or(&Form::Nil),
            "letfn function name",
        )?;
        let mut fun = vec![sym("fn*")];
        fun.extend(items.iter().cloned());
        bindings.push(Form::Symbol(name.clone()));
        bindings.push(Form::list(fun));
    }
    let mut out = vec![sym("letfn*"), Form::vector(bindings)];
    out.extend(args[1..].iter().cloned());
    Ok(Form::list(out))
}

/// Dynamic rebinding, popped in a finally clause
fn binding(_: &Form, args: &[Form]) -> Expansion {
    let pairs = expect_vector(args.first(), "binding")?;
    if pairs.len() % 2 != 0 {
        return Err("binding requires an even number of forms in binding vector".into());
    }
    let map = call(
        "hash-map",
        pairs
            .chunks(2)
            .flat_map(|kv| [call("var", [kv[0].clone()]), kv[1].clone()]),
    );
    let mut body = vec![sym("try")];
    body.extend(args[1..].iter().cloned());
    body.push(call("finally", [call("pop-thread-bindings", [])]));
    Ok(call(
        "do",
        [call("push-thread-bindings", [map]), Form::list(body)],
    ))
}

fn dotimes(_: &Form, args: &[Form]) -> Expansion {
    let binding = expect_vector(args.first(), "dotimes")?;
    let [i, n] = binding else {
        return Err("dotimes requires exactly 2 forms in binding vector".into());
    };
    let limit = gensym("n");
    let mut body: Vec<Form> = args[1..].to_vec();
    body.push(call("recur", [call("inc", [i.clone()])]));
    Ok(call(
        "let*",
        [
            Form::vector(vec![limit.clone(), call("long", [n.clone()])]),
            call(
                "loop*",
                [
                    Form::vector(vec![i.clone(), Form::Long(0)]),
                    call(
                        "if",
                        [call("<", [i.clone(), limit]), call("do", body)],
                    ),
                ],
            ),
        ],
    ))
}

fn comment(_: &Form, _: &[Form]) -> Expansion {
    Ok(Form::Nil)
}

// ========== Protocols and types ==========

/// `(defprotocol P "doc"? (m [this] [this a]) ...)`
fn defprotocol(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "defprotocol")?;
    let name = expect_symbol(&args[0], "Protocol name")?.without_meta();
    let mut methods = Vec::new();
    for sig in &args[1..] {
        match sig {
            Form::Str(_) => continue,
            Form::List(items) => {
                let m = expect_symbol(items.first().unwrap_or(&Form::Nil), "Protocol method name")?;
                methods.push(m.without_meta());
            }
            other => {
                return Err(format!(
                    "Invalid protocol method signature: {}",
                    other
                ))
            }
        }
    }
    let method_forms: Vec<Form> = methods.iter().cloned().map(Form::Symbol).collect();
    let mut out = vec![
        sym("do"),
        call(
            "def",
            [
                Form::Symbol(name.clone()),
                call(
                    "-make-protocol",
                    [quote(Form::Symbol(name.clone())), quote(Form::vector(method_forms))],
                ),
            ],
        ),
    ];
    for m in methods {
        let mut meta = Meta::new();
        meta.insert(Form::keyword("protocol"), Form::Symbol(name.clone()));
        out.push(call(
            "def",
            [
                Form::Symbol(m.with_meta(meta)),
                call(
                    "-protocol-method",
                    [Form::Symbol(name.clone()), quote(Form::Symbol(m))],
                ),
            ],
        ));
    }
    out.push(Form::Symbol(name));
    Ok(Form::list(out))
}

/// Split `Proto (m ...) (m ...) Proto2 ...` into per-protocol method specs
fn protocol_specs(forms: &[Form]) -> Result<Vec<(Form, Vec<&[Form]>)>, String> {
    let mut specs: Vec<(Form, Vec<&[Form]>)> = Vec::new();
    for f in forms {
        match f {
            Form::Symbol(_) => specs.push((f.clone(), Vec::new())),
            Form::List(items) => match specs.last_mut() {
                Some((_, methods)) => methods.push(items),
                None => return Err("Method implementation must follow a protocol name".into()),
            },
            other => return Err(format!("Invalid protocol implementation: {}", other)),
        }
    }
    Ok(specs)
}

/// `(extend-type T P (m [this] ...) ...)` to `extend` calls with a map of fns
fn extend_type(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 1, "extend-type")?;
    let target = args[0].clone();
    let mut out = vec![sym("do")];
    for (proto, methods) in protocol_specs(&args[1..])? {
        let mut grouped: Vec<(Symbol, Vec<Form>)> = Vec::new();
        for m in methods {
            let name = expect_symbol(m.first().unwrap_or(&Form::Nil), "Method name")?;
            let arity = Form::list(m[1..].to_vec());
            match grouped.iter_mut().find(|(n, _)| *n == *name) {
                Some((_, arities)) => arities.push(arity),
                None => grouped.push((name.without_meta(), vec![arity])),
            }
        }
        let impls = grouped
            .into_iter()
            .map(|(name, arities)| {
                let mut fun = vec![sym("fn*"), Form::Symbol(name.clone())];
                fun.extend(arities);
                (Form::keyword(name.name()), Form::list(fun))
            })
            .collect();
        out.push(call("extend", [target.clone(), proto, Form::map(impls)]));
    }
    Ok(Form::list(out))
}

/// `(deftype Name [fields] P (m [this] ...) ...)` defines the type and a
/// positional factory `->Name`
fn deftype(_: &Form, args: &[Form]) -> Expansion {
    min_args(args, 2, "deftype")?;
    let name = expect_symbol(&args[0], "Type name")?.without_meta();
    let fields = expect_vector(args.get(1), "deftype")?;
    protocol_specs(&args[2..])?;
    let mut def_type = vec![sym("deftype*")];
    def_type.extend(args.iter().cloned());
    let params: Vec<Form> = fields
        .iter()
        .map(|f| match f {
            Form::Symbol(s) => Ok(Form::Symbol(s.without_meta())),
            other => Err(format!("deftype fields must be symbols, got {}", other)),
        })
        .collect::<Result<_, _>>()?;
    let factory = Symbol::new(format!("->{}", name.name()));
    let mut ctor = vec![sym("new"), Form::Symbol(name.clone())];
    ctor.extend(params.iter().cloned());
    Ok(call(
        "do",
        [
            Form::list(def_type),
            call(
                "def",
                [
                    Form::Symbol(factory.clone()),
                    call(
                        "fn*",
                        [
                            Form::Symbol(factory),
                            Form::list(vec![Form::vector(params), Form::list(ctor)]),
                        ],
                    ),
                ],
            ),
            Form::Symbol(name),
        ],
    ))
}

/// `(reify P (m [this] ...) Q ...)` to `(reify* [P Q] (m [this] ...) ...)`
fn reify(_: &Form, args: &[Form]) -> Expansion {
    let specs = protocol_specs(args)?;
    let mut out = vec![sym("reify*")];
    out.push(Form::vector(specs.iter().map(|(p, _)| p.clone()).collect()));
    for (_, methods) in specs {
        out.extend(methods.into_iter().map(|m| Form::list(m.to_vec())));
    }
    Ok(Form::list(out))
}

const MACROS: &[(&str, NativeMacroPtr)] = &[
    ("defn", defn),
    ("defmacro", defmacro),
    ("declare", declare),
    ("when", when),
    ("when-not", when_not),
    ("if-not", if_not),
    ("cond", cond),
    ("and", and),
    ("or", or),
    ("if-let", if_let),
    ("when-let", when_let),
    ("case", case),
    ("->", thread_first),
    ("->>", thread_last),
    ("let", let_),
    ("loop", loop_),
    ("fn", fn_),
    ("letfn", letfn),
    ("binding", binding),
    ("dotimes", dotimes),
    ("comment", comment),
    ("defprotocol", defprotocol),
    ("extend-type", extend_type),
    ("deftype", deftype),
    ("reify", reify),
];

pub fn install(rt: &Runtime) {
    for (name, expand) in MACROS {
        let var = rt.intern(CORE_NS, name);
        var.bind_root(Value::Native(Arc::new(NativeFn {
            name: *name,
            kind: NativeKind::Macro(*expand),
        })));
        var.set_macro(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(source: &str) -> Form {
        let form = kdn::read_str(source).unwrap();
        let items = form.as_list().unwrap();
        let head = items[0].as_symbol().unwrap().name().to_string();
        let (_, f) = MACROS.iter().find(|(n, _)| *n == head).unwrap();
        f(&form, &items[1..]).unwrap()
    }

    fn read(source: &str) -> Form {
        kdn::read_str(source).unwrap()
    }

    #[test]
    fn test_defn_single_and_multi_arity() {
        assert_eq!(
            expand("(defn f [x] (inc x))"),
            read("(def f (fn* f ([x] (inc x))))")
        );
        assert_eq!(
            expand("(defn f \"doc\" ([] 0) ([x] x))"),
            read("(def f (fn* f ([] 0) ([x] x)))")
        );
        let def = expand("(defn f \"doc\" [x] x)");
        let name = def.as_list().unwrap()[1].meta().unwrap().clone();
        assert_eq!(name.get_kw("doc"), Some(&Form::string("doc")));
    }

    #[test]
    fn test_defmacro_adds_form_and_env() {
        let def = expand("(defmacro unless [c a b] (list 'if c b a))");
        let items = def.as_list().unwrap();
        assert!(items[1].meta().unwrap().flag("macro"));
        assert_eq!(
            items[2],
            read("(fn* unless ([&form &env c a b] (list (quote if) c b a)))")
        );
    }

    #[test]
    fn test_cond_nests_ifs() {
        assert_eq!(
            expand("(cond a 1 b 2)"),
            read("(if a 1 (if b 2 nil))")
        );
    }

    #[test]
    fn test_threading() {
        assert_eq!(expand("(-> x (f 1) g)"), read("(g (f x 1))"));
        assert_eq!(expand("(->> x (f 1) g)"), read("(g (f 1 x))"));
    }

    #[test]
    fn test_case_binds_expression_once() {
        let out = expand("(case (f) 1 :a :b)");
        let items = out.as_list().unwrap();
        assert_eq!(items[0], sym("let*"));
        let body = items[2].as_list().unwrap();
        assert_eq!(body[0], sym("case*"));
        assert_eq!(body.len(), 5);
    }

    #[test]
    fn test_defprotocol_marks_method_vars() {
        let out = expand("(defprotocol Shape (area [s]) (scale [s k]))");
        let items = out.as_list().unwrap();
        assert_eq!(items.len(), 5);
        let area = items[2].as_list().unwrap();
        let meta = area[1].meta().unwrap();
        assert_eq!(meta.get_kw("protocol"), Some(&Form::symbol("Shape")));
    }

    #[test]
    fn test_extend_type_groups_arities() {
        assert_eq!(
            expand("(extend-type Long Shape (area [n] n) (area [n k] k))"),
            read("(do (extend Long Shape {:area (fn* area ([n] n) ([n k] k))}))")
        );
    }

    #[test]
    fn test_deftype_defines_factory() {
        let out = expand("(deftype Point [x ^:unsynchronized-mutable y])");
        let items = out.as_list().unwrap();
        assert!(items[1].is_call_to("deftype*"));
        assert_eq!(
            items[2],
            read("(def ->Point (fn* ->Point ([x y] (new Point x y))))")
        );
    }

    #[test]
    fn test_reify_collects_protocols() {
        assert_eq!(
            expand("(reify Shape (area [this] 1) Named (label [this] :x))"),
            read("(reify* [Shape Named] (area [this] 1) (label [this] :x))")
        );
    }

    #[test]
    fn test_odd_cond_is_an_error() {
        let form = read("(cond a)");
        assert!(cond(&form, &form.as_list().unwrap()[1..]).is_err());
    }
}
