//! Opaque JavaScript fragments for map/reduce jobs.
//!
//! The planner never parses or simplifies JavaScript; it only *builds*
//! functions -- composing user-supplied map/flat-map bodies and emitting the
//! small wrappers a map/reduce job needs. [`Js`] is therefore a minimal AST
//! with a verbatim [`Js::Raw`] escape hatch, rendered to source text by
//! `Display`.
//!
//! Conventions (relied on by the fusion templates): a map function takes the
//! current key, sees the document as `this`, and returns `[newKey, newValue]`;
//! a flat-map returns an array of such pairs; a reduce takes
//! `(key, values[])` and returns a single value.

use std::fmt;

/// A JavaScript expression or statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Js {
    /// Verbatim source text, trusted as-is.
    Raw(String),
    This,
    Null,
    Num(i64),
    Str(String),
    Ident(String),
    /// Member access, `base.name`.
    Select(Box<Js>, String),
    /// Computed access, `base[index]`.
    At(Box<Js>, Box<Js>),
    /// Invocation, `callee(args…)`.
    Call(Box<Js>, Vec<Js>),
    /// Anonymous function: parameter names and body statements.
    Fun(Vec<String>, Vec<Js>),
    Return(Box<Js>),
    VarDecl(String, Box<Js>),
    Arr(Vec<Js>),
}

impl Js {
    pub fn ident(n: impl Into<String>) -> Js {
        Js::Ident(n.into())
    }

    #[must_use]
    pub fn select(self, name: &str) -> Js {
        Js::Select(Box::new(self), name.to_string())
    }

    #[must_use]
    pub fn at(self, index: Js) -> Js {
        Js::At(Box::new(self), Box::new(index))
    }

    #[must_use]
    pub fn call(self, args: Vec<Js>) -> Js {
        Js::Call(Box::new(self), args)
    }

    /// True when rendering in head position needs wrapping parentheses.
    fn needs_parens(&self) -> bool {
        matches!(self, Js::Fun(_, _) | Js::Raw(_))
    }

    fn fmt_base(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_parens() {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Js {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Js::Raw(src) => write!(f, "{src}"),
            Js::This => write!(f, "this"),
            Js::Null => write!(f, "null"),
            Js::Num(n) => write!(f, "{n}"),
            Js::Str(s) => write!(f, "{s:?}"),
            Js::Ident(n) => write!(f, "{n}"),
            Js::Select(base, name) => {
                base.fmt_base(f)?;
                write!(f, ".{name}")
            }
            Js::At(base, index) => {
                base.fmt_base(f)?;
                write!(f, "[{index}]")
            }
            Js::Call(callee, args) => {
                callee.fmt_base(f)?;
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Js::Fun(params, body) => {
                write!(f, "function ({}) {{", params.join(", "))?;
                for stmt in body {
                    write!(f, " {stmt};")?;
                }
                write!(f, " }}")
            }
            Js::Return(e) => write!(f, "return {e}"),
            Js::VarDecl(name, e) => write!(f, "var {name} = {e}"),
            Js::Arr(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// The identity map job: emit every document under its own key.
#[must_use]
pub fn map_nop() -> Js {
    Js::Fun(
        vec![],
        vec![Js::ident("emit").call(vec![Js::This.select("_id"), Js::This])],
    )
}

/// The identity reduce job: keep the first value per key.
#[must_use]
pub fn reduce_nop() -> Js {
    Js::Fun(
        vec!["key".into(), "values".into()],
        vec![Js::Return(Box::new(Js::ident("values").at(Js::Num(0))))],
    )
}

/// The fold-left reducer: copy every attribute of every partial document into
/// one result, so independently produced halves land in a single document.
#[must_use]
pub fn copy_all_fields() -> Js {
    Js::Raw(
        "function (key, values) { var rez = {}; values.forEach(function (value) { \
         for (var attr in value) { if (value.hasOwnProperty(attr)) { rez[attr] = value[attr]; } } \
         }); return rez; }"
            .to_string(),
    )
}

/// Thread `inner` then `outer` through the `[key, value]` pair convention.
///
/// Works for map∘map (result is a map) and map-then-flat-map (result is a
/// flat-map; the outer call already returns an array).
#[must_use]
pub fn fuse_maps(inner: &Js, outer: &Js) -> Js {
    Js::Fun(
        vec!["key".into()],
        vec![
            Js::VarDecl(
                "rez".into(),
                Box::new(
                    inner
                        .clone()
                        .select("call")
                        .call(vec![Js::This, Js::ident("key")]),
                ),
            ),
            Js::Return(Box::new(outer.clone().select("call").call(vec![
                Js::ident("rez").at(Js::Num(1)),
                Js::ident("rez").at(Js::Num(0)),
            ]))),
        ],
    )
}

/// Flat-map then map: apply `outer` to each produced pair.
#[must_use]
pub fn fuse_flat_map_then_map(inner: &Js, outer: &Js) -> Js {
    Js::Fun(
        vec!["key".into()],
        vec![Js::Return(Box::new(
            inner
                .clone()
                .select("call")
                .call(vec![Js::This, Js::ident("key")])
                .select("map")
                .call(vec![per_pair(outer)]),
        ))],
    )
}

/// Flat-map then flat-map: apply `outer` per pair, then flatten one level.
#[must_use]
pub fn fuse_flat_maps(inner: &Js, outer: &Js) -> Js {
    Js::Fun(
        vec!["key".into()],
        vec![Js::Return(Box::new(
            Js::Arr(vec![])
                .select("concat")
                .select("apply")
                .call(vec![
                    Js::Null,
                    inner
                        .clone()
                        .select("call")
                        .call(vec![Js::This, Js::ident("key")])
                        .select("map")
                        .call(vec![per_pair(outer)]),
                ]),
        ))],
    )
}

/// `function (rez) { return outer.call(rez[1], rez[0]); }`
fn per_pair(outer: &Js) -> Js {
    Js::Fun(
        vec!["rez".into()],
        vec![Js::Return(Box::new(
            outer.clone().select("call").call(vec![
                Js::ident("rez").at(Js::Num(1)),
                Js::ident("rez").at(Js::Num(0)),
            ]),
        ))],
    )
}

/// Wrap a map function for the engine's `map` slot: call it and emit the pair.
#[must_use]
pub fn map_emit(fun: &Js) -> Js {
    Js::Fun(
        vec![],
        vec![
            Js::VarDecl(
                "rez".into(),
                Box::new(
                    fun.clone()
                        .select("call")
                        .call(vec![Js::This, Js::This.select("_id")]),
                ),
            ),
            Js::ident("emit").call(vec![
                Js::ident("rez").at(Js::Num(0)),
                Js::ident("rez").at(Js::Num(1)),
            ]),
        ],
    )
}

/// Wrap a flat-map function for the `map` slot: emit every produced pair.
#[must_use]
pub fn flat_map_emit(fun: &Js) -> Js {
    Js::Fun(
        vec![],
        vec![
            fun.clone()
                .select("call")
                .call(vec![Js::This, Js::This.select("_id")])
                .select("forEach")
                .call(vec![Js::Fun(
                    vec!["rez".into()],
                    vec![Js::ident("emit").call(vec![
                        Js::ident("rez").at(Js::Num(0)),
                        Js::ident("rez").at(Js::Num(1)),
                    ])],
                )]),
        ],
    )
}

/// Wrap a map function for the `finalize` slot: the key is fixed, so only the
/// value half of the produced pair is kept.
#[must_use]
pub fn finalize_value(fun: &Js) -> Js {
    Js::Fun(
        vec!["key".into(), "value".into()],
        vec![Js::Return(Box::new(
            fun.clone()
                .select("call")
                .call(vec![Js::ident("value"), Js::ident("key")])
                .at(Js::Num(1)),
        ))],
    )
}
