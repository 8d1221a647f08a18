//! The expression algebra used inside pipeline stages.
//!
//! [`Expr`] is a tree over document references ([`DocVar`]) and literals. A
//! subset of variants -- the aggregators -- is only legal as the value of a
//! group stage entry; [`Expr::is_aggregator`] identifies them and the
//! reference rewriter enforces that rewriting never changes that status.
//!
//! Traversal is bottom-up: [`Expr::substitute_vars`] rebuilds the tree while
//! replacing every reference through a caller-supplied resolver (failing as a
//! whole if the resolver fails anywhere), and [`Expr::rewrite_vars`] /
//! [`Expr::each_var`] are the total and read-only specializations.

use crate::bson::Bson;
use crate::field::DocVar;
use linked_hash_map::LinkedHashMap;

/// An expression over document fields and literals.
///
/// Variant names follow the engine's operator vocabulary; [`Expr::to_bson`]
/// produces the corresponding operator document.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Projection include marker (`field: true`).
    Include,
    /// A document reference.
    Var(DocVar),
    /// An inline literal.
    Literal(Bson),

    Add(Box<Expr>, Box<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Box<Expr>, Box<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),

    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),

    Concat(Vec<Expr>),
    ToLower(Box<Expr>),
    ToUpper(Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    IfNull(Box<Expr>, Box<Expr>),
    Size(Box<Expr>),

    // Aggregators; legal only inside a group stage.
    AddToSet(Box<Expr>),
    Push(Box<Expr>),
    First(Box<Expr>),
    Last(Box<Expr>),
    Max(Box<Expr>),
    Min(Box<Expr>),
    Avg(Box<Expr>),
    Sum(Box<Expr>),
}

/// The aggregation specification of a group stage: an ordered map from leaf
/// output names to aggregator expressions.
pub type Grouped = LinkedHashMap<String, Expr>;

type Resolver<'a> = &'a mut dyn FnMut(&DocVar) -> Option<Expr>;

fn sub2(l: &Expr, r: &Expr, resolve: Resolver<'_>) -> Option<(Box<Expr>, Box<Expr>)> {
    Some((
        Box::new(l.substitute_vars(resolve)?),
        Box::new(r.substitute_vars(resolve)?),
    ))
}

fn sub_all(es: &[Expr], resolve: Resolver<'_>) -> Option<Vec<Expr>> {
    es.iter().map(|e| e.substitute_vars(resolve)).collect()
}

impl Expr {
    /// A reference to a single named field of the current document.
    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Var(DocVar::named(name))
    }

    /// An integer literal.
    #[must_use]
    pub fn int(n: i64) -> Expr {
        Expr::Literal(Bson::Int64(n))
    }

    /// True for the aggregator variants, which may only appear as group-stage
    /// entries.
    #[must_use]
    pub fn is_aggregator(&self) -> bool {
        matches!(
            self,
            Expr::AddToSet(_)
                | Expr::Push(_)
                | Expr::First(_)
                | Expr::Last(_)
                | Expr::Max(_)
                | Expr::Min(_)
                | Expr::Avg(_)
                | Expr::Sum(_)
        )
    }

    /// Rebuild the tree, replacing every [`DocVar`] through `resolve`.
    ///
    /// Fails as a whole (returns `None`) if `resolve` fails for any reference;
    /// used by project inlining, where a single unresolvable reference means
    /// the whole shape cannot be fused.
    pub fn substitute_vars(&self, resolve: Resolver<'_>) -> Option<Expr> {
        Some(match self {
            Expr::Include => Expr::Include,
            Expr::Var(v) => resolve(v)?,
            Expr::Literal(b) => Expr::Literal(b.clone()),
            Expr::Add(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Add(l, r)
            }
            Expr::Subtract(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Subtract(l, r)
            }
            Expr::Multiply(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Multiply(l, r)
            }
            Expr::Divide(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Divide(l, r)
            }
            Expr::Mod(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Mod(l, r)
            }
            Expr::Eq(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Eq(l, r)
            }
            Expr::Neq(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Neq(l, r)
            }
            Expr::Lt(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Lt(l, r)
            }
            Expr::Lte(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Lte(l, r)
            }
            Expr::Gt(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Gt(l, r)
            }
            Expr::Gte(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::Gte(l, r)
            }
            Expr::And(es) => Expr::And(sub_all(es, resolve)?),
            Expr::Or(es) => Expr::Or(sub_all(es, resolve)?),
            Expr::Not(e) => Expr::Not(Box::new(e.substitute_vars(resolve)?)),
            Expr::Concat(es) => Expr::Concat(sub_all(es, resolve)?),
            Expr::ToLower(e) => Expr::ToLower(Box::new(e.substitute_vars(resolve)?)),
            Expr::ToUpper(e) => Expr::ToUpper(Box::new(e.substitute_vars(resolve)?)),
            Expr::Cond(c, t, f) => Expr::Cond(
                Box::new(c.substitute_vars(resolve)?),
                Box::new(t.substitute_vars(resolve)?),
                Box::new(f.substitute_vars(resolve)?),
            ),
            Expr::IfNull(l, r) => {
                let (l, r) = sub2(l, r, resolve)?;
                Expr::IfNull(l, r)
            }
            Expr::Size(e) => Expr::Size(Box::new(e.substitute_vars(resolve)?)),
            Expr::AddToSet(e) => Expr::AddToSet(Box::new(e.substitute_vars(resolve)?)),
            Expr::Push(e) => Expr::Push(Box::new(e.substitute_vars(resolve)?)),
            Expr::First(e) => Expr::First(Box::new(e.substitute_vars(resolve)?)),
            Expr::Last(e) => Expr::Last(Box::new(e.substitute_vars(resolve)?)),
            Expr::Max(e) => Expr::Max(Box::new(e.substitute_vars(resolve)?)),
            Expr::Min(e) => Expr::Min(Box::new(e.substitute_vars(resolve)?)),
            Expr::Avg(e) => Expr::Avg(Box::new(e.substitute_vars(resolve)?)),
            Expr::Sum(e) => Expr::Sum(Box::new(e.substitute_vars(resolve)?)),
        })
    }

    /// Rebuild the tree with every reference mapped through `apply`.
    pub fn rewrite_vars(&self, apply: &mut dyn FnMut(&DocVar) -> DocVar) -> Expr {
        self.substitute_vars(&mut |v| Some(Expr::Var(apply(v))))
            .expect("total var rewrite cannot fail")
    }

    /// Visit every reference in traversal order.
    pub fn each_var(&self, visit: &mut dyn FnMut(&DocVar)) {
        // The rewriter with an identity mapping and a collection sink.
        let _ = self.rewrite_vars(&mut |v| {
            visit(v);
            v.clone()
        });
    }

    /// Render to the engine's operator-document form.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        fn op(name: &str, args: Vec<Bson>) -> Bson {
            Bson::doc([(name.to_string(), Bson::Arr(args))])
        }
        fn un(name: &str, arg: &Expr) -> Bson {
            Bson::doc([(name.to_string(), arg.to_bson())])
        }
        match self {
            Expr::Include => Bson::Bool(true),
            Expr::Var(v) => Bson::Text(v.to_string()),
            Expr::Literal(b) => Bson::doc([("$literal".to_string(), b.clone())]),
            Expr::Add(l, r) => op("$add", vec![l.to_bson(), r.to_bson()]),
            Expr::Subtract(l, r) => op("$subtract", vec![l.to_bson(), r.to_bson()]),
            Expr::Multiply(l, r) => op("$multiply", vec![l.to_bson(), r.to_bson()]),
            Expr::Divide(l, r) => op("$divide", vec![l.to_bson(), r.to_bson()]),
            Expr::Mod(l, r) => op("$mod", vec![l.to_bson(), r.to_bson()]),
            Expr::Eq(l, r) => op("$eq", vec![l.to_bson(), r.to_bson()]),
            Expr::Neq(l, r) => op("$ne", vec![l.to_bson(), r.to_bson()]),
            Expr::Lt(l, r) => op("$lt", vec![l.to_bson(), r.to_bson()]),
            Expr::Lte(l, r) => op("$lte", vec![l.to_bson(), r.to_bson()]),
            Expr::Gt(l, r) => op("$gt", vec![l.to_bson(), r.to_bson()]),
            Expr::Gte(l, r) => op("$gte", vec![l.to_bson(), r.to_bson()]),
            Expr::And(es) => op("$and", es.iter().map(Expr::to_bson).collect()),
            Expr::Or(es) => op("$or", es.iter().map(Expr::to_bson).collect()),
            Expr::Not(e) => un("$not", e),
            Expr::Concat(es) => op("$concat", es.iter().map(Expr::to_bson).collect()),
            Expr::ToLower(e) => un("$toLower", e),
            Expr::ToUpper(e) => un("$toUpper", e),
            Expr::Cond(c, t, f) => op("$cond", vec![c.to_bson(), t.to_bson(), f.to_bson()]),
            Expr::IfNull(l, r) => op("$ifNull", vec![l.to_bson(), r.to_bson()]),
            Expr::Size(e) => un("$size", e),
            Expr::AddToSet(e) => un("$addToSet", e),
            Expr::Push(e) => un("$push", e),
            Expr::First(e) => un("$first", e),
            Expr::Last(e) => un("$last", e),
            Expr::Max(e) => un("$max", e),
            Expr::Min(e) => un("$min", e),
            Expr::Avg(e) => un("$avg", e),
            Expr::Sum(e) => un("$sum", e),
        }
    }
}
