//! Query predicates for match stages and map/reduce selections.
//!
//! A [`Selector`] is a predicate tree: per-field condition documents,
//! `And`/`Or`/`Nor` combinators, and the JavaScript [`Selector::Where`]
//! escape hatch. `Where` is the one variant the engine's pipeline DSL cannot
//! express, which is why [`Selector::contains_where`] decides pipelinability
//! during lowering.

use crate::bson::Bson;
use crate::field::BsonField;
use crate::js::Js;
use linked_hash_map::LinkedHashMap;

/// A single-field condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(Bson),
    Neq(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    All(Vec<Bson>),
    Exists(bool),
    Type(i32),
    Regex(String),
    Size(usize),
}

impl Condition {
    /// Render to the engine's condition form. Equality renders bare (the
    /// engine treats `field: value` as equality), everything else as an
    /// operator document.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        fn op(name: &str, value: Bson) -> Bson {
            Bson::doc([(name.to_string(), value)])
        }
        match self {
            Condition::Eq(v) => v.clone(),
            Condition::Neq(v) => op("$ne", v.clone()),
            Condition::Gt(v) => op("$gt", v.clone()),
            Condition::Gte(v) => op("$gte", v.clone()),
            Condition::Lt(v) => op("$lt", v.clone()),
            Condition::Lte(v) => op("$lte", v.clone()),
            Condition::In(vs) => op("$in", Bson::Arr(vs.clone())),
            Condition::Nin(vs) => op("$nin", Bson::Arr(vs.clone())),
            Condition::All(vs) => op("$all", Bson::Arr(vs.clone())),
            Condition::Exists(b) => op("$exists", Bson::Bool(*b)),
            Condition::Type(t) => op("$type", Bson::Int32(*t)),
            Condition::Regex(pattern) => op("$regex", Bson::Text(pattern.clone())),
            Condition::Size(n) => op("$size", Bson::Int64(*n as i64)),
        }
    }
}

/// A predicate tree over document fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    /// Ordered per-field conditions, all of which must hold.
    Doc(LinkedHashMap<BsonField, Condition>),
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Nor(Vec<Selector>),
    /// A JavaScript predicate; not expressible as a pipeline stage.
    Where(Js),
}

impl Selector {
    /// The trivially true selector (an empty condition document).
    #[must_use]
    pub fn truth() -> Selector {
        Selector::Doc(LinkedHashMap::new())
    }

    /// A single-field selector.
    #[must_use]
    pub fn field(field: BsonField, cond: Condition) -> Selector {
        let mut doc = LinkedHashMap::new();
        doc.insert(field, cond);
        Selector::Doc(doc)
    }

    /// Conjunction. Two condition documents with disjoint fields merge into
    /// one; anything else nests under `And` (with flattening).
    #[must_use]
    pub fn and(self, other: Selector) -> Selector {
        match (self, other) {
            (Selector::Doc(a), Selector::Doc(b))
                if b.keys().all(|k| !a.contains_key(k)) =>
            {
                let mut merged = a;
                for (k, v) in b {
                    merged.insert(k, v);
                }
                Selector::Doc(merged)
            }
            (Selector::And(mut xs), Selector::And(ys)) => {
                xs.extend(ys);
                Selector::And(xs)
            }
            (Selector::And(mut xs), y) => {
                xs.push(y);
                Selector::And(xs)
            }
            (x, Selector::And(mut ys)) => {
                ys.insert(0, x);
                Selector::And(ys)
            }
            (x, y) => Selector::And(vec![x, y]),
        }
    }

    /// True if a `Where` predicate occurs anywhere, including through
    /// compound selectors.
    #[must_use]
    pub fn contains_where(&self) -> bool {
        match self {
            Selector::Where(_) => true,
            Selector::Doc(_) => false,
            Selector::And(xs) | Selector::Or(xs) | Selector::Nor(xs) => {
                xs.iter().any(Selector::contains_where)
            }
        }
    }

    /// Rebuild the tree with every condition field mapped through `apply`.
    /// `Where` bodies are opaque and pass through untouched.
    #[must_use]
    pub fn map_fields(&self, apply: &mut dyn FnMut(&BsonField) -> BsonField) -> Selector {
        match self {
            Selector::Doc(conds) => Selector::Doc(
                conds
                    .iter()
                    .map(|(k, v)| (apply(k), v.clone()))
                    .collect(),
            ),
            Selector::And(xs) => {
                Selector::And(xs.iter().map(|s| s.map_fields(apply)).collect())
            }
            Selector::Or(xs) => Selector::Or(xs.iter().map(|s| s.map_fields(apply)).collect()),
            Selector::Nor(xs) => {
                Selector::Nor(xs.iter().map(|s| s.map_fields(apply)).collect())
            }
            Selector::Where(js) => Selector::Where(js.clone()),
        }
    }

    /// Render to the engine's query-document form.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        fn compound(name: &str, xs: &[Selector]) -> Bson {
            Bson::doc([(
                name.to_string(),
                Bson::Arr(xs.iter().map(Selector::to_bson).collect()),
            )])
        }
        match self {
            Selector::Doc(conds) => Bson::doc(
                conds
                    .iter()
                    .map(|(k, v)| (k.as_text(), v.to_bson())),
            ),
            Selector::And(xs) => compound("$and", xs),
            Selector::Or(xs) => compound("$or", xs),
            Selector::Nor(xs) => compound("$nor", xs),
            Selector::Where(js) => Bson::doc([("$where".to_string(), Bson::Text(js.to_string()))]),
        }
    }
}
