//! Reshaping specifications for project stages.
//!
//! A [`Reshape`] maps output names (document form) or output positions (array
//! form) to either an expression or a nested reshape. [`Reshape::set`] is the
//! workhorse: it writes a value at an arbitrary path, creating intermediate
//! containers as needed, which is what lets rewrites build shapes leaf by
//! leaf.

use crate::bson::Bson;
use crate::expr::Expr;
use crate::field::{BsonField, FieldStep};
use linked_hash_map::LinkedHashMap;

/// One entry of a reshape: a computed expression or a nested shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeField {
    Expr(Expr),
    Shape(Reshape),
}

/// A projection shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Reshape {
    /// Named outputs, in order.
    Doc(LinkedHashMap<String, ShapeField>),
    /// Positional outputs, in order.
    Arr(LinkedHashMap<usize, ShapeField>),
}

impl Reshape {
    /// The empty document shape.
    #[must_use]
    pub fn empty() -> Reshape {
        Reshape::Doc(LinkedHashMap::new())
    }

    /// Build a document shape from ordered `(name, field)` pairs.
    pub fn doc<I>(entries: I) -> Reshape
    where
        I: IntoIterator<Item = (String, ShapeField)>,
    {
        Reshape::Doc(entries.into_iter().collect())
    }

    /// Build an array shape from ordered `(index, field)` pairs.
    pub fn arr<I>(entries: I) -> Reshape
    where
        I: IntoIterator<Item = (usize, ShapeField)>,
    {
        Reshape::Arr(entries.into_iter().collect())
    }

    fn empty_for(step: &FieldStep) -> Reshape {
        match step {
            FieldStep::Name(_) => Reshape::Doc(LinkedHashMap::new()),
            FieldStep::Index(_) => Reshape::Arr(LinkedHashMap::new()),
        }
    }

    fn entry(&self, step: &FieldStep) -> Option<&ShapeField> {
        match (self, step) {
            (Reshape::Doc(m), FieldStep::Name(n)) => m.get(n),
            (Reshape::Arr(m), FieldStep::Index(i)) => m.get(i),
            _ => None,
        }
    }

    fn insert(&self, step: &FieldStep, value: ShapeField) -> Reshape {
        // A container whose kind disagrees with the step is replaced; the
        // path dictates the container kind.
        match (self, step) {
            (Reshape::Doc(m), FieldStep::Name(n)) => {
                let mut m = m.clone();
                m.insert(n.clone(), value);
                Reshape::Doc(m)
            }
            (Reshape::Arr(m), FieldStep::Index(i)) => {
                let mut m = m.clone();
                m.insert(*i, value);
                Reshape::Arr(m)
            }
            (_, _) => Reshape::empty_for(step).insert(step, value),
        }
    }

    /// Write `value` at `field`, creating intermediate containers as needed.
    #[must_use]
    pub fn set(&self, field: &BsonField, value: ShapeField) -> Reshape {
        let steps = field.steps();
        let head = &steps[0];
        match field.tail() {
            None => self.insert(head, value),
            Some(rest) => {
                let child = match self.entry(head) {
                    Some(ShapeField::Shape(s)) => s.clone(),
                    _ => Reshape::empty_for(rest.head()),
                };
                self.insert(head, ShapeField::Shape(child.set(&rest, value)))
            }
        }
    }

    /// Look up the entry at `field`, descending through nested shapes.
    #[must_use]
    pub fn get(&self, field: &BsonField) -> Option<&ShapeField> {
        let entry = self.entry(field.head())?;
        match field.tail() {
            None => Some(entry),
            Some(rest) => match entry {
                ShapeField::Shape(s) => s.get(&rest),
                ShapeField::Expr(_) => None,
            },
        }
    }

    /// All leaf expressions, flattened to `(full path, expression)` pairs in
    /// shape order.
    #[must_use]
    pub fn get_all(&self) -> Vec<(BsonField, Expr)> {
        fn walk(shape: &Reshape, prefix: Option<&BsonField>, out: &mut Vec<(BsonField, Expr)>) {
            let entries: Vec<(BsonField, &ShapeField)> = match shape {
                Reshape::Doc(m) => m
                    .iter()
                    .map(|(k, v)| (BsonField::name(k.clone()), v))
                    .collect(),
                Reshape::Arr(m) => m.iter().map(|(k, v)| (BsonField::index(*k), v)).collect(),
            };
            for (step, value) in entries {
                let path = prefix.map_or_else(|| step.clone(), |p| p.concat(&step));
                match value {
                    ShapeField::Expr(e) => out.push((path, e.clone())),
                    ShapeField::Shape(s) => walk(s, Some(&path), out),
                }
            }
        }
        let mut out = Vec::new();
        walk(self, None, &mut out);
        out
    }

    /// Remove the exact paths in `fields`; nested shapes left empty by a
    /// removal disappear with it.
    #[must_use]
    pub fn delete_all(&self, fields: &[BsonField]) -> Reshape {
        fn keep(path: &BsonField, fields: &[BsonField]) -> bool {
            !fields.iter().any(|f| f == path)
        }
        fn walk(shape: &Reshape, prefix: Option<&BsonField>, fields: &[BsonField]) -> Reshape {
            match shape {
                Reshape::Doc(m) => Reshape::Doc(
                    m.iter()
                        .filter_map(|(k, v)| {
                            let step = BsonField::name(k.clone());
                            let path = prefix.map_or_else(|| step.clone(), |p| p.concat(&step));
                            prune_entry(v, &path, fields).map(|v| (k.clone(), v))
                        })
                        .collect(),
                ),
                Reshape::Arr(m) => Reshape::Arr(
                    m.iter()
                        .filter_map(|(k, v)| {
                            let step = BsonField::index(*k);
                            let path = prefix.map_or_else(|| step.clone(), |p| p.concat(&step));
                            prune_entry(v, &path, fields).map(|v| (*k, v))
                        })
                        .collect(),
                ),
            }
        }
        fn prune_entry(
            value: &ShapeField,
            path: &BsonField,
            fields: &[BsonField],
        ) -> Option<ShapeField> {
            if !keep(path, fields) {
                return None;
            }
            match value {
                ShapeField::Expr(e) => Some(ShapeField::Expr(e.clone())),
                ShapeField::Shape(s) => {
                    let pruned = walk(s, Some(path), fields);
                    if pruned.is_empty() {
                        None
                    } else {
                        Some(ShapeField::Shape(pruned))
                    }
                }
            }
        }
        walk(self, None, fields)
    }

    /// Rebuild a shape from flattened `(path, expression)` pairs. The first
    /// path decides whether the root container is a document or an array.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(BsonField, Expr)>) -> Reshape {
        let mut acc = match pairs.first() {
            Some((field, _)) if matches!(field.head(), FieldStep::Index(_)) => {
                Reshape::Arr(LinkedHashMap::new())
            }
            _ => Reshape::empty(),
        };
        for (field, expr) in pairs {
            acc = acc.set(&field, ShapeField::Expr(expr));
        }
        acc
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Reshape::Doc(m) => m.is_empty(),
            Reshape::Arr(m) => m.is_empty(),
        }
    }

    /// Rebuild every leaf expression through `apply`.
    #[must_use]
    pub fn map_exprs(&self, apply: &mut dyn FnMut(&Expr) -> Expr) -> Reshape {
        self.substitute_exprs(&mut |e| Some(apply(e)))
            .expect("total expr rewrite cannot fail")
    }

    /// Rebuild every leaf expression through `apply`, failing as a whole if
    /// any leaf fails.
    pub fn substitute_exprs(
        &self,
        apply: &mut dyn FnMut(&Expr) -> Option<Expr>,
    ) -> Option<Reshape> {
        fn walk(
            shape: &Reshape,
            apply: &mut dyn FnMut(&Expr) -> Option<Expr>,
        ) -> Option<Reshape> {
            Some(match shape {
                Reshape::Doc(m) => Reshape::Doc(
                    m.iter()
                        .map(|(k, v)| Some((k.clone(), walk_entry(v, apply)?)))
                        .collect::<Option<_>>()?,
                ),
                Reshape::Arr(m) => Reshape::Arr(
                    m.iter()
                        .map(|(k, v)| Some((*k, walk_entry(v, apply)?)))
                        .collect::<Option<_>>()?,
                ),
            })
        }
        fn walk_entry(
            value: &ShapeField,
            apply: &mut dyn FnMut(&Expr) -> Option<Expr>,
        ) -> Option<ShapeField> {
            Some(match value {
                ShapeField::Expr(e) => ShapeField::Expr(apply(e)?),
                ShapeField::Shape(s) => ShapeField::Shape(walk(s, apply)?),
            })
        }
        walk(self, apply)
    }

    /// Render to the engine's projection form: documents as documents, array
    /// shapes as arrays in index order.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        fn entry(value: &ShapeField) -> Bson {
            match value {
                ShapeField::Expr(e) => e.to_bson(),
                ShapeField::Shape(s) => s.to_bson(),
            }
        }
        match self {
            Reshape::Doc(m) => Bson::doc(m.iter().map(|(k, v)| (k.clone(), entry(v)))),
            Reshape::Arr(m) => {
                let mut ordered: Vec<(usize, &ShapeField)> =
                    m.iter().map(|(k, v)| (*k, v)).collect();
                ordered.sort_by_key(|(k, _)| *k);
                Bson::Arr(ordered.into_iter().map(|(_, v)| entry(v)).collect())
            }
        }
    }
}
