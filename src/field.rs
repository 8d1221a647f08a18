//! Field paths and document references.
//!
//! Two closely related notions live here:
//!
//! - [`BsonField`]: a **non-empty** path into a document, built from named
//!   steps and array indices. Fields name things -- projection outputs, sort
//!   keys, group keys.
//! - [`DocVar`]: a reference **into** a document, either the document root or
//!   a field path below it. Every reference an op carries is a `DocVar`
//!   expressed relative to the output of that op's source.
//!
//! Both are small, cheaply cloneable, hashable values; the planner compares
//! them structurally and never observes identity.

use serde::Serialize;
use std::fmt;

/// One step of a field path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldStep {
    /// A named document member.
    Name(String),
    /// An array position.
    Index(usize),
}

impl fmt::Display for FieldStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldStep::Name(n) => write!(f, "{n}"),
            FieldStep::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A non-empty field path.
///
/// Constructed via [`BsonField::name`], [`BsonField::index`], or
/// [`BsonField::path`]; concatenated with [`BsonField::concat`]. The
/// non-emptiness invariant is enforced by the constructors.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BsonField(Vec<FieldStep>);

impl BsonField {
    /// A single named step.
    pub fn name(n: impl Into<String>) -> BsonField {
        BsonField(vec![FieldStep::Name(n.into())])
    }

    /// A single array-index step.
    #[must_use]
    pub fn index(i: usize) -> BsonField {
        BsonField(vec![FieldStep::Index(i)])
    }

    /// A multi-step path. Panics if `steps` is empty; a field path is never
    /// empty.
    #[must_use]
    pub fn path(steps: Vec<FieldStep>) -> BsonField {
        assert!(!steps.is_empty(), "field path must be non-empty");
        BsonField(steps)
    }

    /// The steps of this path, in order.
    #[must_use]
    pub fn steps(&self) -> &[FieldStep] {
        &self.0
    }

    /// Path concatenation: `self` followed by `other`.
    #[must_use]
    pub fn concat(&self, other: &BsonField) -> BsonField {
        let mut steps = self.0.clone();
        steps.extend(other.0.iter().cloned());
        BsonField(steps)
    }

    /// True if `self` is `prefix` or an extension of it.
    #[must_use]
    pub fn starts_with(&self, prefix: &BsonField) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// The path with its first step removed, or `None` for single-step paths.
    #[must_use]
    pub fn tail(&self) -> Option<BsonField> {
        if self.0.len() > 1 {
            Some(BsonField(self.0[1..].to_vec()))
        } else {
            None
        }
    }

    /// The first step of the path.
    #[must_use]
    pub fn head(&self) -> &FieldStep {
        &self.0[0]
    }

    /// Dot-joined rendering, e.g. `city.loc.0`.
    #[must_use]
    pub fn as_text(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for BsonField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Map two collections of leaf names onto a common, disjoint namespace.
///
/// Returns one renaming per side; names are positional (`"0"`, `"1"`, …) with
/// the left side numbered first, so the images never collide even when the two
/// sides share key names.
#[must_use]
pub fn flatten_mapping(
    left: &[String],
    right: &[String],
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let lhs = left
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), i.to_string()))
        .collect();
    let rhs = right
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), (left.len() + i).to_string()))
        .collect();
    (lhs, rhs)
}

/// First `__tmpN` name not present in `existing`. Deterministic; used when a
/// rewrite needs a scratch field that must not collide with real ones.
#[must_use]
pub fn unique_field(existing: &[String]) -> String {
    (0usize..)
        .map(|i| format!("__tmp{i}"))
        .find(|candidate| !existing.iter().any(|k| k == candidate))
        .expect("unbounded name supply")
}

/// A reference into a document: the root itself, or a field path below it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocVar(Option<BsonField>);

impl DocVar {
    /// The document root.
    pub const fn root() -> DocVar {
        DocVar(None)
    }

    /// A reference to `field` below the root.
    #[must_use]
    pub fn field(field: BsonField) -> DocVar {
        DocVar(Some(field))
    }

    /// A reference to a single named field below the root.
    pub fn named(n: impl Into<String>) -> DocVar {
        DocVar(Some(BsonField::name(n)))
    }

    /// The referenced path, or `None` when this is the root.
    #[must_use]
    pub fn deref(&self) -> Option<&BsonField> {
        self.0.as_ref()
    }

    /// Reference concatenation: resolve `other` against `self`.
    ///
    /// The root is the identity on both sides.
    #[must_use]
    pub fn concat(&self, other: &DocVar) -> DocVar {
        match (&self.0, &other.0) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(a), Some(b)) => DocVar(Some(a.concat(b))),
        }
    }

    /// True if `self` points at or below what `prefix` points at.
    #[must_use]
    pub fn starts_with(&self, prefix: &DocVar) -> bool {
        match (&self.0, &prefix.0) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => a.starts_with(b),
        }
    }
}

impl fmt::Display for DocVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "$$ROOT"),
            Some(field) => write!(f, "${field}"),
        }
    }
}

/// Sort direction for sort keys and map/reduce input sorts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SortDir {
    Ascending,
    Descending,
}

impl SortDir {
    /// The engine's numeric encoding: `1` ascending, `-1` descending.
    #[must_use]
    pub fn as_int(self) -> i64 {
        match self {
            SortDir::Ascending => 1,
            SortDir::Descending => -1,
        }
    }
}

/// Ordered sort specification; never empty in a well-formed op.
pub type SortKeys = Vec<(BsonField, SortDir)>;
