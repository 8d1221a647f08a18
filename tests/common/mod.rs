//! Shared builders for the integration tests.
#![allow(dead_code)]

use docflow::*;

pub fn pop() -> BsonField {
    BsonField::name("pop")
}

pub fn city() -> BsonField {
    BsonField::name("city")
}

pub fn pop_gt(n: i64) -> Selector {
    Selector::field(pop(), Condition::Gt(Bson::Int64(n)))
}

pub fn pop_asc() -> SortKeys {
    vec![(pop(), SortDir::Ascending)]
}

/// A projection that passes the standard test fields through unchanged.
pub fn identity_shape() -> Reshape {
    Reshape::doc([
        ("pop".to_string(), ShapeField::Expr(Expr::field("pop"))),
        ("city".to_string(), ShapeField::Expr(Expr::field("city"))),
    ])
}

pub fn sum_pop_grouped() -> Grouped {
    let mut grouped = Grouped::new();
    grouped.insert("total".to_string(), Expr::Sum(Box::new(Expr::field("pop"))));
    grouped
}

pub fn by_city() -> GroupBy {
    GroupBy::Expr(Expr::field("city"))
}

pub fn geo() -> GeoNear {
    GeoNear {
        near: (1.5, -3.0),
        distance_field: BsonField::name("dist"),
        limit: None,
        max_distance: None,
        spherical: None,
        query: None,
    }
}

pub fn map_fn() -> Js {
    Js::Raw("function (key) { return [key, this]; }".to_string())
}

pub fn second_map_fn() -> Js {
    Js::Raw("function (key) { return [key, this.pop]; }".to_string())
}

pub fn reduce_fn() -> Js {
    Js::Raw("function (key, values) { return values.length; }".to_string())
}

pub fn where_fn() -> Js {
    Js::Raw("function () { return this.x > 0; }".to_string())
}
