mod common;

use common::*;
use docflow::*;
use std::collections::HashSet;

fn used(vars: &[&str]) -> HashSet<DocVar> {
    vars.iter().map(|v| DocVar::named(*v)).collect()
}

#[test]
fn unread_group_entry_is_removed() {
    let mut grouped = sum_pop_grouped();
    grouped.insert("extra".to_string(), Expr::Push(Box::new(Expr::field("city"))));
    let plan = WorkflowOp::read("zips")
        .group(grouped, by_city())
        .project(Reshape::doc([(
            "total".to_string(),
            ShapeField::Expr(Expr::field("total")),
        )]));

    let expected = WorkflowOp::read("zips")
        .group(sum_pop_grouped(), by_city())
        .project(Reshape::doc([(
            "total".to_string(),
            ShapeField::Expr(Expr::field("total")),
        )]));
    assert_eq!(prune(&plan, &HashSet::new()), expected);
}

#[test]
fn unwind_does_not_credit_its_own_field() {
    // The unwind targets `extra`, but nothing downstream reads it, so the
    // group entry is still pruned. This pins current behavior; see the
    // pruning docs for why unwinds pass the used set through untouched.
    let mut grouped = sum_pop_grouped();
    grouped.insert("extra".to_string(), Expr::Push(Box::new(Expr::field("city"))));
    let plan = WorkflowOp::read("zips")
        .group(grouped, by_city())
        .unwind(DocVar::named("extra"))
        .project(Reshape::doc([(
            "total".to_string(),
            ShapeField::Expr(Expr::field("total")),
        )]));

    let pruned = prune(&plan, &HashSet::new());
    let WorkflowOp::Project(unwound, _) = &pruned else {
        panic!("expected project at the root");
    };
    let WorkflowOp::Unwind(group, _) = unwound.as_ref() else {
        panic!("expected unwind below the project");
    };
    let WorkflowOp::Group(_, grouped, _) = group.as_ref() else {
        panic!("expected group below the unwind");
    };
    assert_eq!(
        grouped.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["total"]
    );
}

#[test]
fn opaque_js_disables_pruning_below() {
    let plan = WorkflowOp::read("zips")
        .project(identity_shape())
        .map(map_fn())
        .project(Reshape::doc([(
            "pop".to_string(),
            ShapeField::Expr(Expr::field("pop")),
        )]));

    // The inner projection keeps `city` even though the outer one only reads
    // `pop`: the map in between could read anything.
    assert_eq!(prune(&plan, &HashSet::new()), plan);
}

#[test]
fn root_is_never_pruned() {
    let plan = WorkflowOp::read("zips").project(identity_shape());
    assert_eq!(prune(&plan, &HashSet::new()), plan);
}

#[test]
fn root_reference_keeps_everything() {
    let plan = WorkflowOp::read("zips").project(identity_shape());
    let mut whole = HashSet::new();
    whole.insert(DocVar::root());
    assert_eq!(prune(&plan, &whole), plan);
}

#[test]
fn prefixes_and_extensions_both_count_as_used() {
    let shape = Reshape::doc([(
        "loc".to_string(),
        ShapeField::Shape(Reshape::doc([
            ("lat".to_string(), ShapeField::Expr(Expr::field("x"))),
            ("lon".to_string(), ShapeField::Expr(Expr::field("y"))),
        ])),
    )]);
    let plan = WorkflowOp::read("zips").project(shape.clone());

    // A use of the whole subdocument keeps both leaves.
    assert_eq!(
        prune(&plan, &used(&["loc"])),
        WorkflowOp::read("zips").project(shape)
    );

    // A use of one leaf keeps that leaf only.
    let lat_only = DocVar::field(BsonField::name("loc").concat(&BsonField::name("lat")));
    let mut just_lat = HashSet::new();
    just_lat.insert(lat_only);
    let expected = Reshape::doc([(
        "loc".to_string(),
        ShapeField::Shape(Reshape::doc([(
            "lat".to_string(),
            ShapeField::Expr(Expr::field("x")),
        )])),
    )]);
    assert_eq!(
        prune(&plan, &just_lat),
        WorkflowOp::read("zips").project(expected)
    );
}

#[test]
fn prune_is_monotone_in_the_used_set() {
    let plan = WorkflowOp::read("zips").project(identity_shape());
    let narrow = prune(&plan, &used(&["pop"]));
    let wide = prune(&plan, &used(&["pop", "city"]));

    fn shape_len(op: &WorkflowOp) -> usize {
        match op {
            WorkflowOp::Project(_, shape) => shape.get_all().len(),
            _ => panic!("expected project"),
        }
    }
    assert!(shape_len(&narrow) <= shape_len(&wide));
    assert_eq!(shape_len(&narrow), 1);
    assert_eq!(shape_len(&wide), 2);
}

#[test]
fn shape_preserving_ops_extend_the_used_set() {
    // The match reads `city` from the projection's output, so `city`
    // survives even though the caller asked only for `pop`.
    let plan = WorkflowOp::read("zips")
        .project(identity_shape())
        .matching(Selector::field(city(), Condition::Eq(Bson::from("AKRON"))));
    let pruned = prune(&plan, &used(&["pop"]));

    let WorkflowOp::Match(proj, _) = &pruned else {
        panic!("expected match at the root");
    };
    let WorkflowOp::Project(_, shape) = proj.as_ref() else {
        panic!("expected project below the match");
    };
    assert_eq!(shape.get_all().len(), 2);
}
