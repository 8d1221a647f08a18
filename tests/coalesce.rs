mod common;

use common::*;
use docflow::*;
use std::sync::Arc;

#[test]
fn stacked_matches_conjoin() {
    let plan = WorkflowOp::read("zips")
        .matching(pop_gt(10))
        .matching(Selector::field(city(), Condition::Eq(Bson::from("AKRON"))));

    let expected = WorkflowOp::read("zips").matching(
        pop_gt(10).and(Selector::field(city(), Condition::Eq(Bson::from("AKRON")))),
    );
    assert_eq!(coalesce(&plan), expected);
}

#[test]
fn match_pushes_below_sort() {
    let plan = WorkflowOp::read("zips").sort(pop_asc()).matching(pop_gt(10));
    let expected = WorkflowOp::read("zips").matching(pop_gt(10)).sort(pop_asc());
    assert_eq!(coalesce(&plan), expected);
}

#[test]
fn stacked_limits_keep_minimum() {
    let plan = WorkflowOp::read("c").limit(50).limit(10);
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").limit(10));

    let plan = WorkflowOp::read("c").limit(10).limit(50);
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").limit(10));
}

#[test]
fn stacked_skips_add() {
    let plan = WorkflowOp::read("c").skip(3).skip(4);
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").skip(7));
}

#[test]
fn limit_over_skip_widens_below() {
    let plan = WorkflowOp::read("c").skip(5).limit(10);
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").limit(15).skip(5));
}

#[test]
fn limit_over_skip_chain_still_fuses() {
    // limit(skip(skip(..))) must come out fully fused in one pass.
    let plan = WorkflowOp::read("c").skip(2).skip(5).limit(10);
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").limit(17).skip(7));
}

#[test]
fn project_over_project_inlines() {
    let inner = Reshape::doc([("a".to_string(), ShapeField::Expr(Expr::field("x")))]);
    let outer = Reshape::doc([("b".to_string(), ShapeField::Expr(Expr::field("a")))]);
    let plan = WorkflowOp::read("c").project(inner).project(outer);

    let expected = WorkflowOp::read("c").project(Reshape::doc([(
        "b".to_string(),
        ShapeField::Expr(Expr::field("x")),
    )]));
    assert_eq!(coalesce(&plan), expected);
}

#[test]
fn project_inline_fails_on_root_reference() {
    // The outer shape copies the whole document, which cannot be inlined;
    // the stack is left alone.
    let inner = Reshape::doc([("a".to_string(), ShapeField::Expr(Expr::field("x")))]);
    let outer = Reshape::doc([(
        "whole".to_string(),
        ShapeField::Expr(Expr::Var(DocVar::root())),
    )]);
    let plan = WorkflowOp::read("c").project(inner).project(outer);
    assert_eq!(coalesce(&plan), plan);
}

#[test]
fn group_absorbs_projects_beneath_it() {
    let shape = Reshape::doc([("a".to_string(), ShapeField::Expr(Expr::field("x")))]);
    let mut grouped = Grouped::new();
    grouped.insert("n".to_string(), Expr::Sum(Box::new(Expr::field("a"))));
    let plan = WorkflowOp::read("c")
        .project(shape)
        .group(grouped, GroupBy::Expr(Expr::field("a")));

    let mut expected_grouped = Grouped::new();
    expected_grouped.insert("n".to_string(), Expr::Sum(Box::new(Expr::field("x"))));
    let expected = WorkflowOp::read("c").group(expected_grouped, GroupBy::Expr(Expr::field("x")));
    assert_eq!(coalesce(&plan), expected);
}

#[test]
fn geo_near_outer_wins() {
    let mut other = geo();
    other.near = (9.0, 9.0);
    let plan = WorkflowOp::read("c").geo_near(other).geo_near(geo());
    assert_eq!(coalesce(&plan), WorkflowOp::read("c").geo_near(geo()));
}

#[test]
fn pipeline_op_lifts_above_geo_near() {
    let plan = WorkflowOp::read("c").matching(pop_gt(10)).geo_near(geo());
    let expected = WorkflowOp::read("c").geo_near(geo()).matching(pop_gt(10));
    assert_eq!(coalesce(&plan), expected);
}

#[test]
fn map_map_fuses_through_pair_convention() {
    let plan = WorkflowOp::read("c").map(map_fn()).map(second_map_fn());
    let fused = coalesce(&plan);

    let WorkflowOp::Map(src, fun) = &fused else {
        panic!("expected a single map, got {fused:?}");
    };
    assert_eq!(src.as_ref(), &WorkflowOp::read("c"));
    let body = fun.to_string();
    assert!(body.contains(".call(this, key)"), "inner call: {body}");
    assert!(body.contains("rez[1], rez[0]"), "pair swap: {body}");
}

#[test]
fn flat_map_flat_map_flattens_result() {
    let plan = WorkflowOp::read("c").flat_map(map_fn()).flat_map(second_map_fn());
    let fused = coalesce(&plan);

    let WorkflowOp::FlatMap(_, fun) = &fused else {
        panic!("expected a single flat-map, got {fused:?}");
    };
    let body = fun.to_string();
    assert!(body.contains("[].concat.apply(null, "), "flatten: {body}");
}

#[test]
fn fold_left_head_splices() {
    let a = WorkflowOp::read("a");
    let b = WorkflowOp::read("b").reduce(reduce_fn());
    let c = WorkflowOp::read("c").reduce(reduce_fn());
    let nested = WorkflowOp::fold_left(vec![WorkflowOp::fold_left(vec![a.clone(), b.clone()]), c.clone()]);
    assert_eq!(coalesce(&nested), WorkflowOp::fold_left(vec![a, b, c]));
}

#[test]
fn coalesce_never_grows_the_tree() {
    let plan = WorkflowOp::read("zips")
        .matching(pop_gt(1))
        .matching(pop_gt(2))
        .sort(pop_asc())
        .skip(2)
        .skip(3)
        .limit(20)
        .limit(10);
    let out = coalesce(&plan);
    assert!(out.op_count() <= plan.op_count());
    assert_eq!(coalesce(&out), out);
}

#[test]
fn reduce_only_recurses() {
    let plan = WorkflowOp::Reduce(
        Arc::new(WorkflowOp::read("c").limit(5).limit(3)),
        reduce_fn(),
    );
    assert_eq!(
        coalesce(&plan),
        WorkflowOp::Reduce(Arc::new(WorkflowOp::read("c").limit(3)), reduce_fn())
    );
}
