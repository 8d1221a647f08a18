mod common;

use common::*;
use docflow::*;
use proptest::prelude::*;

/// Random op trees over a small, consistent field vocabulary. Fold-left
/// tails are always JS-topped, the only shape the crusher accepts for them
/// (and the only shape the merger produces).
fn arb_plan() -> impl Strategy<Value = WorkflowOp> {
    let leaf = prop_oneof![
        Just(WorkflowOp::read("alpha")),
        Just(WorkflowOp::read("beta")),
        Just(WorkflowOp::pure(Bson::doc([(
            "seed".to_string(),
            Bson::from(1)
        )]))),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), 1i64..40, proptest::bool::ANY)
                .prop_map(|(s, n, take)| if take { s.limit(n) } else { s.skip(n) }),
            (inner.clone(), 1i64..40).prop_map(|(s, n)| s.matching(pop_gt(n))),
            inner.clone().prop_map(|s| s.sort(pop_asc())),
            inner.clone().prop_map(|s| s.project(identity_shape())),
            inner
                .clone()
                .prop_map(|s| s.group(sum_pop_grouped(), by_city())),
            inner.clone().prop_map(|s| s.unwind(DocVar::named("tags"))),
            inner.clone().prop_map(|s| s.map(map_fn())),
            inner.clone().prop_map(|s| s.flat_map(map_fn())),
            inner.clone().prop_map(|s| s.reduce(reduce_fn())),
            (inner.clone(), inner).prop_map(|(a, b)| {
                WorkflowOp::fold_left(vec![a, b.map(map_fn())])
            }),
        ]
    })
}

proptest! {
    #[test]
    fn coalesce_is_idempotent(plan in arb_plan()) {
        let once = coalesce(&plan);
        prop_assert_eq!(coalesce(&once), once);
    }

    #[test]
    fn finish_is_idempotent(plan in arb_plan()) {
        let once = finish(&plan);
        prop_assert_eq!(finish(&once), once);
    }

    #[test]
    fn coalesce_never_grows_the_op_count(plan in arb_plan()) {
        prop_assert!(coalesce(&plan).op_count() <= plan.op_count());
    }

    #[test]
    fn merging_a_plan_with_itself_is_the_identity(plan in arb_plan()) {
        let ((l, r), merged) = merge(&plan, &plan).unwrap();
        prop_assert_eq!(l, DocVar::root());
        prop_assert_eq!(r, DocVar::root());
        prop_assert_eq!(merged, plan);
    }

    #[test]
    fn crushing_a_finished_plan_never_fails(plan in arb_plan()) {
        prop_assert!(crush(&finish(&plan)).is_ok());
    }

    #[test]
    fn merged_plans_still_crush(a in arb_plan(), b in arb_plan()) {
        let (_, merged) = merge(&a, &b).unwrap();
        prop_assert!(crush(&finish(&merged)).is_ok());
    }

    #[test]
    fn limits_fuse_to_the_minimum(a in 1i64..200, b in 1i64..200) {
        let plan = WorkflowOp::read("c").limit(a).limit(b);
        prop_assert_eq!(coalesce(&plan), WorkflowOp::read("c").limit(a.min(b)));
    }

    #[test]
    fn skips_fuse_to_the_sum(a in 1i64..200, b in 1i64..200) {
        let plan = WorkflowOp::read("c").skip(a).skip(b);
        prop_assert_eq!(coalesce(&plan), WorkflowOp::read("c").skip(a + b));
    }

    #[test]
    fn match_always_ends_up_below_sort(sel in 1i64..40) {
        let plan = WorkflowOp::read("c").sort(pop_asc()).matching(pop_gt(sel));
        prop_assert_eq!(
            coalesce(&plan),
            WorkflowOp::read("c").matching(pop_gt(sel)).sort(pop_asc())
        );
    }
}
