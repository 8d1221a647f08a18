mod common;

use common::*;
use docflow::js::copy_all_fields;
use docflow::*;

fn left() -> DocVar {
    DocVar::named(LEFT_LABEL)
}

fn right() -> DocVar {
    DocVar::named(RIGHT_LABEL)
}

fn value_left() -> DocVar {
    DocVar::named(VALUE_LABEL).concat(&left())
}

fn value_right() -> DocVar {
    DocVar::named(VALUE_LABEL).concat(&right())
}

/// `{value: {label: $$ROOT}}`, the wrapper the fold-left combine projects
/// each branch through.
fn value_wrap(label: &str, op: WorkflowOp) -> WorkflowOp {
    op.project(Reshape::doc([(
        VALUE_LABEL.to_string(),
        ShapeField::Shape(Reshape::doc([(
            label.to_string(),
            ShapeField::Expr(Expr::Var(DocVar::root())),
        )])),
    )]))
}

#[test]
fn merging_a_tree_with_itself_is_the_identity() -> anyhow::Result<()> {
    let plan = WorkflowOp::read("zips").matching(pop_gt(10)).limit(10);
    let ((l, r), merged) = merge(&plan, &plan)?;
    assert_eq!(l, DocVar::root());
    assert_eq!(r, DocVar::root());
    assert_eq!(merged, plan);
    Ok(())
}

#[test]
fn two_literals_merge_into_one() -> anyhow::Result<()> {
    let a = WorkflowOp::pure(Bson::from(1));
    let b = WorkflowOp::pure(Bson::from("x"));
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));
    assert_eq!(
        merged,
        WorkflowOp::pure(Bson::doc([
            (LEFT_LABEL.to_string(), Bson::from(1)),
            (RIGHT_LABEL.to_string(), Bson::from("x")),
        ]))
    );
    Ok(())
}

#[test]
fn literal_rides_along_as_a_projected_constant() -> anyhow::Result<()> {
    let a = WorkflowOp::pure(Bson::from(7));
    let b = WorkflowOp::read("zips");
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));
    assert_eq!(
        merged,
        WorkflowOp::read("zips").project(Reshape::doc([
            (
                LEFT_LABEL.to_string(),
                ShapeField::Expr(Expr::Literal(Bson::from(7))),
            ),
            (
                RIGHT_LABEL.to_string(),
                ShapeField::Expr(Expr::Var(DocVar::root())),
            ),
        ]))
    );
    Ok(())
}

#[test]
fn swapping_operands_swaps_the_labels() -> anyhow::Result<()> {
    let a = WorkflowOp::pure(Bson::from(7));
    let b = WorkflowOp::read("zips");
    let ((l1, r1), m1) = merge(&a, &b)?;
    let ((l2, r2), m2) = merge(&b, &a)?;
    assert_eq!(m1, m2);
    assert_eq!((l1, r1), (r2, l2));
    Ok(())
}

#[test]
fn match_and_sort_merge_into_the_pushed_form() -> anyhow::Result<()> {
    let a = WorkflowOp::read("zips").matching(pop_gt(10));
    let b = WorkflowOp::read("zips").sort(pop_asc());
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l.clone(), r.clone()), (DocVar::root(), DocVar::root()));
    assert_eq!(
        merged,
        WorkflowOp::read("zips").matching(pop_gt(10)).sort(pop_asc())
    );

    // The swapped merge produces the same tree with swapped labels.
    let ((l2, r2), merged2) = merge(&b, &a)?;
    assert_eq!(merged2, merged);
    assert_eq!((l, r), (r2, l2));
    Ok(())
}

#[test]
fn project_over_its_own_source_keeps_the_whole_document() -> anyhow::Result<()> {
    let shape = Reshape::doc([("a".to_string(), ShapeField::Expr(Expr::field("x")))]);
    let a = WorkflowOp::read("c").project(shape.clone());
    let b = WorkflowOp::read("c");
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));
    assert_eq!(
        merged,
        WorkflowOp::read("c").project(Reshape::doc([
            (LEFT_LABEL.to_string(), ShapeField::Shape(shape)),
            (
                RIGHT_LABEL.to_string(),
                ShapeField::Expr(Expr::Var(DocVar::root())),
            ),
        ]))
    );
    Ok(())
}

#[test]
fn two_projects_merge_under_their_labels() -> anyhow::Result<()> {
    let a = WorkflowOp::read("c").project(Reshape::doc([(
        "a".to_string(),
        ShapeField::Expr(Expr::field("x")),
    )]));
    let b = WorkflowOp::read("c").project(Reshape::doc([(
        "b".to_string(),
        ShapeField::Expr(Expr::field("y")),
    )]));
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));

    let WorkflowOp::Project(src, shape) = &merged else {
        panic!("expected project, got {merged:?}");
    };
    assert_eq!(src.as_ref(), &WorkflowOp::read("c"));

    // Reference closure: `lEft \ a` resolves to what `a` meant in the left
    // branch, and likewise on the right.
    let left_a = BsonField::name(LEFT_LABEL).concat(&BsonField::name("a"));
    let right_b = BsonField::name(RIGHT_LABEL).concat(&BsonField::name("b"));
    assert_eq!(shape.get(&left_a), Some(&ShapeField::Expr(Expr::field("x"))));
    assert_eq!(shape.get(&right_b), Some(&ShapeField::Expr(Expr::field("y"))));
    Ok(())
}

#[test]
fn equal_key_groups_merge_into_one_group_plus_rename() -> anyhow::Result<()> {
    let mut lg = Grouped::new();
    lg.insert("n".to_string(), Expr::Sum(Box::new(Expr::int(1))));
    let mut rg = Grouped::new();
    rg.insert("m".to_string(), Expr::Push(Box::new(Expr::field("x"))));
    let by = GroupBy::Expr(Expr::field("s"));

    let a = WorkflowOp::read("c").group(lg, by.clone());
    let b = WorkflowOp::read("c").group(rg, by.clone());
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));

    let mut combined = Grouped::new();
    combined.insert("0".to_string(), Expr::Sum(Box::new(Expr::int(1))));
    combined.insert("1".to_string(), Expr::Push(Box::new(Expr::field("x"))));
    let doubled_by = GroupBy::Shape(Reshape::arr([
        (0, ShapeField::Expr(Expr::field("s"))),
        (1, ShapeField::Expr(Expr::field("s"))),
    ]));
    let expected = WorkflowOp::read("c")
        .group(combined, doubled_by)
        .project(Reshape::doc([
            (
                LEFT_LABEL.to_string(),
                ShapeField::Shape(Reshape::doc([(
                    "n".to_string(),
                    ShapeField::Expr(Expr::field("0")),
                )])),
            ),
            (
                RIGHT_LABEL.to_string(),
                ShapeField::Shape(Reshape::doc([(
                    "m".to_string(),
                    ShapeField::Expr(Expr::field("1")),
                )])),
            ),
        ]));
    assert_eq!(merged, expected);
    Ok(())
}

#[test]
fn group_against_match_pushes_the_other_side_through_a_scratch_field()
-> anyhow::Result<()> {
    let a = WorkflowOp::read("c").group(sum_pop_grouped(), by_city());
    let b = WorkflowOp::read("c").matching(pop_gt(10));
    let ((l, r), merged) = merge(&a, &b)?;

    assert_eq!(l, DocVar::root());
    assert_eq!(r, DocVar::named("__tmp0"));

    let mut grouped = sum_pop_grouped();
    grouped.insert(
        "__tmp0".to_string(),
        Expr::Push(Box::new(Expr::Var(DocVar::root()))),
    );
    let expected = WorkflowOp::read("c")
        .matching(pop_gt(10))
        .group(grouped, by_city())
        .unwind(DocVar::named("__tmp0"));
    assert_eq!(merged, expected);
    Ok(())
}

#[test]
fn distinct_unwinds_stack() -> anyhow::Result<()> {
    let a = WorkflowOp::read("c").unwind(DocVar::named("t"));
    let b = WorkflowOp::read("c").unwind(DocVar::named("u"));
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (DocVar::root(), DocVar::root()));
    assert_eq!(
        merged,
        WorkflowOp::read("c")
            .unwind(DocVar::named("t"))
            .unwind(DocVar::named("u"))
    );
    Ok(())
}

#[test]
fn two_redacts_stack_on_the_merged_source() -> anyhow::Result<()> {
    let a = WorkflowOp::read("c").redact(Expr::field("p"));
    let b = WorkflowOp::read("c").redact(Expr::field("q"));
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (DocVar::root(), DocVar::root()));
    assert_eq!(
        merged,
        WorkflowOp::read("c")
            .redact(Expr::field("p"))
            .redact(Expr::field("q"))
    );
    Ok(())
}

#[test]
fn unrelated_reads_fall_back_to_fold_left() -> anyhow::Result<()> {
    let a = WorkflowOp::read("a");
    let b = WorkflowOp::read("b");
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (value_left(), value_right()));

    let expected = WorkflowOp::fold_left(vec![
        value_wrap(LEFT_LABEL, WorkflowOp::read("a")),
        value_wrap(RIGHT_LABEL, WorkflowOp::read("b")).reduce(copy_all_fields()),
    ]);
    assert_eq!(merged, expected);
    Ok(())
}

#[test]
fn map_against_project_keeps_the_map_whole() -> anyhow::Result<()> {
    let a = WorkflowOp::read("c").map(map_fn());
    let b = WorkflowOp::read("c").project(identity_shape());
    let ((l, r), merged) = merge(&a, &b)?;
    assert_eq!((l, r), (left(), right()));

    let WorkflowOp::Project(src, shape) = &merged else {
        panic!("expected project, got {merged:?}");
    };
    let Reshape::Doc(entries) = shape else {
        panic!("expected document shape");
    };
    assert_eq!(
        entries.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![LEFT_LABEL, RIGHT_LABEL]
    );

    // The map side rode through the fold-left combine, so its document sits
    // under the map/reduce value wrapper.
    assert_eq!(
        entries.get(LEFT_LABEL),
        Some(&ShapeField::Expr(Expr::Var(value_right())))
    );
    assert!(matches!(src.as_ref(), WorkflowOp::FoldLeft(_)));
    Ok(())
}

#[test]
fn merge_output_is_coalesced() -> anyhow::Result<()> {
    let a = WorkflowOp::read("zips").matching(pop_gt(1)).matching(pop_gt(2));
    let b = WorkflowOp::read("zips").sort(pop_asc());
    let (_, merged) = merge(&a, &b)?;
    assert_eq!(coalesce(&merged), merged);
    Ok(())
}
