use super::*;
use crate::foundation::core::Rect;
use crate::scene::model::{BlurFilter, ShapeDef};

fn square_sprite() -> ElementDef {
    ElementDef::Sprite(SpriteDef {
        bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
        shapes: vec![ShapeDef {
            path: "M0 0 L10 0 L10 10 L0 10 Z".into(),
            color: [255, 255, 255, 255],
        }],
        image: None,
    })
}

fn place(id: u32, tx: f64) -> Option<PlacementDef> {
    Some(PlacementDef {
        id: Some(ElementId(id)),
        matrix: Some([1.0, 0.0, 0.0, 1.0, tx, 0.0]),
        ..PlacementDef::default()
    })
}

fn scene(frame_count: u32, frames: Vec<(u32, Vec<(u32, Option<PlacementDef>)>)>) -> SceneDef {
    let mut elements = BTreeMap::new();
    elements.insert(ElementId(1), square_sprite());
    elements.insert(ElementId(2), square_sprite());
    elements.insert(
        ElementId(10),
        ElementDef::Symbol(SymbolDef {
            frame_count,
            frames: frames
                .into_iter()
                .map(|(f, d)| (f, d.into_iter().collect()))
                .collect(),
            container_bounds: None,
        }),
    );
    SceneDef {
        elements,
        names: BTreeMap::new(),
    }
}

fn children(g: &Graph) -> &[ChildInstance] {
    g.symbol(ElementId(10)).unwrap().children()
}

#[test]
fn static_placement_becomes_one_record() {
    let g = build_graph(&scene(5, vec![(0, vec![(1, place(1, 3.0))])])).unwrap();
    let c = children(&g);
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].span, FrameSpan::new(0, 4).unwrap());
    assert_eq!(c[0].transforms.len(), 5);
    assert!(c[0].transforms.iter().all(|t| t.as_coeffs()[4] == 3.0));
}

#[test]
fn partial_patch_extends_record_with_new_transform() {
    let patch = Some(PlacementDef {
        matrix: Some([1.0, 0.0, 0.0, 1.0, 7.0, 0.0]),
        ..PlacementDef::default()
    });
    let g = build_graph(&scene(
        3,
        vec![(0, vec![(1, place(1, 0.0))]), (1, vec![(1, patch)])],
    ))
    .unwrap();
    let c = children(&g);
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].transform_at(0).as_coeffs()[4], 0.0);
    assert_eq!(c[0].transform_at(1).as_coeffs()[4], 7.0);
    assert_eq!(c[0].transform_at(2).as_coeffs()[4], 7.0);
}

#[test]
fn id_change_and_removal_close_records() {
    let redefine = Some(PlacementDef {
        id: Some(ElementId(2)),
        ..PlacementDef::default()
    });
    let g = build_graph(&scene(
        6,
        vec![
            (0, vec![(1, place(1, 4.0))]),
            (2, vec![(1, redefine)]),
            (4, vec![(1, None)]),
        ],
    ))
    .unwrap();
    let c = children(&g);
    assert_eq!(c.len(), 2);
    assert_eq!(c[0].target, ElementId(1));
    assert_eq!(c[0].span, FrameSpan::new(0, 1).unwrap());
    assert_eq!(c[1].target, ElementId(2));
    assert_eq!(c[1].span, FrameSpan::new(2, 3).unwrap());
    // A redefinition without a matrix keeps the previous one.
    assert_eq!(c[1].transform_at(0).as_coeffs()[4], 4.0);
}

#[test]
fn filter_presence_toggle_splits_record() {
    let blurred = Some(PlacementDef {
        filters: Some(vec![Filter::Blur(BlurFilter {
            blur_x: 2.0,
            blur_y: 2.0,
            passes: 1,
        })]),
        ..PlacementDef::default()
    });
    let g = build_graph(&scene(
        4,
        vec![(0, vec![(1, place(1, 0.0))]), (2, vec![(1, blurred)])],
    ))
    .unwrap();
    let c = children(&g);
    assert_eq!(c.len(), 2);
    assert!(!c[0].has_filters());
    assert!(c[1].has_filters());
    assert_eq!(c[1].filters.as_ref().map(Vec::len), Some(2));
}

#[test]
fn clip_depth_brackets_masked_depths() {
    let mask = Some(PlacementDef {
        id: Some(ElementId(1)),
        clip_depth: Some(3),
        ..PlacementDef::default()
    });
    let g = build_graph(&scene(
        2,
        vec![(
            0,
            vec![(1, mask), (2, place(2, 0.0)), (3, place(2, 5.0)), (4, place(1, 9.0))],
        )],
    ))
    .unwrap();
    let c = children(&g);
    // Storage order is reverse paint order.
    let roles: Vec<_> = c
        .iter()
        .map(|ch| (ch.transform_at(0).as_coeffs()[4], ch.mask))
        .collect();
    assert_eq!(
        roles,
        vec![
            (9.0, None),
            (0.0, Some(MaskEdge::End)),
            (5.0, None),
            (0.0, None),
            (0.0, Some(MaskEdge::Start)),
        ]
    );
    assert!(g.validate().is_ok());
}

#[test]
fn morph_ratio_materializes_new_sprites() {
    let mut sc = scene(
        2,
        vec![
            (
                0,
                vec![(
                    1,
                    Some(PlacementDef {
                        id: Some(ElementId(20)),
                        ratio: Some(0),
                        ..PlacementDef::default()
                    }),
                )],
            ),
            (
                1,
                vec![(
                    1,
                    Some(PlacementDef {
                        ratio: Some(u16::MAX),
                        ..PlacementDef::default()
                    }),
                )],
            ),
        ],
    );
    sc.elements.insert(
        ElementId(20),
        ElementDef::Morph(MorphDef {
            start: vec![ShapeDef {
                path: "M0 0 L10 0 L10 10 Z".into(),
                color: [0, 0, 0, 255],
            }],
            end: vec![ShapeDef {
                path: "M0 0 L30 0 L30 30 Z".into(),
                color: [0, 0, 0, 255],
            }],
            start_bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
            end_bounds: Rect::new(0.0, 0.0, 30.0, 30.0),
        }),
    );
    let g = build_graph(&sc).unwrap();
    let c = children(&g);
    assert_eq!(c.len(), 2);
    let ids: Vec<_> = c.iter().map(|ch| ch.target).collect();
    assert!(ids.iter().all(|id| id.0 > 20));
    let end = c.iter().find(|ch| ch.span.first == 1).unwrap();
    assert_eq!(
        g.sprite(end.target).unwrap().bounds,
        Rect::new(0.0, 0.0, 30.0, 30.0)
    );
    assert!(g.get(ElementId(20)).is_none());
}

#[test]
fn missing_references_are_skipped_and_names_applied() {
    let mut sc = scene(1, vec![(0, vec![(1, place(99, 0.0)), (2, place(1, 0.0))])]);
    sc.names.insert("Root".into(), ElementId(10));
    let g = build_graph(&sc).unwrap();
    assert_eq!(children(&g).len(), 1);
    assert_eq!(
        g.symbol(ElementId(10)).unwrap().stable_name.as_deref(),
        Some("Root")
    );
}

#[test]
fn bad_path_data_is_a_validation_error() {
    let mut sc = scene(1, vec![]);
    sc.elements.insert(
        ElementId(3),
        ElementDef::Sprite(SpriteDef {
            bounds: Rect::ZERO,
            shapes: vec![ShapeDef {
                path: "M0 0 Q".into(),
                color: [0; 4],
            }],
            image: None,
        }),
    );
    assert!(matches!(build_graph(&sc), Err(FlattenError::Validation(_))));
}
