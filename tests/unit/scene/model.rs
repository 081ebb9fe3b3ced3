use super::*;

#[test]
fn scene_json_parses_diffs_filters_and_removals() {
    let json = r#"{
        "elements": {
            "1": { "type": "sprite", "bounds": { "x0": 0, "y0": 0, "x1": 10, "y1": 10 },
                   "shapes": [ { "path": "M0 0 L10 0 L10 10 Z", "color": [255, 0, 0, 255] } ] },
            "2": { "type": "symbol", "frame_count": 3, "frames": {
                "0": { "1": { "id": 1, "matrix": [1, 0, 0, 1, 5, 5],
                              "filters": [ { "type": "blur", "blur_x": 4, "blur_y": 4, "passes": 2 } ],
                              "blend_mode": "multiply" } },
                "1": { "1": { "matrix": [1, 0, 0, 1, 6, 5] } },
                "2": { "1": null }
            } }
        },
        "names": { "Hero": 2 }
    }"#;
    let scene = SceneDef::from_json_str(json).unwrap();
    assert_eq!(scene.names.get("Hero"), Some(&ElementId(2)));

    let ElementDef::Symbol(sym) = &scene.elements[&ElementId(2)] else {
        panic!("expected symbol");
    };
    assert_eq!(sym.frame_count, 3);
    let first = sym.frames[&0][&1].as_ref().unwrap();
    assert_eq!(first.id, Some(ElementId(1)));
    assert_eq!(first.blend_mode, Some(BlendMode::Multiply));
    assert_eq!(
        first.filters.as_deref(),
        Some(
            &[Filter::Blur(BlurFilter {
                blur_x: 4.0,
                blur_y: 4.0,
                passes: 2
            })][..]
        )
    );
    let patch = sym.frames[&1][&1].as_ref().unwrap();
    assert_eq!(patch.id, None);
    assert!(sym.frames[&2][&1].is_none());
}

#[test]
fn unknown_placement_fields_are_rejected() {
    let json = r#"{ "elements": { "1": { "type": "symbol", "frame_count": 1,
        "frames": { "0": { "1": { "id": 3, "bogus": true } } } } } }"#;
    assert!(SceneDef::from_json_str(json).is_err());
}

#[test]
fn blend_codes_map_to_modes() {
    assert_eq!(BlendMode::from_code(0), BlendMode::Normal);
    assert_eq!(BlendMode::from_code(1), BlendMode::Normal);
    assert_eq!(BlendMode::from_code(3), BlendMode::Multiply);
    assert_eq!(BlendMode::from_code(14), BlendMode::HardLight);
    assert_eq!(BlendMode::from_code(99), BlendMode::Normal);
    assert!(!BlendMode::Normal.needs_isolation());
    assert!(BlendMode::Layer.needs_isolation());
}

#[test]
fn filter_padding_scales_with_passes_and_offset() {
    let blur = Filter::Blur(BlurFilter {
        blur_x: 4.0,
        blur_y: 2.0,
        passes: 2,
    });
    assert_eq!(blur.padding(), (8.0, 4.0));

    let shadow = Filter::DropShadow(GlowFilter {
        color: [0, 0, 0, 255],
        blur_x: 1.0,
        blur_y: 1.0,
        strength: 1.0,
        passes: 1,
        angle: 0.0,
        distance: 3.0,
        inner: false,
        knockout: false,
        composite_source: true,
    });
    assert_eq!(shadow.padding(), (4.0, 1.0));

    let m = Filter::ColorMatrix { matrix: [0.0; 20] };
    assert_eq!(m.padding(), (0.0, 0.0));
}

#[test]
fn glow_defaults_fill_in() {
    let f: Filter =
        serde_json::from_str(r#"{ "type": "glow", "color": [255, 255, 0, 255], "blur_x": 2, "blur_y": 2 }"#)
            .unwrap();
    let Filter::Glow(g) = f else {
        panic!("expected glow");
    };
    assert_eq!(g.passes, 1);
    assert_eq!(g.strength, 1.0);
    assert!(g.composite_source);
    assert!(!g.inner);
}

#[test]
fn frame_and_depth_keys_parse_inside_tagged_elements() {
    let json = r#"{ "elements": { "4": { "type": "symbol", "frame_count": 12,
        "frames": { "10": { "3": { "id": 1 }, "12": null } } } } }"#;
    let scene = SceneDef::from_json_str(json).unwrap();
    let ElementDef::Symbol(sym) = &scene.elements[&ElementId(4)] else {
        panic!("expected symbol");
    };
    assert_eq!(sym.frames.keys().copied().collect::<Vec<_>>(), vec![10]);
    assert_eq!(sym.frames[&10].keys().copied().collect::<Vec<_>>(), vec![3, 12]);

    let direct: SymbolDef =
        serde_json::from_str(r#"{ "frame_count": 2, "frames": { "1": { "7": { "id": 1 } } } }"#)
            .unwrap();
    assert_eq!(direct.frames[&1][&7].as_ref().and_then(|p| p.id), Some(ElementId(1)));
}

#[test]
fn non_numeric_frame_keys_are_rejected() {
    let json = r#"{ "elements": { "4": { "type": "symbol", "frame_count": 1,
        "frames": { "first": { "1": { "id": 1 } } } } } }"#;
    let err = SceneDef::from_json_str(json).unwrap_err();
    assert!(err.to_string().contains("frame or depth index"), "{err}");
}
