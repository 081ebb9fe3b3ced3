use super::*;
use crate::foundation::core::{Affine, FrameSpan};
use crate::geometry::algebra::ColorTransform;
use crate::scene::graph::{Drawable, Sprite, Symbol};
use crate::scene::model::BlurFilter;

fn sprite(id: u32, r: Rect) -> Element {
    Element::Sprite(Sprite {
        id: ElementId(id),
        drawable: Drawable::Shapes(Vec::new()),
        bounds: r,
        stable_name: None,
    })
}

fn child(target: u32, frames: FrameSpan, t: Affine) -> ChildInstance {
    ChildInstance::still(ElementId(target), frames, t, ColorTransform::IDENTITY)
}

#[test]
fn mask_intersects_content() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 100.0, 100.0)));
    g.insert(sprite(2, Rect::new(50.0, 50.0, 200.0, 200.0)));
    let mut mask = child(1, FrameSpan::single(0), Affine::IDENTITY);
    mask.mask = Some(MaskEdge::Start);
    let mut end = mask.clone();
    end.mask = Some(MaskEdge::End);
    let content = child(2, FrameSpan::single(0), Affine::IDENTITY);
    g.insert(Element::Symbol(Symbol::new(
        ElementId(3),
        1,
        vec![end, content, mask],
    )));

    let mut cache = BoundsCache::new();
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 0),
        Some(Rect::new(50.0, 50.0, 100.0, 100.0))
    );
}

#[test]
fn disjoint_mask_yields_none_and_unmasked_siblings_still_count() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 10.0, 10.0)));
    g.insert(sprite(2, Rect::new(20.0, 20.0, 30.0, 30.0)));
    let mut mask = child(1, FrameSpan::single(0), Affine::IDENTITY);
    mask.mask = Some(MaskEdge::Start);
    let mut end = mask.clone();
    end.mask = Some(MaskEdge::End);
    let masked = child(2, FrameSpan::single(0), Affine::IDENTITY);
    g.insert(Element::Symbol(Symbol::new(
        ElementId(3),
        1,
        vec![end.clone(), masked.clone(), mask.clone()],
    )));
    let sibling = child(2, FrameSpan::single(0), Affine::translate((100.0, 0.0)));
    g.insert(Element::Symbol(Symbol::new(
        ElementId(4),
        1,
        vec![sibling, end, masked, mask],
    )));

    let mut cache = BoundsCache::new();
    assert_eq!(cache.bounds_at_frame(&g, ElementId(3), 0), None);
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(4), 0),
        Some(Rect::new(120.0, 20.0, 130.0, 30.0))
    );
}

#[test]
fn nested_masks_intersect_inner_then_outer() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 100.0, 100.0)));
    g.insert(sprite(2, Rect::new(40.0, 0.0, 60.0, 200.0)));
    g.insert(sprite(3, Rect::new(-50.0, -50.0, 300.0, 300.0)));
    let mut outer = child(1, FrameSpan::single(0), Affine::IDENTITY);
    outer.mask = Some(MaskEdge::Start);
    let mut outer_end = outer.clone();
    outer_end.mask = Some(MaskEdge::End);
    let mut inner = child(2, FrameSpan::single(0), Affine::IDENTITY);
    inner.mask = Some(MaskEdge::Start);
    let mut inner_end = inner.clone();
    inner_end.mask = Some(MaskEdge::End);
    let content = child(3, FrameSpan::single(0), Affine::IDENTITY);
    g.insert(Element::Symbol(Symbol::new(
        ElementId(4),
        1,
        vec![outer_end, inner_end, content, inner, outer],
    )));
    let mut cache = BoundsCache::new();
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(4), 0),
        Some(Rect::new(40.0, 0.0, 60.0, 100.0))
    );
}

#[test]
fn blur_padding_expands_even_empty_boxes() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 0.0, 0.0)));
    let mut c = child(1, FrameSpan::single(0), Affine::IDENTITY);
    c.filters = Some(vec![
        [Filter::Blur(BlurFilter {
            blur_x: 4.0,
            blur_y: 4.0,
            passes: 2,
        })]
        .into_iter()
        .collect(),
    ]);
    g.insert(Element::Symbol(Symbol::new(ElementId(2), 1, vec![c])));
    let mut cache = BoundsCache::new();
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(2), 0),
        Some(Rect::new(-8.0, -8.0, 8.0, 8.0))
    );
}

#[test]
fn nested_symbols_use_relative_frames_and_wrap() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 10.0, 10.0)));
    // Inner symbol: sprite moves right by 10 per frame over 2 frames.
    let mut moving = child(1, FrameSpan::new(0, 1).unwrap(), Affine::IDENTITY);
    moving.transforms = vec![Affine::IDENTITY, Affine::translate((10.0, 0.0))];
    g.insert(Element::Symbol(Symbol::new(ElementId(2), 2, vec![moving])));
    // Outer symbol places the inner one from frame 1 on.
    let placed = child(2, FrameSpan::new(1, 4).unwrap(), Affine::translate((0.0, 5.0)));
    g.insert(Element::Symbol(Symbol::new(ElementId(3), 5, vec![placed])));

    let mut cache = BoundsCache::new();
    assert_eq!(cache.bounds_at_frame(&g, ElementId(3), 0), None);
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 1),
        Some(Rect::new(0.0, 5.0, 10.0, 15.0))
    );
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 2),
        Some(Rect::new(10.0, 5.0, 20.0, 15.0))
    );
    // Local frame 2 wraps to inner frame 0.
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 3),
        Some(Rect::new(0.0, 5.0, 10.0, 15.0))
    );
    // Outer frames wrap modulo the frame count.
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 7),
        cache.bounds_at_frame(&g, ElementId(3), 2)
    );
}

#[test]
fn parent_bounds_contain_transformed_children() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(-3.0, 2.0, 17.0, 9.0)));
    let transforms = [
        Affine::rotate(0.3) * Affine::scale(1.5),
        Affine::translate((40.0, -12.0)),
        Affine::new([0.5, 0.2, -0.1, 2.0, 7.0, 7.0]),
    ];
    let kids: Vec<_> = transforms
        .iter()
        .map(|&t| child(1, FrameSpan::single(0), t))
        .collect();
    g.insert(Element::Symbol(Symbol::new(ElementId(2), 1, kids.clone())));

    let mut cache = BoundsCache::new();
    let parent = cache.bounds_at_frame(&g, ElementId(2), 0).unwrap();
    for k in &kids {
        let b = cache.instance_bounds(&g, k, 0).unwrap();
        assert!(parent.union(b) == parent, "{b:?} escapes {parent:?}");
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn forget_recomputes_only_the_rewritten_symbol() {
    let mut g = Graph::new();
    g.insert(sprite(1, Rect::new(0.0, 0.0, 10.0, 10.0)));
    g.insert(sprite(2, Rect::new(0.0, 0.0, 30.0, 5.0)));
    g.insert(Element::Symbol(Symbol::new(
        ElementId(3),
        1,
        vec![child(1, FrameSpan::single(0), Affine::IDENTITY)],
    )));
    g.insert(Element::Symbol(Symbol::new(
        ElementId(4),
        1,
        vec![child(3, FrameSpan::single(0), Affine::translate((5.0, 0.0)))],
    )));

    let mut cache = BoundsCache::new();
    let old_parent = Some(Rect::new(5.0, 0.0, 15.0, 10.0));
    assert_eq!(cache.bounds_at_frame(&g, ElementId(4), 0), old_parent);

    g.insert(Element::Symbol(Symbol::new(
        ElementId(3),
        1,
        vec![child(2, FrameSpan::single(0), Affine::IDENTITY)],
    )));
    // Written entries stay put until forgotten.
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 0),
        Some(Rect::new(0.0, 0.0, 10.0, 10.0))
    );

    cache.forget(ElementId(3));
    assert_eq!(
        cache.bounds_at_frame(&g, ElementId(3), 0),
        Some(Rect::new(0.0, 0.0, 30.0, 5.0))
    );
    assert_eq!(cache.bounds_at_frame(&g, ElementId(4), 0), old_parent);

    let mut rebuilt = BoundsCache::new();
    assert_eq!(
        rebuilt.bounds_at_frame(&g, ElementId(4), 0),
        Some(Rect::new(5.0, 0.0, 35.0, 5.0))
    );
}

#[test]
fn missing_and_recursive_references_do_not_panic() {
    let mut g = Graph::new();
    let dangling = child(42, FrameSpan::single(0), Affine::IDENTITY);
    let looped = child(5, FrameSpan::single(0), Affine::IDENTITY);
    g.insert(Element::Symbol(Symbol::new(ElementId(5), 1, vec![dangling, looped])));
    let mut cache = BoundsCache::new();
    assert_eq!(cache.bounds_at_frame(&g, ElementId(5), 0), None);
    assert_eq!(cache.bounds_at_frame(&g, ElementId(77), 0), None);
}
