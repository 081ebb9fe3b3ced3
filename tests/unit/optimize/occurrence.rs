use super::*;
use crate::foundation::core::{Affine, FrameSpan, Rect};
use crate::geometry::algebra::ColorTransform;
use crate::scene::graph::{ChildInstance, Drawable, Element, Sprite, Symbol};

fn sprite(id: u32) -> Element {
    Element::Sprite(Sprite {
        id: ElementId(id),
        drawable: Drawable::Shapes(Vec::new()),
        bounds: Rect::new(0.0, 0.0, 1.0, 1.0),
        stable_name: None,
    })
}

fn symbol(id: u32, targets: &[u32]) -> Element {
    let children = targets
        .iter()
        .map(|&t| {
            ChildInstance::still(
                ElementId(t),
                FrameSpan::single(0),
                Affine::IDENTITY,
                ColorTransform::IDENTITY,
            )
        })
        .collect();
    Element::Symbol(Symbol::new(ElementId(id), 1, children))
}

#[test]
fn counts_references_per_owner() {
    let mut g = Graph::new();
    g.insert(sprite(1));
    g.insert(sprite(2));
    g.insert(symbol(3, &[1, 1, 2]));
    g.insert(symbol(4, &[1]));

    let occ = Occurrences::from_graph(&g);
    assert_eq!(occ.count(ElementId(1), ElementId(3)), 2);
    assert_eq!(occ.total(ElementId(1)), 3);
    assert_eq!(occ.owners(ElementId(1)), vec![ElementId(3), ElementId(4)]);
    assert_eq!(occ.owner_count(ElementId(2)), 1);
    assert_eq!(occ.total(ElementId(3)), 0);
}

#[test]
fn removing_the_last_reference_forgets_the_owner() {
    let mut occ = Occurrences::default();
    occ.add(ElementId(1), ElementId(9), 2);
    occ.remove(ElementId(1), ElementId(9), 1);
    assert_eq!(occ.owner_count(ElementId(1)), 1);
    occ.remove(ElementId(1), ElementId(9), 5);
    assert_eq!(occ.owner_count(ElementId(1)), 0);
    assert!(occ.owners(ElementId(1)).is_empty());
}

#[test]
fn recount_follows_rewrites() {
    let mut g = Graph::new();
    g.insert(sprite(1));
    g.insert(sprite(2));
    g.insert(symbol(3, &[1]));
    let mut occ = Occurrences::from_graph(&g);

    g.insert(symbol(3, &[2, 2]));
    occ.recount(&g, ElementId(3));
    assert_eq!(occ.total(ElementId(1)), 0);
    assert_eq!(occ.count(ElementId(2), ElementId(3)), 2);

    // Symbol replaced by a sprite: it owns nothing anymore.
    g.insert(sprite(3));
    occ.recount(&g, ElementId(3));
    assert_eq!(occ.total(ElementId(2)), 0);
}
