use std::collections::BTreeMap;

use super::*;
use crate::bounds::compute::BoundsCache;
use crate::foundation::core::Rect;
use crate::optimize::OptimizeSettings;
use crate::render::rasterizer::Rasterizer;
use crate::render::surface_pool::SurfacePool;
use crate::scene::graph::{Drawable, Element, FilterList, Shape, Sprite};
use crate::scene::model::BlurFilter;
use kurbo::Shape as _;
use smallvec::smallvec;

fn square(id: u32) -> Element {
    let r = Rect::new(0.0, 0.0, 10.0, 10.0);
    Element::Sprite(Sprite {
        id: ElementId(id),
        drawable: Drawable::Shapes(vec![Shape {
            path: r.to_path(0.1),
            color: [0, 255, 0, 255],
        }]),
        bounds: r,
        stable_name: None,
    })
}

fn blur(radius: f32) -> Filter {
    Filter::Blur(BlurFilter {
        blur_x: radius,
        blur_y: radius,
        passes: 1,
    })
}

fn blurred(target: u32, frames: u32, radius: f32, x: f64) -> ChildInstance {
    let mut c = ChildInstance::still(
        ElementId(target),
        FrameSpan { first: 0, last: frames - 1 },
        Affine::translate((x, 0.0)),
        ColorTransform::IDENTITY,
    );
    let list: FilterList = smallvec![blur(radius)];
    c.filters = Some(vec![list; frames as usize]);
    c
}

#[test]
fn key_tracks_filter_parameters() {
    let a = FilteredKey::new(ElementId(1), &[blur(2.0)], None).unwrap();
    let b = FilteredKey::new(ElementId(1), &[blur(2.0)], None).unwrap();
    let c = FilteredKey::new(ElementId(1), &[blur(3.0)], None).unwrap();
    let d = FilteredKey::new(ElementId(1), &[blur(2.0)], Some(BlendMode::Screen)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
}

#[test]
fn animated_filters_are_not_bakeable() {
    let mut g = Graph::new();
    g.insert(square(1));
    assert_eq!(bakeable(&g, &blurred(1, 2, 2.0, 0.0), false), Some(None));

    let mut animated = blurred(1, 2, 2.0, 0.0);
    if let Some(lists) = animated.filters.as_mut() {
        lists[1] = smallvec![blur(4.0)];
    }
    assert_eq!(bakeable(&g, &animated, false), None);

    let plain = ChildInstance::still(ElementId(1), FrameSpan::single(0), Affine::IDENTITY, ColorTransform::IDENTITY);
    assert_eq!(bakeable(&g, &plain, false), None);
}

#[test]
fn multi_frame_symbols_are_not_bakeable() {
    let mut g = Graph::new();
    g.insert(square(1));
    let inner = ChildInstance::still(
        ElementId(1),
        FrameSpan { first: 0, last: 1 },
        Affine::IDENTITY,
        ColorTransform::IDENTITY,
    );
    g.insert(Element::Symbol(Symbol::new(ElementId(5), 2, vec![inner])));
    assert_eq!(bakeable(&g, &blurred(5, 2, 2.0, 0.0), false), None);
}

#[test]
fn identical_filters_share_one_sprite() {
    let mut g = Graph::new();
    g.insert(square(1));
    g.insert(Element::Symbol(Symbol::new(
        ElementId(10),
        2,
        vec![blurred(1, 2, 2.0, 0.0), blurred(1, 2, 2.0, 30.0), blurred(1, 2, 3.0, 60.0)],
    )));

    let mut bounds = BoundsCache::new();
    let mut pool = SurfacePool::default();
    let mut raster = Rasterizer::new();
    let mut atlas = BTreeMap::new();
    let settings = OptimizeSettings {
        prerender_blendings: false,
        ratio: 1.0,
    };
    let mut opt = Optimizer::new(&mut g, &mut bounds, &mut pool, &mut raster, &mut atlas, settings);
    opt.prerender_filtered_children();
    assert_eq!(opt.stats.filtered_prerendered, 3);
    assert_eq!(opt.filtered.len(), 2);

    let children = g.symbol(ElementId(10)).unwrap().children().to_vec();
    assert!(children.iter().all(|c| !c.has_filters()));
    assert_eq!(children[0].target, children[1].target);
    assert_ne!(children[0].target, children[2].target);
    assert_eq!(children[1].transform_at(1), Affine::translate((30.0, 0.0)));

    let baked = &atlas[&children[0].target];
    assert_eq!(baked.placement.x, -2.0);
    assert_eq!((baked.image.width, baked.image.height), (14, 14));
}
