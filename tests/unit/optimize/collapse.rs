use std::collections::BTreeMap;

use super::*;
use crate::bounds::compute::BoundsCache;
use crate::foundation::core::{Affine, Rect};
use crate::geometry::algebra::ColorTransform;
use crate::optimize::OptimizeSettings;
use crate::render::rasterizer::Rasterizer;
use crate::render::surface_pool::SurfacePool;
use crate::scene::graph::{Drawable, Element, MaskEdge, Sprite};
use crate::scene::model::{BlurFilter, Filter};
use smallvec::smallvec;

fn sprite(id: u32) -> Element {
    Element::Sprite(Sprite {
        id: ElementId(id),
        drawable: Drawable::Shapes(Vec::new()),
        bounds: Rect::new(0.0, 0.0, 4.0, 4.0),
        stable_name: None,
    })
}

fn at(target: u32, first: u32, last: u32, t: Affine) -> ChildInstance {
    ChildInstance::still(
        ElementId(target),
        FrameSpan { first, last },
        t,
        ColorTransform::IDENTITY,
    )
}

/// Sprite 1, and symbol 5 holding it over `frames` frames.
fn wrapper_graph(frames: u32) -> Graph {
    let mut g = Graph::new();
    g.insert(sprite(1));
    g.insert(Element::Symbol(Symbol::new(
        ElementId(5),
        frames,
        vec![at(1, 0, frames - 1, Affine::translate((1.0, 0.0)))],
    )));
    g
}

#[test]
fn plain_wrapper_instance_is_inlined() {
    let g = wrapper_graph(2);
    let child = at(5, 0, 3, Affine::IDENTITY);
    assert_eq!(decide(&g, ElementId::ROOT, &child, false), Decision::Inline);
}

#[test]
fn masked_named_and_self_instances_are_kept() {
    let g = wrapper_graph(2);

    let mut masked = at(5, 0, 3, Affine::IDENTITY);
    masked.mask = Some(MaskEdge::Start);
    assert_eq!(decide(&g, ElementId::ROOT, &masked, false), Decision::Keep);

    let mut named = at(5, 0, 3, Affine::IDENTITY);
    named.name = Some("door".to_owned());
    assert_eq!(decide(&g, ElementId::ROOT, &named, false), Decision::Keep);

    let own = at(5, 0, 3, Affine::IDENTITY);
    assert_eq!(decide(&g, ElementId(5), &own, false), Decision::Keep);

    let leaf = at(1, 0, 3, Affine::IDENTITY);
    assert_eq!(decide(&g, ElementId::ROOT, &leaf, false), Decision::Keep);

    let mut g = g;
    if let Some(sym) = g.symbol_mut(ElementId(5)) {
        sym.stable_name = Some("Wrapper".to_owned());
    }
    assert_eq!(
        decide(&g, ElementId::ROOT, &at(5, 0, 3, Affine::IDENTITY), false),
        Decision::Keep
    );
}

#[test]
fn short_instances_of_long_symbols_are_kept() {
    let g = wrapper_graph(6);
    let child = at(5, 0, 3, Affine::IDENTITY);
    assert_eq!(decide(&g, ElementId::ROOT, &child, false), Decision::Keep);
}

#[test]
fn blended_instances_need_blend_prerendering() {
    let g = wrapper_graph(1);
    let mut child = at(5, 0, 0, Affine::IDENTITY);
    child.blend_modes = Some(vec![BlendMode::Multiply]);
    assert_eq!(decide(&g, ElementId::ROOT, &child, false), Decision::Keep);
    assert_eq!(decide(&g, ElementId::ROOT, &child, true), Decision::Inline);

    let mut crowded = wrapper_graph(1);
    crowded.insert(sprite(2));
    if let Some(sym) = crowded.symbol_mut(ElementId(5)) {
        let mut kids = sym.children().to_vec();
        kids.push(at(2, 0, 0, Affine::IDENTITY));
        sym.set_children(kids);
    }
    assert_eq!(decide(&crowded, ElementId::ROOT, &child, true), Decision::Keep);
}

#[test]
fn filtered_instances_are_sent_to_baking() {
    let g = wrapper_graph(1);
    let mut child = at(5, 0, 0, Affine::IDENTITY);
    child.filters = Some(vec![smallvec![Filter::Blur(BlurFilter {
        blur_x: 2.0,
        blur_y: 2.0,
        passes: 1,
    })]]);
    assert_eq!(decide(&g, ElementId::ROOT, &child, false), Decision::PrerenderFiltered);
}

#[test]
fn looping_instance_splits_intermittent_children() {
    // Symbol 5 loops over 2 frames; sprite 1 shows on local frame 0 only, sprite 2 on both.
    let mut steady = at(2, 0, 1, Affine::IDENTITY);
    steady.transforms[1] = Affine::translate((0.0, 3.0));
    let inner = Symbol::new(
        ElementId(5),
        2,
        vec![at(1, 0, 0, Affine::translate((1.0, 0.0))), steady],
    );
    let inst = at(5, 3, 6, Affine::translate((10.0, 0.0)));

    let out = collapse_instance(&inner, &inst);
    assert_eq!(out.len(), 3);

    assert_eq!(out[0].target, ElementId(1));
    assert_eq!(out[0].span, FrameSpan { first: 3, last: 3 });
    assert_eq!(out[0].transform_at(0), Affine::translate((11.0, 0.0)));
    assert_eq!(out[1].target, ElementId(1));
    assert_eq!(out[1].span, FrameSpan { first: 5, last: 5 });

    let steady = &out[2];
    assert_eq!(steady.span, FrameSpan { first: 3, last: 6 });
    assert_eq!(steady.transforms.len(), 4);
    assert_eq!(steady.transform_at(1), Affine::translate((10.0, 3.0)));
    assert_eq!(steady.transform_at(2), Affine::translate((10.0, 0.0)));
    assert!(steady.filters.is_none() && steady.blend_modes.is_none());
}

#[test]
fn inlined_colors_and_blends_compose() {
    let inner = Symbol::new(ElementId(5), 1, vec![at(1, 0, 0, Affine::IDENTITY)]);
    let mut inst = at(5, 0, 0, Affine::IDENTITY);
    inst.colors[0] = ColorTransform::alpha(0.5);
    inst.blend_modes = Some(vec![BlendMode::Screen]);

    let out = collapse_instance(&inner, &inst);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].color_at(0).mult[3], 0.5);
    assert_eq!(out[0].blend_at(0), BlendMode::Screen);
}

#[test]
fn collapse_symbol_rewrites_the_owner() {
    let mut g = wrapper_graph(2);
    let mut masked_end = at(1, 0, 3, Affine::IDENTITY);
    masked_end.mask = Some(MaskEdge::End);
    let mut masked_start = at(5, 0, 3, Affine::IDENTITY);
    masked_start.mask = Some(MaskEdge::Start);
    g.insert(Element::Symbol(Symbol::new(
        ElementId::ROOT,
        4,
        vec![
            at(5, 0, 3, Affine::translate((0.0, 8.0))),
            masked_end,
            masked_start,
        ],
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
    opt.collapse_symbol(ElementId::ROOT);
    assert_eq!(opt.stats.instances_inlined, 1);
    assert_eq!(opt.occurrences.count(ElementId(5), ElementId::ROOT), 1);
    assert_eq!(opt.occurrences.count(ElementId(1), ElementId::ROOT), 2);
    drop(opt);

    let root = g.symbol(ElementId::ROOT).unwrap();
    let targets: Vec<_> = root.children().iter().map(|c| c.target).collect();
    assert_eq!(targets, vec![ElementId(1), ElementId(1), ElementId(5)]);
    assert_eq!(root.children()[0].transform_at(0), Affine::translate((1.0, 8.0)));
    assert_eq!(root.children()[2].mask, Some(MaskEdge::Start));
}
