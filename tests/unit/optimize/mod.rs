use super::*;
use crate::foundation::core::{Affine, FrameSpan};
use crate::geometry::algebra::ColorTransform;
use crate::render::surface_pool::SurfacePool;
use crate::scene::graph::{FilterList, Shape};
use crate::scene::model::{BlendMode, BlurFilter, Filter};
use kurbo::Shape as _;
use smallvec::smallvec;

fn square(id: u32, r: Rect) -> Element {
    Element::Sprite(Sprite {
        id: ElementId(id),
        drawable: Drawable::Shapes(vec![Shape {
            path: r.to_path(0.1),
            color: [200, 40, 40, 255],
        }]),
        bounds: r,
        stable_name: None,
    })
}

fn held(target: u32, frames: u32) -> ChildInstance {
    ChildInstance::still(
        ElementId(target),
        FrameSpan { first: 0, last: frames - 1 },
        Affine::IDENTITY,
        ColorTransform::IDENTITY,
    )
}

fn optimize(graph: &mut Graph, atlas: &mut BTreeMap<ElementId, AtlasImage>) -> OptimizeStats {
    let mut bounds = BoundsCache::new();
    let mut pool = SurfacePool::default();
    let mut raster = Rasterizer::new();
    let settings = OptimizeSettings {
        prerender_blendings: false,
        ratio: 1.0,
    };
    Optimizer::new(graph, &mut bounds, &mut pool, &mut raster, atlas, settings).run()
}

#[test]
fn first_different_frame_scans_every_effect() {
    let mut c = held(1, 4);
    assert_eq!(first_different_frame(&c, 0), 4);

    c.colors[3] = ColorTransform::alpha(0.5);
    assert_eq!(first_different_frame(&c, 0), 3);
    assert_eq!(first_different_frame(&c, 3), 4);

    c.blend_modes = Some(vec![BlendMode::Normal, BlendMode::Add, BlendMode::Add, BlendMode::Add]);
    assert_eq!(first_different_frame(&c, 0), 1);
    assert_eq!(first_different_frame(&c, 1), 3);
}

#[test]
fn effects_constant_ignores_placement() {
    let mut c = held(1, 3);
    c.transforms[2] = Affine::scale(3.0);
    assert!(effects_constant(&c));

    let blur: FilterList = smallvec![Filter::Blur(BlurFilter {
        blur_x: 1.0,
        blur_y: 1.0,
        passes: 1,
    })];
    c.filters = Some(vec![blur.clone(), blur, FilterList::new()]);
    assert!(!effects_constant(&c));
}

#[test]
fn static_symbol_is_prerendered_and_leaves_trimmed() {
    let mut g = Graph::new();
    g.insert(square(1, Rect::new(0.0, 0.0, 10.0, 10.0)));
    g.insert(square(2, Rect::new(10.0, 0.0, 20.0, 10.0)));
    g.insert(Element::Symbol(Symbol::new(ElementId(5), 3, vec![held(1, 3), held(2, 3)])));
    let mut moving = held(5, 2);
    moving.transforms[1] = Affine::translate((4.0, 0.0));
    g.insert(Element::Symbol(Symbol::new(ElementId::ROOT, 2, vec![moving])));

    let mut atlas = BTreeMap::new();
    let stats = optimize(&mut g, &mut atlas);
    assert_eq!(stats.frames_collapsed, 1);
    assert_eq!(stats.symbols_prerendered, 1);
    assert_eq!(stats.elements_trimmed, 2);

    assert!(g.sprite(ElementId(5)).is_some());
    assert!(!g.contains(ElementId(1)) && !g.contains(ElementId(2)));
    assert_eq!(g.symbol(ElementId::ROOT).unwrap().children()[0].target, ElementId(5));
    let img = &atlas[&ElementId(5)];
    assert_eq!((img.image.width, img.image.height), (20, 10));
}

#[test]
fn wrapper_symbols_are_inlined_into_their_parent() {
    let mut g = Graph::new();
    g.insert(square(1, Rect::new(0.0, 0.0, 10.0, 10.0)));
    let mut spin = held(1, 2);
    spin.transforms[1] = Affine::rotate(0.5);
    g.insert(Element::Symbol(Symbol::new(ElementId(5), 2, vec![spin])));
    let mut outer = held(5, 4);
    outer.transforms = vec![Affine::translate((20.0, 0.0)); 4];
    let mut named = held(1, 4);
    named.name = Some("anchor".to_string());
    g.insert(Element::Symbol(Symbol::new(ElementId::ROOT, 4, vec![outer, named])));

    let mut atlas = BTreeMap::new();
    let stats = optimize(&mut g, &mut atlas);
    assert_eq!(stats.instances_inlined, 1);
    assert!(!g.contains(ElementId(5)));

    let root = g.symbol(ElementId::ROOT).unwrap();
    assert_eq!(root.children().len(), 2);
    let inlined = &root.children()[0];
    assert_eq!(inlined.target, ElementId(1));
    assert_eq!(inlined.span, FrameSpan { first: 0, last: 3 });
    assert_eq!(inlined.transform_at(2), Affine::translate((20.0, 0.0)));
    assert_eq!(
        inlined.transform_at(3),
        Affine::translate((20.0, 0.0)) * Affine::rotate(0.5)
    );
}
