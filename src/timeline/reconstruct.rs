use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::foundation::core::{Affine, BezPath, ElementId, FrameSpan};
use crate::foundation::error::{FlattenError, FlattenResult};
use crate::geometry::algebra::ColorTransform;
use crate::scene::graph::{
    ChildInstance, Drawable, Element, FilterList, Graph, MaskEdge, RasterImage, Shape, Sprite,
    Symbol,
};
use crate::scene::model::{
    BlendMode, ElementDef, Filter, MorphDef, PlacementDef, SceneDef, ShapeDef, SpriteDef, SymbolDef,
};
use crate::timeline::morph::morph_sprite;

/// Build the scene graph from parser output.
///
/// Sprites are converted first, then every symbol timeline is replayed frame by frame into
/// contiguous child records. Morphs referenced with a ratio are materialized as new sprites.
#[tracing::instrument(skip_all, fields(elements = scene.elements.len()))]
pub fn build_graph(scene: &SceneDef) -> FlattenResult<Graph> {
    let mut graph = Graph::new();
    let mut morphs = BTreeMap::new();
    let mut symbols = Vec::new();

    for (&id, def) in &scene.elements {
        match def {
            ElementDef::Sprite(s) => graph.insert(Element::Sprite(sprite_from_def(id, s)?)),
            ElementDef::Morph(m) => {
                morphs.insert(id, m);
            }
            ElementDef::Symbol(s) => symbols.push((id, s)),
        }
    }

    let next_id = scene
        .elements
        .keys()
        .next_back()
        .map(|id| id.next())
        .unwrap_or(ElementId(0));
    let mut cx = ReconstructCx {
        scene,
        morphs,
        morph_cache: HashMap::new(),
        morph_sprites: Vec::new(),
        next_id,
    };

    for (id, def) in symbols {
        let children = cx.reconstruct_symbol(id, def)?;
        let mut sym = Symbol::new(id, def.frame_count, children);
        sym.container_bounds = def.container_bounds;
        graph.insert(Element::Symbol(sym));
    }
    for sprite in cx.morph_sprites {
        graph.insert(Element::Sprite(sprite));
    }

    for (name, &id) in &scene.names {
        match graph.get(id) {
            Some(Element::Symbol(_)) => {
                if let Some(s) = graph.symbol_mut(id) {
                    s.stable_name = Some(name.clone());
                }
            }
            Some(Element::Sprite(_)) => {
                if let Some(s) = graph.sprite_mut(id) {
                    s.stable_name = Some(name.clone());
                }
            }
            None => tracing::warn!(%id, name = %name, "name table references a missing element"),
        }
    }

    graph.validate()?;
    Ok(graph)
}

pub(crate) fn parse_shape(def: &ShapeDef) -> FlattenResult<Shape> {
    let path = BezPath::from_svg(&def.path)
        .map_err(|e| FlattenError::validation(format!("invalid path data '{}': {e}", def.path)))?;
    Ok(Shape {
        path,
        color: def.color,
    })
}

fn sprite_from_def(id: ElementId, def: &SpriteDef) -> FlattenResult<Sprite> {
    let drawable = match &def.image {
        Some(img) => Drawable::Image(RasterImage::from_straight(
            img.width,
            img.height,
            img.rgba.clone(),
        )?),
        None => Drawable::Shapes(
            def.shapes
                .iter()
                .map(parse_shape)
                .collect::<FlattenResult<Vec<_>>>()?,
        ),
    };
    Ok(Sprite {
        id,
        drawable,
        bounds: def.bounds,
        stable_name: None,
    })
}

/// Current occupant of one depth.
#[derive(Clone, Debug)]
struct Occupant {
    id: ElementId,
    matrix: Affine,
    color: ColorTransform,
    filters: Vec<Filter>,
    blend: BlendMode,
    name: Option<String>,
    clip_depth: Option<u32>,
    ratio: Option<u16>,
}

impl Occupant {
    fn define(id: ElementId, p: &PlacementDef, previous: Option<&Occupant>) -> Self {
        let matrix = match (p.matrix, previous) {
            (Some(m), _) => Affine::new(m),
            (None, Some(prev)) => prev.matrix,
            (None, None) => Affine::IDENTITY,
        };
        Self {
            id,
            matrix,
            color: p.color.unwrap_or_default(),
            filters: p.filters.clone().unwrap_or_default(),
            blend: p.blend_mode.unwrap_or_default(),
            name: p.name.clone(),
            clip_depth: p.clip_depth,
            ratio: p.ratio,
        }
    }

    fn patch(&mut self, p: &PlacementDef) {
        if let Some(m) = p.matrix {
            self.matrix = Affine::new(m);
        }
        if let Some(c) = p.color {
            self.color = c;
        }
        if let Some(f) = &p.filters {
            self.filters = f.clone();
        }
        if let Some(b) = p.blend_mode {
            self.blend = b;
        }
        if let Some(n) = &p.name {
            self.name = Some(n.clone());
        }
        if let Some(c) = p.clip_depth {
            self.clip_depth = Some(c);
        }
        if let Some(r) = p.ratio {
            self.ratio = Some(r);
        }
    }
}

/// Position of a record in paint order: occupants sort below the mask ends sharing their depth,
/// and mask ends at one depth close the innermost (deepest-starting) group first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SlotKey {
    depth: u32,
    kind: SlotKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SlotKind {
    Occupant,
    MaskEnd(Reverse<u32>),
}

/// One frame of one slot.
struct Sample {
    target: ElementId,
    transform: Affine,
    color: ColorTransform,
    filters: FilterList,
    blend: BlendMode,
    name: Option<String>,
    mask: Option<MaskEdge>,
}

impl Sample {
    fn continues(&self, rec: &ChildInstance) -> bool {
        rec.target == self.target
            && rec.name == self.name
            && rec.mask == self.mask
            && rec.filters.is_some() == !self.filters.is_empty()
            && rec.blend_modes.is_some() == self.blend.needs_isolation()
    }

    fn open(self, frame: u32) -> ChildInstance {
        ChildInstance {
            target: self.target,
            span: FrameSpan::single(frame),
            transforms: vec![self.transform],
            colors: vec![self.color],
            filters: (!self.filters.is_empty()).then(|| vec![self.filters]),
            blend_modes: self.blend.needs_isolation().then(|| vec![self.blend]),
            mask: self.mask,
            name: self.name,
        }
    }

    fn append_to(self, rec: &mut ChildInstance) {
        rec.span.last += 1;
        rec.transforms.push(self.transform);
        rec.colors.push(self.color);
        if let Some(f) = rec.filters.as_mut() {
            f.push(self.filters);
        }
        if let Some(b) = rec.blend_modes.as_mut() {
            b.push(self.blend);
        }
    }
}

struct ReconstructCx<'a> {
    scene: &'a SceneDef,
    morphs: BTreeMap<ElementId, &'a MorphDef>,
    morph_cache: HashMap<(ElementId, u16), ElementId>,
    morph_sprites: Vec<Sprite>,
    next_id: ElementId,
}

impl ReconstructCx<'_> {
    fn reconstruct_symbol(
        &mut self,
        id: ElementId,
        def: &SymbolDef,
    ) -> FlattenResult<Vec<ChildInstance>> {
        let mut occupants: BTreeMap<u32, Occupant> = BTreeMap::new();
        let mut open: BTreeMap<SlotKey, ChildInstance> = BTreeMap::new();
        let mut closed: Vec<(SlotKey, ChildInstance)> = Vec::new();
        let mut reported_missing = BTreeSet::new();

        for frame in 0..def.frame_count {
            if let Some(diff) = def.frames.get(&frame) {
                apply_diff(id, frame, &mut occupants, diff);
            }

            let mut current: BTreeMap<SlotKey, Sample> = BTreeMap::new();
            for (&depth, occ) in &occupants {
                let Some(target) = self.resolve_target(occ)? else {
                    if reported_missing.insert(occ.id) {
                        tracing::warn!(symbol = %id, target = %occ.id, depth, "skipping reference to missing element");
                    }
                    continue;
                };
                let sample = |mask| Sample {
                    target,
                    transform: occ.matrix,
                    color: occ.color,
                    filters: occ.filters.iter().cloned().collect(),
                    blend: occ.blend,
                    name: occ.name.clone(),
                    mask,
                };
                match occ.clip_depth {
                    Some(clip) => {
                        current.insert(
                            SlotKey {
                                depth,
                                kind: SlotKind::Occupant,
                            },
                            sample(Some(MaskEdge::Start)),
                        );
                        current.insert(
                            SlotKey {
                                depth: clip.max(depth),
                                kind: SlotKind::MaskEnd(Reverse(depth)),
                            },
                            sample(Some(MaskEdge::End)),
                        );
                    }
                    None => {
                        current.insert(
                            SlotKey {
                                depth,
                                kind: SlotKind::Occupant,
                            },
                            sample(None),
                        );
                    }
                }
            }

            // Close records whose slot vanished or whose identity changed.
            let stale: Vec<SlotKey> = open
                .iter()
                .filter(|&(key, rec)| current.get(key).is_none_or(|s| !s.continues(rec)))
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                if let Some(rec) = open.remove(&key) {
                    closed.push((key, rec));
                }
            }

            for (key, sample) in current {
                match open.get_mut(&key) {
                    Some(rec) => sample.append_to(rec),
                    None => {
                        open.insert(key, sample.open(frame));
                    }
                }
            }
        }
        closed.extend(open);

        // Storage order is reverse paint order; records sharing a slot stay chronological.
        closed.sort_by_key(|(key, rec)| (Reverse(*key), rec.span.first));
        Ok(closed.into_iter().map(|(_, rec)| rec).collect())
    }

    /// Map an occupant to the element actually drawn, materializing morphs on demand.
    fn resolve_target(&mut self, occ: &Occupant) -> FlattenResult<Option<ElementId>> {
        let Some(def) = self.morphs.get(&occ.id).copied() else {
            return Ok(self.scene.elements.contains_key(&occ.id).then_some(occ.id));
        };
        let ratio = occ.ratio.unwrap_or(0);
        if let Some(&id) = self.morph_cache.get(&(occ.id, ratio)) {
            return Ok(Some(id));
        }
        let id = self.next_id;
        self.next_id = id.next();
        self.morph_sprites.push(morph_sprite(id, def, ratio)?);
        self.morph_cache.insert((occ.id, ratio), id);
        tracing::debug!(morph = %occ.id, ratio, sprite = %id, "materialized morph shape");
        Ok(Some(id))
    }
}

fn apply_diff(
    symbol: ElementId,
    frame: u32,
    occupants: &mut BTreeMap<u32, Occupant>,
    diff: &BTreeMap<u32, Option<PlacementDef>>,
) {
    for (&depth, entry) in diff {
        let Some(p) = entry else {
            occupants.remove(&depth);
            continue;
        };
        match p.id {
            Some(id) => {
                let occ = Occupant::define(id, p, occupants.get(&depth));
                occupants.insert(depth, occ);
            }
            None => match occupants.get_mut(&depth) {
                Some(prev) => prev.patch(p),
                None => {
                    tracing::warn!(%symbol, frame, depth, "patch for an empty depth ignored");
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/reconstruct.rs"]
mod tests;
