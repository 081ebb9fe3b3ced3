use crate::foundation::core::{Affine, ElementId, FrameSpan};
use crate::geometry::algebra::ColorTransform;
use crate::render::rasterizer::AtlasImage;
use crate::scene::graph::{ChildInstance, Graph, MaskEdge, Symbol};

use super::{Optimizer, first_different_frame};

/// A top-level mask-bracketed run of children, by storage index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MaskGroup {
    /// Index of the closing edge (lowest index of the run).
    pub(crate) end: usize,
    /// Index of the clip child (highest index of the run).
    pub(crate) start: usize,
    /// Frames during which the clip is present.
    pub(crate) span: FrameSpan,
}

/// Mask groups of `children` that hold only plain sprites and stay inside the clip's frames.
///
/// Groups are returned in ascending storage order.
pub(crate) fn find_mask_groups(graph: &Graph, children: &[ChildInstance]) -> Vec<MaskGroup> {
    let mut out = Vec::new();
    let mut depth = 0u32;
    let mut open = None;
    for i in (0..children.len()).rev() {
        match children[i].mask {
            Some(MaskEdge::Start) => {
                if depth == 0 {
                    open = Some(i);
                }
                depth += 1;
            }
            Some(MaskEdge::End) => {
                depth = depth.saturating_sub(1);
                if depth > 0 {
                    continue;
                }
                let Some(start) = open.take() else {
                    continue;
                };
                let group = MaskGroup {
                    end: i,
                    start,
                    span: children[start].span,
                };
                if group_is_plain(graph, children, group) {
                    out.push(group);
                }
            }
            None => {}
        }
    }
    out.reverse();
    out
}

fn group_is_plain(graph: &Graph, children: &[ChildInstance], group: MaskGroup) -> bool {
    let members = &children[group.end..=group.start];
    let inner = &members[1..members.len() - 1];
    inner.iter().all(|c| c.mask.is_none())
        && members.iter().all(|c| {
            c.name.is_none()
                && c.span.first >= group.span.first
                && c.span.last <= group.span.last
        })
        && members[1..].iter().all(|c| {
            graph
                .sprite(c.target)
                .is_some_and(|s| s.stable_name.is_none())
        })
}

/// First frame after `frame` at which some child of `children` changes placement or presence.
///
/// Child spans are relative to the group, whose timeline is `len` frames long.
pub(crate) fn stable_until(children: &[ChildInstance], frame: u32, len: u32) -> u32 {
    let mut until = len;
    for child in children {
        if child.span.first > frame {
            until = until.min(child.span.first);
        } else if let Some(local) = child.span.local(frame) {
            let changes = child.span.first + first_different_frame(child, local) as u32;
            until = until.min(changes);
        }
    }
    until.max(frame + 1)
}

impl Optimizer<'_> {
    /// Replace each plain mask group of `id` by prerendered stretches of unchanging frames.
    pub(super) fn prerender_masked_children(&mut self, id: ElementId) {
        let Some(sym) = self.graph.symbol(id) else {
            return;
        };
        let groups = find_mask_groups(self.graph, sym.children());
        if groups.is_empty() {
            return;
        }
        let mut children = sym.children().to_vec();
        for group in groups.into_iter().rev() {
            let Some(pieces) = self.prerender_mask_group(id, &children, group) else {
                continue;
            };
            children.splice(group.end..=group.start, pieces);
            self.stats.mask_groups_prerendered += 1;
        }
        self.replace_children(id, children);
        self.bounds.forget(id);
    }

    fn prerender_mask_group(
        &mut self,
        id: ElementId,
        children: &[ChildInstance],
        group: MaskGroup,
    ) -> Option<Vec<ChildInstance>> {
        let len = group.span.len_frames() as u32;
        let members: Vec<ChildInstance> = children[group.end..=group.start]
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.span = c.span.rebased(group.span.first);
                c
            })
            .collect();
        let temp = Symbol::new(self.next_id, len, members);

        let mut stretches: Vec<(u32, u32, AtlasImage)> = Vec::new();
        let mut frame = 0;
        while frame < len {
            let until = stable_until(temp.children(), frame, len);
            match self.render_detached(&temp, frame) {
                Ok(Some(img)) => stretches.push((frame, until, img)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%id, frame, error = %err, "mask group prerender failed; keeping it live");
                    return None;
                }
            }
            frame = until;
        }
        tracing::debug!(%id, stretches = stretches.len(), frames = len, "prerendering mask group");

        let mut pieces = Vec::with_capacity(stretches.len());
        for (first, until, img) in stretches {
            let sid = self.alloc_id();
            self.install_sprite(sid, img, None);
            pieces.push(ChildInstance::still(
                sid,
                FrameSpan {
                    first: group.span.first + first,
                    last: group.span.first + until - 1,
                },
                Affine::IDENTITY,
                ColorTransform::IDENTITY,
            ));
        }
        Some(pieces)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/masked.rs"]
mod tests;
