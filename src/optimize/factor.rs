use std::collections::{BTreeMap, BTreeSet};

use crate::foundation::core::{Affine, ElementId, FrameSpan};
use crate::geometry::algebra::{
    ColorTransform, colors_equivalent, invert_color, invert_transform, multiply_colors,
    multiply_transforms, patch_inverse_color, transforms_equivalent,
};
use crate::scene::graph::{ChildInstance, Element, Graph, MaskEdge, Symbol};

use super::occurrence::Occurrences;
use super::{Optimizer, effects_constant};

/// Siblings that keep a constant placement relative to a lead child on every frame.
///
/// Members are stored as single-frame children expressed in the lead's space, so the run can be
/// replaced by one instance of a symbol holding the members, placed with the lead's per-frame
/// transforms and colors.
#[derive(Clone, Debug)]
pub(crate) struct FactoredRun {
    span: FrameSpan,
    transforms: Vec<Affine>,
    colors: Vec<ColorTransform>,
    inverse_transforms: Vec<Affine>,
    inverse_colors: Vec<ColorTransform>,
    members: Vec<ChildInstance>,
    indices: Vec<usize>,
}

impl FactoredRun {
    pub(crate) fn start(lead: &ChildInstance, index: usize) -> Self {
        let mut run = Self {
            span: lead.span,
            transforms: lead.transforms.clone(),
            colors: lead.colors.clone(),
            inverse_transforms: lead.transforms.iter().map(|&t| invert_transform(t)).collect(),
            inverse_colors: lead.colors.iter().map(invert_color).collect(),
            members: Vec::new(),
            indices: vec![index],
        };
        run.push_member(lead, Affine::IDENTITY, ColorTransform::IDENTITY);
        run
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Members in lead space.
    pub(crate) fn members(&self) -> &[ChildInstance] {
        &self.members
    }

    /// Positions of the members in their owner's child list, ascending.
    pub(crate) fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn push_member(&mut self, child: &ChildInstance, transform: Affine, color: ColorTransform) {
        let mut member = ChildInstance::still(child.target, FrameSpan::single(0), transform, color);
        member.filters = child
            .filters
            .as_ref()
            .and_then(|f| f.first().cloned())
            .map(|l| vec![l]);
        member.blend_modes = child
            .blend_modes
            .as_ref()
            .and_then(|b| b.first().copied())
            .map(|b| vec![b]);
        member.mask = child.mask;
        self.members.push(member);
    }

    /// Add `candidate` when its placement relative to the lead is the same on every frame.
    pub(crate) fn try_add(&mut self, candidate: &ChildInstance, index: usize) -> bool {
        let n = self.transforms.len();
        if candidate.len_frames() != n {
            return false;
        }
        let mut fixed = Vec::with_capacity(n);
        let mut first: Option<(Affine, ColorTransform)> = None;
        for f in 0..n {
            let inverse = patch_inverse_color(&self.inverse_colors[f], &candidate.colors[f]);
            let t = multiply_transforms(self.inverse_transforms[f], candidate.transforms[f]);
            let c = multiply_colors(&inverse, &candidate.colors[f]);
            match first {
                None => {
                    if !t.as_coeffs().iter().all(|v| v.is_finite()) {
                        return false;
                    }
                    first = Some((t, c));
                }
                Some((t0, c0)) => {
                    if !transforms_equivalent(t, t0) || !colors_equivalent(&c, &c0) {
                        return false;
                    }
                }
            }
            fixed.push(inverse);
        }
        let Some((t, c)) = first else {
            return false;
        };
        self.inverse_colors = fixed;
        self.push_member(candidate, t, c);
        self.indices.push(index);
        true
    }

    /// Keep at most `n` members, shortened further so mask edges inside the run stay balanced.
    pub(crate) fn truncate(&mut self, n: usize) {
        let n = balanced_prefix(&self.members[..n.min(self.members.len())]);
        self.members.truncate(n);
        self.indices.truncate(n);
    }

    /// Take over `other`'s run when it has the same members at equivalent placements.
    ///
    /// Non-finite member colors of `self` are filled from `other` on success.
    pub(crate) fn matches(&mut self, other: &Self) -> bool {
        if other.len() > self.len() {
            return false;
        }
        for (mine, theirs) in self.members.iter().zip(other.members.iter()) {
            if mine.target != theirs.target
                || mine.mask != theirs.mask
                || !transforms_equivalent(mine.transform_at(0), theirs.transform_at(0))
                || !colors_equivalent(&mine.color_at(0), &theirs.color_at(0))
            {
                return false;
            }
        }
        for (mine, theirs) in self.members.iter_mut().zip(other.members.iter()) {
            let (c, o) = (&mut mine.colors[0], theirs.color_at(0));
            for ch in 0..4 {
                if !c.mult[ch].is_finite() || !c.add[ch].is_finite() {
                    c.mult[ch] = o.mult[ch];
                    c.add[ch] = o.add[ch];
                }
            }
        }
        true
    }

    /// Replace non-finite member colors using the original per-frame colors of each member.
    ///
    /// `originals[i]` is the child list entry member `i` was taken from.
    pub(crate) fn fix_member_colors(&mut self, originals: &[ChildInstance]) {
        for (member, original) in self.members.iter_mut().zip(originals) {
            let c = &mut member.colors[0];
            for ch in 0..4 {
                if c.mult[ch].is_finite() && c.add[ch].is_finite() {
                    continue;
                }
                let found = original.colors.iter().zip(&self.colors).find_map(|(o, lead)| {
                    let m = o.mult[ch] / lead.mult[ch];
                    let a = (o.add[ch] - lead.add[ch]) / lead.mult[ch];
                    (o.mult[ch] != 0.0 && m.is_finite() && a.is_finite()).then_some((m, a))
                });
                (c.mult[ch], c.add[ch]) = found.unwrap_or((0.0, 0.0));
            }
        }
    }

    /// Bring member multipliers back to at most 1, moving the excess into the lead colors.
    pub(crate) fn clamp_colors(&mut self) {
        let mut peak = [1.0f64; 4];
        for m in &self.members {
            for (p, &v) in peak.iter_mut().zip(m.color_at(0).mult.iter()) {
                *p = p.max(v);
            }
        }
        if peak == [1.0; 4] {
            return;
        }
        for m in &mut self.members {
            for ch in 0..4 {
                m.colors[0].mult[ch] /= peak[ch];
                m.colors[0].add[ch] /= peak[ch];
            }
        }
        for c in &mut self.colors {
            for ch in 0..4 {
                c.mult[ch] *= peak[ch];
            }
        }
    }

    /// Instance of `product` standing in for the whole run.
    pub(crate) fn replacement(&self, product: ElementId) -> ChildInstance {
        ChildInstance {
            target: product,
            span: self.span,
            transforms: self.transforms.clone(),
            colors: self.colors.clone(),
            filters: None,
            blend_modes: None,
            mask: None,
            name: None,
        }
    }
}

/// Longest prefix in which every opened mask group is closed again.
///
/// Storage order lists a group's closing edge first, so `End` opens and `Start` closes here.
fn balanced_prefix(members: &[ChildInstance]) -> usize {
    let mut depth = 0i32;
    let mut best = 0;
    for (i, m) in members.iter().enumerate() {
        match m.mask {
            Some(MaskEdge::End) => depth += 1,
            Some(MaskEdge::Start) => depth -= 1,
            None => {}
        }
        if depth < 0 {
            break;
        }
        if depth == 0 {
            best = i + 1;
        }
    }
    best
}

/// An unnamed instance of an unnamed sprite whose effects never change.
pub(crate) fn is_plain_sprite(graph: &Graph, child: &ChildInstance, allow_blend: bool) -> bool {
    graph
        .sprite(child.target)
        .is_some_and(|s| s.stable_name.is_none())
        && child.name.is_none()
        && (allow_blend || !child.has_blend())
        && effects_constant(child)
}

/// Grow a run from `children[at]` over the following siblings.
///
/// Siblings that never overlap the lead in time are stepped over. Inside a mask group, a sibling
/// spanning beyond the lead is split so that the part sharing the lead span can join.
pub(crate) fn factor_run_at(
    children: &mut Vec<ChildInstance>,
    at: usize,
    graph: &Graph,
    allow_blend: bool,
) -> FactoredRun {
    let lead_span = children[at].span;
    let mut run = FactoredRun::start(&children[at], at);
    let mut depth = i32::from(children[at].mask == Some(MaskEdge::End));

    let mut i = at;
    while i + 1 < children.len() {
        i += 1;
        let candidate = &children[i];
        if !candidate.span.overlaps(lead_span) {
            continue;
        }
        if candidate.mask == Some(MaskEdge::Start) && depth == 0 {
            break;
        }
        if !is_plain_sprite(graph, candidate, allow_blend) {
            break;
        }
        if candidate.span != lead_span {
            let span = candidate.span;
            if depth <= 0 || span.first > lead_span.first || span.last < lead_span.last {
                break;
            }
            let whole = children[i].clone();
            let head = (lead_span.first - span.first) as usize;
            let tail = head + lead_span.len_frames();
            children[i] = whole.slice(head..tail);
            let mut at_insert = i + 1;
            if head > 0 {
                children.insert(at_insert, whole.slice(0..head));
                at_insert += 1;
            }
            if tail < whole.len_frames() {
                children.insert(at_insert, whole.slice(tail..whole.len_frames()));
            }
        }

        if !run.try_add(&children[i], i) {
            break;
        }
        match children[i].mask {
            Some(MaskEdge::Start) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Some(MaskEdge::End) => depth += 1,
            None => {}
        }
    }

    run.truncate(run.len());
    run
}

/// Working copies of the child lists touched by one factoring step.
#[derive(Debug, Default)]
struct Drafts {
    lists: BTreeMap<ElementId, Vec<ChildInstance>>,
}

impl Drafts {
    fn list<'d>(&'d mut self, graph: &Graph, owner: ElementId) -> Option<&'d mut Vec<ChildInstance>> {
        if !self.lists.contains_key(&owner) {
            let sym = graph.symbol(owner)?;
            self.lists.insert(owner, sym.children().to_vec());
        }
        self.lists.get_mut(&owner)
    }

    fn sync(&self, occurrences: &mut Occurrences) {
        for (&owner, list) in &self.lists {
            occurrences.recount_children(owner, list);
        }
    }
}

enum Flow {
    Next,
    Stop,
}

impl Optimizer<'_> {
    /// Merge runs of sibling sprites of `id` that also appear, identically arranged, in the other
    /// owners of their lead sprite.
    pub(super) fn factor_children(&mut self, id: ElementId) {
        let allow_blend = self.settings.prerender_blendings;
        let mut drafts = Drafts::default();
        let mut c = 0;
        loop {
            let Some(list) = drafts.list(self.graph, id) else {
                break;
            };
            if c >= list.len() {
                break;
            }
            if !is_plain_sprite(self.graph, &list[c], allow_blend) {
                c += 1;
                continue;
            }
            let run = factor_run_at(list, c, self.graph, allow_blend);
            if run.len() < 2 {
                c += 1;
                continue;
            }
            let Some(runs) = self.matching_runs(&mut drafts, id, run) else {
                c += 1;
                continue;
            };
            drafts.sync(&mut self.occurrences);
            match self.commit_runs(&mut drafts, id, runs) {
                Flow::Next => c += 1,
                Flow::Stop => break,
            }
            drafts.sync(&mut self.occurrences);
        }

        for (owner, list) in std::mem::take(&mut drafts.lists) {
            self.replace_children(owner, list);
        }
    }

    /// Find every other run starting with the same sprite and agreeing with `first`.
    ///
    /// Returns `None` when the lead sprite has an instance elsewhere that cannot be factored.
    fn matching_runs(
        &mut self,
        drafts: &mut Drafts,
        id: ElementId,
        first: FactoredRun,
    ) -> Option<Vec<(ElementId, FactoredRun)>> {
        let allow_blend = self.settings.prerender_blendings;
        let lead = first.members[0].target;
        let after_first = first.indices.last().map_or(0, |&i| i + 1);
        let mut runs = vec![(id, first)];

        for owner in self.occurrences.owners(lead) {
            let Some(list) = drafts.list(self.graph, owner) else {
                continue;
            };
            let mut c = if owner == id { after_first } else { 0 };
            while c < list.len() {
                if list[c].target != lead {
                    c += 1;
                    continue;
                }
                if !is_plain_sprite(self.graph, &list[c], allow_blend) {
                    tracing::debug!(%id, %owner, lead = %lead, "lead sprite has a fixed instance elsewhere");
                    return None;
                }
                let mut other = factor_run_at(list, c, self.graph, allow_blend);
                other.truncate(runs[0].1.len());
                if other.len() < 2 {
                    tracing::debug!(%id, %owner, lead = %lead, "lead sprite also used alone; run not factorable");
                    return None;
                }
                if !runs[0].1.matches(&other) {
                    c += 1;
                    continue;
                }
                let n = other.len();
                for (_, run) in &mut runs {
                    run.truncate(n);
                }
                c = other.indices.last().map_or(c, |&i| i) + 1;
                runs.push((owner, other));
            }
        }
        Some(runs)
    }

    fn commit_runs(
        &mut self,
        drafts: &mut Drafts,
        id: ElementId,
        mut runs: Vec<(ElementId, FactoredRun)>,
    ) -> Flow {
        let product_id = self.alloc_id();
        {
            let (owner, first) = &mut runs[0];
            if let Some(list) = drafts.list(self.graph, *owner) {
                let originals: Vec<ChildInstance> =
                    first.indices.iter().map(|&i| list[i].clone()).collect();
                first.fix_member_colors(&originals);
            }
        }

        let saved_area = self.saved_area(&runs);
        let product = Symbol::new(product_id, 1, runs[0].1.members.clone());
        let sprite_area = self
            .bounds
            .fold_children(self.graph, &product, 0)
            .map_or(0.0, |r| r.area());
        let prerender = sprite_area <= saved_area * 1.5;
        tracing::debug!(
            %id,
            product = %product_id,
            members = runs[0].1.len(),
            occurrences = runs.len(),
            sprite_area,
            saved_area,
            prerender,
            "factoring sibling run"
        );

        if prerender {
            for (_, run) in &mut runs {
                run.clamp_colors();
            }
            let product = Symbol::new(product_id, 1, runs[0].1.members.clone());
            match self.render_detached(&product, 0) {
                Ok(Some(img)) => self.install_sprite(product_id, img, None),
                Ok(None) => return Flow::Next,
                Err(err) => {
                    tracing::warn!(%id, error = %err, "factored run prerender failed; leaving it unmerged");
                    return Flow::Next;
                }
            }
        } else {
            let whole = drafts
                .list(self.graph, id)
                .is_some_and(|l| l.len() == runs[0].1.len());
            if whole {
                return Flow::Stop;
            }
            self.graph.insert(Element::Symbol(product));
            self.occurrences.recount(self.graph, product_id);
            self.pending.push(product_id);
        }

        for (owner, run) in runs.iter().rev() {
            let Some(list) = drafts.list(self.graph, *owner) else {
                continue;
            };
            let replacement = run.replacement(product_id);
            for (k, &i) in run.indices.iter().enumerate().rev() {
                if k == 0 {
                    list[i] = replacement.clone();
                } else {
                    list.remove(i);
                }
            }
        }
        self.stats.runs_factored += 1;
        Flow::Next
    }

    /// Area of the member sprites that are referenced nowhere but inside `runs`.
    fn saved_area(&self, runs: &[(ElementId, FactoredRun)]) -> f64 {
        let mut in_runs: BTreeMap<ElementId, u32> = BTreeMap::new();
        for (_, run) in runs {
            for m in &run.members {
                *in_runs.entry(m.target).or_default() += 1;
            }
        }
        let mut seen = BTreeSet::new();
        let mut saved = 0.0;
        for m in &runs[0].1.members {
            if !seen.insert(m.target) {
                continue;
            }
            let used = in_runs.get(&m.target).copied().unwrap_or(0);
            if self.occurrences.total(m.target) > used {
                continue;
            }
            if let Some(sprite) = self.graph.sprite(m.target) {
                saved += sprite.bounds.area();
            }
        }
        saved
    }
}

#[cfg(test)]
#[path = "../../tests/unit/optimize/factor.rs"]
mod tests;
