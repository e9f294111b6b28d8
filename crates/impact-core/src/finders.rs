// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Spatial Finders
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Neighbour-finding substrate: k-d tree, uniform linked-list grid and
//! a bounding-sphere BVH behind one range-query contract.
//!
//! `build` becomes the finder's ground truth until the next build; the
//! caller supplies the physical query radius (finders never see h).
//! Queries are `&self` and may run concurrently on distinct threads.
//! The optional rank permutation makes `find_lower_rank` return each
//! particle pair exactly once during symmetric evaluation.

use crate::scheduler::Scheduler;
use impact_math::vector::{max_element_wise, min_element_wise, sqr_length, Vector, X, Y, Z};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighbourRecord {
    pub index: usize,
    pub distance_sqr: f64,
}

pub trait SpatialFinder: Send + Sync {
    /// Rebuild internal structures from the given positions.
    fn build(&mut self, scheduler: &dyn Scheduler, points: &[Vector]);

    /// Install a rank permutation used by `find_lower_rank`; cleared by
    /// passing `None`.
    fn set_rank(&mut self, rank: Option<Vec<usize>>);

    /// Append a record for every stored point within `radius` of
    /// `position`, returning the number found.
    fn find_all_point(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
    ) -> usize;

    /// Range query around a stored point, the point itself included.
    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize;

    /// Range query returning only neighbours of strictly lower rank.
    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize;
}

/// Rank permutation from a sort key: `rank[i]` is the position of
/// particle i in ascending key order, ties broken by index.
pub fn rank_from_key(count: usize, key: impl Fn(usize) -> f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_unstable_by(|&a, &b| key(a).total_cmp(&key(b)).then(a.cmp(&b)));
    let mut rank = vec![0; count];
    for (position, &index) in order.iter().enumerate() {
        rank[index] = position;
    }
    rank
}

#[derive(Default)]
struct FinderBase {
    points: Vec<Vector>,
    rank: Option<Vec<usize>>,
}

impl FinderBase {
    fn assign(&mut self, points: &[Vector]) {
        self.points.clear();
        self.points.extend_from_slice(points);
    }

    fn admits(&self, query: usize, candidate: usize) -> bool {
        match &self.rank {
            Some(rank) => rank[candidate] < rank[query],
            None => candidate != query,
        }
    }
}

// ── k-d tree ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum KdNode {
    Inner {
        axis: usize,
        split: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        begin: usize,
        end: usize,
    },
}

/// Median-split k-d tree with contiguous leaf index ranges, built in
/// parallel below a configurable depth.
pub struct KdTree {
    base: FinderBase,
    nodes: Vec<KdNode>,
    ordered: Vec<usize>,
    leaf_size: usize,
    parallel_depth: usize,
}

impl KdTree {
    pub fn new() -> Self {
        KdTree {
            base: FinderBase::default(),
            nodes: Vec::new(),
            ordered: Vec::new(),
            leaf_size: 25,
            parallel_depth: 3,
        }
    }

    pub fn with_leaf_size(leaf_size: usize) -> Self {
        let mut tree = KdTree::new();
        tree.leaf_size = leaf_size.max(1);
        tree
    }

    fn build_subtree(
        points: &[Vector],
        idxs: &mut [usize],
        offset: usize,
        leaf_size: usize,
        parallel_depth: usize,
        scheduler: &dyn Scheduler,
    ) -> Vec<KdNode> {
        if idxs.len() <= leaf_size {
            return vec![KdNode::Leaf {
                begin: offset,
                end: offset + idxs.len(),
            }];
        }
        // split on the longest axis of the bounding box
        let mut lower = Vector::splat(f64::INFINITY);
        let mut upper = Vector::splat(f64::NEG_INFINITY);
        for &i in idxs.iter() {
            lower = min_element_wise(lower, points[i]);
            upper = max_element_wise(upper, points[i]);
        }
        let extent = upper - lower;
        let axis = [X, Y, Z]
            .into_iter()
            .max_by(|&a, &b| extent[a].total_cmp(&extent[b]))
            .unwrap();

        let mid = idxs.len() / 2;
        idxs.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));
        let split = points[idxs[mid]][axis];
        let (left_idxs, right_idxs) = idxs.split_at_mut(mid);

        let (left_arena, right_arena) = if parallel_depth > 0 {
            let left_slot: Mutex<Vec<KdNode>> = Mutex::new(Vec::new());
            let right_slot: Mutex<Vec<KdNode>> = Mutex::new(Vec::new());
            {
                let left_cell = Mutex::new(Some(left_idxs));
                let right_cell = Mutex::new(Some(right_idxs));
                scheduler.parallel_invoke(
                    &|| {
                        let idxs = left_cell.lock().unwrap().take().unwrap();
                        *left_slot.lock().unwrap() = Self::build_subtree(
                            points,
                            idxs,
                            offset,
                            leaf_size,
                            parallel_depth - 1,
                            scheduler,
                        );
                    },
                    &|| {
                        let idxs = right_cell.lock().unwrap().take().unwrap();
                        *right_slot.lock().unwrap() = Self::build_subtree(
                            points,
                            idxs,
                            offset + mid,
                            leaf_size,
                            parallel_depth - 1,
                            scheduler,
                        );
                    },
                );
            }
            (
                left_slot.into_inner().unwrap(),
                right_slot.into_inner().unwrap(),
            )
        } else {
            (
                Self::build_subtree(points, left_idxs, offset, leaf_size, 0, scheduler),
                Self::build_subtree(points, right_idxs, offset + mid, leaf_size, 0, scheduler),
            )
        };

        let mut arena = Vec::with_capacity(1 + left_arena.len() + right_arena.len());
        arena.push(KdNode::Inner {
            axis,
            split,
            left: 1,
            right: 1 + left_arena.len(),
        });
        let shift_left = 1;
        arena.extend(left_arena.into_iter().map(|node| shift(node, shift_left)));
        let shift_right = arena.len();
        arena.extend(right_arena.into_iter().map(|node| shift(node, shift_right)));
        arena
    }

    fn query(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
        mut admit: impl FnMut(usize) -> bool,
    ) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let radius_sqr = radius * radius;
        let found_before = out.len();
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            match &self.nodes[node] {
                KdNode::Inner {
                    axis,
                    split,
                    left,
                    right,
                } => {
                    if position[*axis] - radius <= *split {
                        stack.push(*left);
                    }
                    if position[*axis] + radius >= *split {
                        stack.push(*right);
                    }
                }
                KdNode::Leaf { begin, end } => {
                    for &j in &self.ordered[*begin..*end] {
                        let distance_sqr = sqr_length(self.base.points[j] - position);
                        if distance_sqr <= radius_sqr && admit(j) {
                            out.push(NeighbourRecord {
                                index: j,
                                distance_sqr,
                            });
                        }
                    }
                }
            }
        }
        out.len() - found_before
    }
}

impl Default for KdTree {
    fn default() -> Self {
        KdTree::new()
    }
}

fn shift(node: KdNode, base: usize) -> KdNode {
    match node {
        KdNode::Inner {
            axis,
            split,
            left,
            right,
        } => KdNode::Inner {
            axis,
            split,
            left: left + base,
            right: right + base,
        },
        leaf => leaf,
    }
}

impl SpatialFinder for KdTree {
    fn build(&mut self, scheduler: &dyn Scheduler, points: &[Vector]) {
        self.base.assign(points);
        self.ordered = (0..points.len()).collect();
        if points.is_empty() {
            self.nodes.clear();
            return;
        }
        let mut ordered = std::mem::take(&mut self.ordered);
        self.nodes = Self::build_subtree(
            &self.base.points,
            &mut ordered,
            0,
            self.leaf_size,
            self.parallel_depth,
            scheduler,
        );
        self.ordered = ordered;
    }

    fn set_rank(&mut self, rank: Option<Vec<usize>>) {
        self.base.rank = rank;
    }

    fn find_all_point(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
    ) -> usize {
        self.query(position, radius, out, |_| true)
    }

    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |_| true)
    }

    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |j| {
            self.base.admits(index, j)
        })
    }
}

// ── uniform linked-list grid ─────────────────────────────────────────

/// Cells of side ~N^(1/3); particles bucketed into head/next chains.
/// Fast for near-uniform distributions.
pub struct UniformGridFinder {
    base: FinderBase,
    lower: Vector,
    inv_cell: Vector,
    dims: [usize; 3],
    heads: Vec<i64>,
    next: Vec<i64>,
}

impl UniformGridFinder {
    pub fn new() -> Self {
        UniformGridFinder {
            base: FinderBase::default(),
            lower: Vector::zero(),
            inv_cell: Vector::zero(),
            dims: [1, 1, 1],
            heads: Vec::new(),
            next: Vec::new(),
        }
    }

    fn cell_of(&self, position: Vector) -> [usize; 3] {
        let mut cell = [0usize; 3];
        for axis in 0..3 {
            let relative = (position[axis] - self.lower[axis]) * self.inv_cell[axis];
            cell[axis] = (relative.max(0.0) as usize).min(self.dims[axis] - 1);
        }
        cell
    }

    fn cell_index(&self, cell: [usize; 3]) -> usize {
        (cell[2] * self.dims[1] + cell[1]) * self.dims[0] + cell[0]
    }

    fn query(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
        mut admit: impl FnMut(usize) -> bool,
    ) -> usize {
        if self.next.is_empty() {
            return 0;
        }
        let radius_sqr = radius * radius;
        let found_before = out.len();
        let lo = self.cell_of(position - Vector::splat(radius));
        let hi = self.cell_of(position + Vector::splat(radius));
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let mut cursor = self.heads[self.cell_index([x, y, z])];
                    while cursor >= 0 {
                        let j = cursor as usize;
                        let distance_sqr = sqr_length(self.base.points[j] - position);
                        if distance_sqr <= radius_sqr && admit(j) {
                            out.push(NeighbourRecord {
                                index: j,
                                distance_sqr,
                            });
                        }
                        cursor = self.next[j];
                    }
                }
            }
        }
        out.len() - found_before
    }
}

impl Default for UniformGridFinder {
    fn default() -> Self {
        UniformGridFinder::new()
    }
}

impl SpatialFinder for UniformGridFinder {
    fn build(&mut self, _scheduler: &dyn Scheduler, points: &[Vector]) {
        self.base.assign(points);
        let n = points.len();
        self.next = vec![-1; n];
        if n == 0 {
            self.heads.clear();
            return;
        }
        let mut lower = Vector::splat(f64::INFINITY);
        let mut upper = Vector::splat(f64::NEG_INFINITY);
        for point in points {
            lower = min_element_wise(lower, *point);
            upper = max_element_wise(upper, *point);
        }
        let side = (n as f64).cbrt().ceil() as usize;
        let side = side.max(1);
        self.dims = [side, side, side];
        self.lower = lower;
        for axis in 0..3 {
            let extent = (upper[axis] - lower[axis]).max(f64::EPSILON);
            self.inv_cell[axis] = self.dims[axis] as f64 / (extent * (1.0 + 1.0e-10));
        }
        self.heads = vec![-1; self.dims[0] * self.dims[1] * self.dims[2]];
        for (i, point) in points.iter().enumerate() {
            let cell = self.cell_index(self.cell_of(*point));
            self.next[i] = self.heads[cell];
            self.heads[cell] = i as i64;
        }
    }

    fn set_rank(&mut self, rank: Option<Vec<usize>>) {
        self.base.rank = rank;
    }

    fn find_all_point(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
    ) -> usize {
        self.query(position, radius, out, |_| true)
    }

    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |_| true)
    }

    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |j| {
            self.base.admits(index, j)
        })
    }
}

// ── bounding-sphere BVH ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct BvhNode {
    center: Vector,
    radius: f64,
    leaf: bool,
    /// Leaf: range into the ordered index list.
    begin: usize,
    end: usize,
    /// Inner: right child at node + right_offset; left child at
    /// node + 1 (preorder layout).
    right_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub index: usize,
    pub t: f64,
}

/// BVH over bounding spheres; also serves as a ray intersector when the
/// stored spheres have nonzero radii.
pub struct BvhFinder {
    base: FinderBase,
    radii: Vec<f64>,
    nodes: Vec<BvhNode>,
    ordered: Vec<usize>,
    leaf_size: usize,
}

impl BvhFinder {
    pub fn new() -> Self {
        BvhFinder {
            base: FinderBase::default(),
            radii: Vec::new(),
            nodes: Vec::new(),
            ordered: Vec::new(),
            leaf_size: 4,
        }
    }

    /// Build over explicit spheres, for ray casting.
    pub fn build_spheres(&mut self, centers: &[Vector], radii: &[f64]) {
        debug_assert!(centers.len() == radii.len());
        self.base.assign(centers);
        self.radii = radii.to_vec();
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let n = self.base.points.len();
        self.ordered = (0..n).collect();
        self.nodes.clear();
        if n == 0 {
            return;
        }
        let mut ordered = std::mem::take(&mut self.ordered);
        self.build_node(&mut ordered, 0);
        self.ordered = ordered;
    }

    fn bounding_sphere(&self, idxs: &[usize]) -> (Vector, f64) {
        let mut center = Vector::zero();
        for &i in idxs {
            center += self.base.points[i];
        }
        center = center / idxs.len() as f64;
        let mut radius = 0.0_f64;
        for &i in idxs {
            radius = radius.max(sqr_length(self.base.points[i] - center).sqrt() + self.radii[i]);
        }
        (center, radius)
    }

    /// Preorder build; returns the subtree size.
    fn build_node(&mut self, idxs: &mut [usize], begin: usize) -> usize {
        let (center, radius) = self.bounding_sphere(idxs);
        let node_index = self.nodes.len();
        self.nodes.push(BvhNode {
            center,
            radius,
            leaf: true,
            begin,
            end: begin + idxs.len(),
            right_offset: 0,
        });
        if idxs.len() <= self.leaf_size {
            return 1;
        }
        // split along the axis with the largest centroid spread
        let mut lower = Vector::splat(f64::INFINITY);
        let mut upper = Vector::splat(f64::NEG_INFINITY);
        for &i in idxs.iter() {
            lower = min_element_wise(lower, self.base.points[i]);
            upper = max_element_wise(upper, self.base.points[i]);
        }
        let extent = upper - lower;
        let axis = [X, Y, Z]
            .into_iter()
            .max_by(|&a, &b| extent[a].total_cmp(&extent[b]))
            .unwrap();
        if extent[axis] == 0.0 {
            return 1; // degenerate cloud stays a leaf
        }
        let mid = idxs.len() / 2;
        let points = &self.base.points;
        idxs.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));
        let (left_idxs, right_idxs) = idxs.split_at_mut(mid);

        let left_size = self.build_node(left_idxs, begin);
        let right_size = self.build_node(right_idxs, begin + mid);
        let node = &mut self.nodes[node_index];
        node.leaf = false;
        node.right_offset = 1 + left_size;
        1 + left_size + right_size
    }

    fn query(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
        mut admit: impl FnMut(usize) -> bool,
    ) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let radius_sqr = radius * radius;
        let found_before = out.len();
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            let bound = radius + node.radius;
            if sqr_length(node.center - position) > bound * bound {
                continue;
            }
            if node.leaf {
                for &j in &self.ordered[node.begin..node.end] {
                    let distance_sqr = sqr_length(self.base.points[j] - position);
                    if distance_sqr <= radius_sqr && admit(j) {
                        out.push(NeighbourRecord {
                            index: j,
                            distance_sqr,
                        });
                    }
                }
            } else {
                stack.push(node_index + 1);
                stack.push(node_index + node.right_offset);
            }
        }
        out.len() - found_before
    }

    /// Closest sphere hit by the ray `origin + t * direction`, t >= 0.
    pub fn intersect_ray(&self, origin: Vector, direction: Vector) -> Option<RayHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir_sqr = 1.0 / sqr_length(direction);
        let mut best: Option<RayHit> = None;
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            if ray_sphere(origin, direction, inv_dir_sqr, node.center, node.radius).is_none() {
                continue;
            }
            if node.leaf {
                for &j in &self.ordered[node.begin..node.end] {
                    if let Some(t) = ray_sphere(
                        origin,
                        direction,
                        inv_dir_sqr,
                        self.base.points[j],
                        self.radii[j],
                    ) {
                        if best.map(|hit| t < hit.t).unwrap_or(true) {
                            best = Some(RayHit { index: j, t });
                        }
                    }
                }
            } else {
                stack.push(node_index + 1);
                stack.push(node_index + node.right_offset);
            }
        }
        best
    }
}

impl Default for BvhFinder {
    fn default() -> Self {
        BvhFinder::new()
    }
}

/// Smallest non-negative ray parameter hitting the sphere.
fn ray_sphere(
    origin: Vector,
    direction: Vector,
    inv_dir_sqr: f64,
    center: Vector,
    radius: f64,
) -> Option<f64> {
    let to_center = center - origin;
    let projection = impact_math::vector::dot(to_center, direction) * inv_dir_sqr;
    let closest_sqr = sqr_length(to_center - direction * projection);
    if closest_sqr > radius * radius {
        return None;
    }
    let half_chord = ((radius * radius - closest_sqr) * inv_dir_sqr).sqrt();
    let t_near = projection - half_chord;
    let t_far = projection + half_chord;
    if t_far < 0.0 {
        None
    } else {
        Some(t_near.max(0.0))
    }
}

impl SpatialFinder for BvhFinder {
    fn build(&mut self, _scheduler: &dyn Scheduler, points: &[Vector]) {
        self.base.assign(points);
        self.radii = vec![0.0; points.len()];
        self.rebuild();
    }

    fn set_rank(&mut self, rank: Option<Vec<usize>>) {
        self.base.rank = rank;
    }

    fn find_all_point(
        &self,
        position: Vector,
        radius: f64,
        out: &mut Vec<NeighbourRecord>,
    ) -> usize {
        self.query(position, radius, out, |_| true)
    }

    fn find_all(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |_| true)
    }

    fn find_lower_rank(&self, index: usize, radius: f64, out: &mut Vec<NeighbourRecord>) -> usize {
        self.query(self.base.points[index], radius, out, |j| {
            self.base.admits(index, j)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{RayonScheduler, SequentialScheduler};

    fn cloud(n: usize) -> Vec<Vector> {
        // deterministic pseudo-random cloud
        (0..n)
            .map(|i| {
                let t = i as f64;
                Vector::new(
                    (t * 12.9898).sin() * 43.758 % 1.0,
                    (t * 78.233).sin() * 96.345 % 1.0,
                    (t * 39.425).sin() * 71.123 % 1.0,
                )
            })
            .collect()
    }

    fn brute_force(points: &[Vector], position: Vector, radius: f64) -> Vec<usize> {
        let mut found: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| sqr_length(**p - position) <= radius * radius)
            .map(|(i, _)| i)
            .collect();
        found.sort_unstable();
        found
    }

    fn sorted_indices(records: &[NeighbourRecord]) -> Vec<usize> {
        let mut indices: Vec<usize> = records.iter().map(|record| record.index).collect();
        indices.sort_unstable();
        indices
    }

    #[test]
    fn test_finders_agree_with_brute_force() {
        let points = cloud(300);
        let scheduler = SequentialScheduler;
        let mut finders: Vec<Box<dyn SpatialFinder>> = vec![
            Box::new(KdTree::with_leaf_size(8)),
            Box::new(UniformGridFinder::new()),
            Box::new(BvhFinder::new()),
        ];
        for finder in &mut finders {
            finder.build(&scheduler, &points);
        }
        let mut records = Vec::new();
        for &radius in &[0.05, 0.2, 1.0] {
            for i in (0..points.len()).step_by(17) {
                let expected = brute_force(&points, points[i], radius);
                for finder in &finders {
                    records.clear();
                    finder.find_all(i, radius, &mut records);
                    assert_eq!(
                        sorted_indices(&records),
                        expected,
                        "disagreement at i={i}, radius={radius}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_parallel_build_matches_sequential() {
        let points = cloud(500);
        let pool = RayonScheduler::new(4).unwrap();
        let mut sequential = KdTree::with_leaf_size(10);
        sequential.build(&SequentialScheduler, &points);
        let mut parallel = KdTree::with_leaf_size(10);
        parallel.build(&pool, &points);

        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in (0..points.len()).step_by(23) {
            a.clear();
            b.clear();
            sequential.find_all(i, 0.15, &mut a);
            parallel.find_all(i, 0.15, &mut b);
            assert_eq!(sorted_indices(&a), sorted_indices(&b));
        }
    }

    #[test]
    fn test_rank_filter_visits_each_pair_once() {
        let points = cloud(120);
        let scheduler = SequentialScheduler;
        let mut tree = KdTree::with_leaf_size(6);
        let rank = rank_from_key(points.len(), |i| points[i][X]);
        tree.build(&scheduler, &points);
        tree.set_rank(Some(rank));

        let radius = 0.3;
        let mut pairs = std::collections::HashSet::new();
        let mut records = Vec::new();
        for i in 0..points.len() {
            records.clear();
            tree.find_lower_rank(i, radius, &mut records);
            for record in &records {
                let pair = (i.min(record.index), i.max(record.index));
                assert!(pairs.insert(pair), "pair {pair:?} visited twice");
            }
        }
        // every brute-force pair was visited
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                if sqr_length(points[i] - points[j]) <= radius * radius {
                    assert!(pairs.contains(&(i, j)), "pair ({i}, {j}) missed");
                }
            }
        }
    }

    #[test]
    fn test_find_all_point_off_grid() {
        let points = cloud(100);
        let scheduler = SequentialScheduler;
        let mut grid = UniformGridFinder::new();
        grid.build(&scheduler, &points);
        let probe = Vector::new(10.0, 10.0, 10.0); // far outside the cloud
        let mut records = Vec::new();
        assert_eq!(grid.find_all_point(probe, 0.5, &mut records), 0);
    }

    #[test]
    fn test_bvh_ray_intersection() {
        let centers = vec![
            Vector::new(5.0, 0.0, 0.0),
            Vector::new(10.0, 0.0, 0.0),
            Vector::new(5.0, 3.0, 0.0),
        ];
        let radii = vec![1.0, 1.0, 0.5];
        let mut bvh = BvhFinder::new();
        bvh.build_spheres(&centers, &radii);

        let hit = bvh
            .intersect_ray(Vector::zero(), Vector::new(1.0, 0.0, 0.0))
            .expect("ray along x must hit");
        assert_eq!(hit.index, 0);
        assert!((hit.t - 4.0).abs() < 1e-12);

        let miss = bvh.intersect_ray(Vector::zero(), Vector::new(0.0, 0.0, 1.0));
        assert!(miss.is_none());
    }

    #[test]
    fn test_empty_build_queries() {
        let scheduler = SequentialScheduler;
        let mut tree = KdTree::new();
        tree.build(&scheduler, &[]);
        let mut records = Vec::new();
        assert_eq!(tree.find_all_point(Vector::zero(), 1.0, &mut records), 0);
    }
}
