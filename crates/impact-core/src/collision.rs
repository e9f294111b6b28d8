// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Collision Resolver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Hard-sphere collision resolver.
//!
//! Entered once per step with the new velocities already in place; the
//! resolver owns the position advance over the timestep. The initial
//! sweep is parallel and uses a rank tree so that each pair is found
//! exactly once; the processing loop is sequential because event
//! ordering is globally significant. Processing an event advances the
//! two bodies to the contact time, dispatches the handler, rewinds by
//! the (possibly updated) velocity, and re-scans the involved bodies in
//! the remaining window; at the end all positions advance by the full
//! timestep, which reproduces the piecewise-linear trajectories.
//! Overlaps above the configured fraction of (h1 + h2), compared in
//! the squared convention, are routed to the overlap handler; smaller
//! overlaps are ignored as noise.

use crate::finders::{rank_from_key, KdTree, NeighbourRecord, SpatialFinder};
use crate::scheduler::{Scheduler, ThreadLocal};
use crate::storage::{QuantityId, RemoveFlags, Storage};
use impact_math::vector::{dot, length, sqr_length, Vector};
use impact_types::error::ImpactResult;
use impact_types::stats::Statistics;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionResult {
    None,
    Bounce,
    Merger,
}

/// Mutable view of the body states handlers operate on. The h lane of
/// a position is the collision radius of the body. Angular velocities
/// are present only when the storage carries them.
pub struct CollisionContext<'a> {
    pub r: &'a mut [Vector],
    pub v: &'a mut [Vector],
    pub m: &'a mut [f64],
    pub omega: Option<&'a mut [Vector]>,
}

/// a - b over the geometric lanes only.
fn geometric_difference(a: Vector, b: Vector) -> Vector {
    Vector::new(a[0] - b[0], a[1] - b[1], a[2] - b[2])
}

pub trait CollisionHandler: Send + Sync {
    /// Resolve the contact of bodies i and j; removed bodies are pushed
    /// into `to_remove`.
    fn collide(
        &mut self,
        context: &mut CollisionContext<'_>,
        i: usize,
        j: usize,
        to_remove: &mut Vec<usize>,
    ) -> CollisionResult;
}

/// Rejects every collision; useful to switch the resolver off while
/// keeping the pipeline identical.
pub struct NullCollisionHandler;

impl CollisionHandler for NullCollisionHandler {
    fn collide(
        &mut self,
        _context: &mut CollisionContext<'_>,
        _i: usize,
        _j: usize,
        _to_remove: &mut Vec<usize>,
    ) -> CollisionResult {
        CollisionResult::None
    }
}

/// Bounce with separate normal and tangential restitution.
pub struct ElasticBounceHandler {
    restitution_normal: f64,
    restitution_tangent: f64,
}

impl ElasticBounceHandler {
    pub fn new(restitution_normal: f64, restitution_tangent: f64) -> Self {
        ElasticBounceHandler {
            restitution_normal,
            restitution_tangent,
        }
    }
}

impl CollisionHandler for ElasticBounceHandler {
    fn collide(
        &mut self,
        context: &mut CollisionContext<'_>,
        i: usize,
        j: usize,
        _to_remove: &mut Vec<usize>,
    ) -> CollisionResult {
        let dr = context.r[i] - context.r[j];
        let distance = length(dr);
        if distance == 0.0 {
            return CollisionResult::None;
        }
        let normal = Vector::new(dr[0], dr[1], dr[2]) / distance;
        let total_mass = context.m[i] + context.m[j];
        let v_com = (context.v[i] * context.m[i] + context.v[j] * context.m[j]) / total_mass;
        for &k in &[i, j] {
            let dh = context.v[k].h();
            let relative = context.v[k] - v_com;
            let normal_part = normal * dot(relative, normal);
            let tangent_part = relative - normal_part;
            let mut updated = v_com + tangent_part * self.restitution_tangent
                - normal_part * self.restitution_normal;
            updated.set_h(dh);
            context.v[k] = updated;
        }
        CollisionResult::Bounce
    }
}

/// Unconditional merger; the higher index is absorbed, the survivor
/// carries the combined mass, momentum and volume-equivalent radius.
pub struct PerfectMergingHandler;

impl PerfectMergingHandler {
    /// Moment of inertia of a homogeneous sphere.
    fn sphere_inertia(mass: f64, radius: f64) -> f64 {
        0.4 * mass * radius * radius
    }

    fn merge(context: &mut CollisionContext<'_>, i: usize, j: usize, to_remove: &mut Vec<usize>) {
        let survivor = i.min(j);
        let absorbed = i.max(j);
        let total_mass = context.m[survivor] + context.m[absorbed];
        let weight_s = context.m[survivor] / total_mass;
        let weight_a = context.m[absorbed] / total_mass;
        let radius = (context.r[survivor].h().powi(3) + context.r[absorbed].h().powi(3)).cbrt();
        let mut position =
            context.r[survivor] * weight_s + context.r[absorbed] * weight_a;
        position.set_h(radius);
        let mut velocity =
            context.v[survivor] * weight_s + context.v[absorbed] * weight_a;
        velocity.set_h(context.v[survivor].h());

        // spin: total angular momentum about the merged centre survives
        if let Some(omega) = context.omega.as_deref_mut() {
            let mut angular_momentum = Vector::zero();
            for &k in &[survivor, absorbed] {
                let arm = geometric_difference(context.r[k], position);
                let relative = geometric_difference(context.v[k], velocity);
                angular_momentum += impact_math::vector::cross(arm, relative) * context.m[k]
                    + omega[k] * Self::sphere_inertia(context.m[k], context.r[k].h());
            }
            omega[survivor] = angular_momentum / Self::sphere_inertia(total_mass, radius);
        }

        context.r[survivor] = position;
        context.v[survivor] = velocity;
        context.m[survivor] = total_mass;
        to_remove.push(absorbed);
    }
}

impl CollisionHandler for PerfectMergingHandler {
    fn collide(
        &mut self,
        context: &mut CollisionContext<'_>,
        i: usize,
        j: usize,
        to_remove: &mut Vec<usize>,
    ) -> CollisionResult {
        Self::merge(context, i, j, to_remove);
        CollisionResult::Merger
    }
}

/// Merge when the impact speed is below a multiple of the mutual
/// escape velocity, bounce otherwise.
pub struct MergeOrBounceHandler {
    gravity_constant: f64,
    merging_limit: f64,
    bounce: ElasticBounceHandler,
}

impl MergeOrBounceHandler {
    pub fn new(
        gravity_constant: f64,
        merging_limit: f64,
        restitution_normal: f64,
        restitution_tangent: f64,
    ) -> Self {
        MergeOrBounceHandler {
            gravity_constant,
            merging_limit,
            bounce: ElasticBounceHandler::new(restitution_normal, restitution_tangent),
        }
    }
}

impl CollisionHandler for MergeOrBounceHandler {
    fn collide(
        &mut self,
        context: &mut CollisionContext<'_>,
        i: usize,
        j: usize,
        to_remove: &mut Vec<usize>,
    ) -> CollisionResult {
        let relative_sqr = sqr_length(context.v[i] - context.v[j]);
        let separation = context.r[i].h() + context.r[j].h();
        let escape_sqr =
            2.0 * self.gravity_constant * (context.m[i] + context.m[j]) / separation;
        if relative_sqr < self.merging_limit * self.merging_limit * escape_sqr {
            PerfectMergingHandler::merge(context, i, j, to_remove);
            CollisionResult::Merger
        } else {
            self.bounce.collide(context, i, j, to_remove)
        }
    }
}

/// Overlap handler separating the pair along the centre line, moving
/// each body inversely proportional to its mass.
pub struct RepelHandler;

impl CollisionHandler for RepelHandler {
    fn collide(
        &mut self,
        context: &mut CollisionContext<'_>,
        i: usize,
        j: usize,
        _to_remove: &mut Vec<usize>,
    ) -> CollisionResult {
        let dr = context.r[i] - context.r[j];
        let distance = length(dr);
        let target = context.r[i].h() + context.r[j].h();
        if distance == 0.0 || distance >= target {
            return CollisionResult::None;
        }
        let normal = Vector::new(dr[0], dr[1], dr[2]) / distance;
        let push = target - distance;
        let total_mass = context.m[i] + context.m[j];
        let share_i = context.m[j] / total_mass;
        let share_j = context.m[i] / total_mass;
        let h_i = context.r[i].h();
        let h_j = context.r[j].h();
        context.r[i] = (context.r[i] + normal * (push * share_i)).of_h(h_i);
        context.r[j] = (context.r[j] - normal * (push * share_j)).of_h(h_j);
        CollisionResult::None
    }
}

#[derive(Debug, Clone, Copy)]
struct CollisionRecord {
    t_coll: f64,
    overlap: f64,
    i: usize,
    j: usize,
    version_i: u32,
    version_j: u32,
}

impl PartialEq for CollisionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for CollisionRecord {}

impl PartialOrd for CollisionRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CollisionRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.t_coll
            .total_cmp(&other.t_coll)
            .then(other.overlap.total_cmp(&self.overlap))
            .then(self.i.cmp(&other.i))
            .then(self.j.cmp(&other.j))
            .then(self.version_i.cmp(&other.version_i))
            .then(self.version_j.cmp(&other.version_j))
    }
}

/// Outcome of the contact test for one pair.
enum Contact {
    None,
    /// Touch at t within the window.
    At(f64),
    /// Already overlapping by the given depth.
    Overlap(f64),
}

fn check_contact(
    r_i: Vector,
    v_i: Vector,
    r_j: Vector,
    v_j: Vector,
    window: (f64, f64),
) -> Contact {
    let dr = r_i - r_j;
    let dv = v_i - v_j;
    let separation = r_i.h() + r_j.h();
    let c = sqr_length(dr) - separation * separation;
    if c < 0.0 {
        return Contact::Overlap(separation - sqr_length(dr).sqrt());
    }
    let dvdr = dot(dv, dr);
    if dvdr >= 0.0 {
        return Contact::None; // receding pair
    }
    let a = sqr_length(dv);
    if a == 0.0 {
        return Contact::None;
    }
    let discriminant = dvdr * dvdr - a * c;
    if discriminant < 0.0 {
        return Contact::None;
    }
    let t = (-dvdr - discriminant.sqrt()) / a;
    if t >= window.0 && t <= window.1 {
        Contact::At(t)
    } else {
        Contact::None
    }
}

/// Statistics and handlers of the hard-sphere pass.
pub struct CollisionResolver {
    finder: KdTree,
    handler: Box<dyn CollisionHandler>,
    overlap_handler: Box<dyn CollisionHandler>,
    /// Allowed overlap as a fraction of (h1 + h2); the comparison uses
    /// the squared fraction.
    allowed_overlap: f64,
}

impl CollisionResolver {
    pub fn new(
        handler: Box<dyn CollisionHandler>,
        overlap_handler: Box<dyn CollisionHandler>,
        allowed_overlap: f64,
    ) -> Self {
        CollisionResolver {
            finder: KdTree::with_leaf_size(10),
            handler,
            overlap_handler,
            allowed_overlap,
        }
    }

    /// Closest admissible event of body i against its rank-lower
    /// neighbours within the window.
    fn scan_body(
        &self,
        i: usize,
        r: &[Vector],
        v: &[Vector],
        versions: &[u32],
        removed: &BTreeSet<usize>,
        search_radius: f64,
        window: (f64, f64),
        neighbours: &mut Vec<NeighbourRecord>,
    ) -> Option<CollisionRecord> {
        if removed.contains(&i) {
            return None;
        }
        let dt = window.1;
        let local_radius = r[i].h() + length(v[i]) * dt;
        neighbours.clear();
        self.finder
            .find_lower_rank(i, local_radius + search_radius, neighbours);
        let mut best: Option<CollisionRecord> = None;
        for record in neighbours.iter() {
            let j = record.index;
            if j == i || removed.contains(&j) {
                continue;
            }
            let candidate = match check_contact(r[i], v[i], r[j], v[j], window) {
                Contact::None => continue,
                Contact::At(t) => CollisionRecord {
                    t_coll: t,
                    overlap: 0.0,
                    i,
                    j,
                    version_i: versions[i],
                    version_j: versions[j],
                },
                Contact::Overlap(depth) => {
                    let separation = r[i].h() + r[j].h();
                    // squared-fraction convention for the noise cutoff
                    if depth * depth
                        <= self.allowed_overlap * self.allowed_overlap * separation * separation
                    {
                        continue;
                    }
                    CollisionRecord {
                        t_coll: window.0.max(0.0),
                        overlap: depth,
                        i,
                        j,
                        version_i: versions[i],
                        version_j: versions[j],
                    }
                }
            };
            best = Some(match best {
                Some(current) if current <= candidate => current,
                _ => candidate,
            });
        }
        best
    }

    /// Process all collisions within the timestep and advance the
    /// positions by it.
    pub fn resolve(
        &mut self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        dt: f64,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        let mut r: Vec<Vector> = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        let mut v: Vec<Vector> = storage.dt::<Vector>(QuantityId::Position)?.to_vec();
        let mut m: Vec<f64> = storage.value::<f64>(QuantityId::Mass)?.to_vec();
        let mut omega: Option<Vec<Vector>> = if storage.has(QuantityId::AngularVelocity) {
            Some(storage.value::<Vector>(QuantityId::AngularVelocity)?.to_vec())
        } else {
            None
        };
        let count = r.len();
        if count == 0 {
            return Ok(());
        }

        // rank orders bodies by reach, making the sweep see each pair
        // exactly once
        let reach = |i: usize| r[i].h() + length(v[i]) * dt;
        let search_radius = (0..count).map(&reach).fold(0.0_f64, f64::max);
        let rank = rank_from_key(count, &reach);
        self.finder.build(scheduler, &r);
        self.finder.set_rank(Some(rank));

        let mut versions = vec![0u32; count];
        let removed: BTreeSet<usize> = BTreeSet::new();

        // parallel initial sweep
        let locals: ThreadLocal<Vec<CollisionRecord>> = ThreadLocal::new(scheduler, Vec::new);
        {
            let r_ref = &r;
            let v_ref = &v;
            let versions_ref = &versions;
            let removed_ref = &removed;
            let resolver = &*self;
            scheduler.parallel_for(0, count, 256, &|range| {
                let mut neighbours = Vec::new();
                let mut found = Vec::new();
                for i in range {
                    if let Some(record) = resolver.scan_body(
                        i,
                        r_ref,
                        v_ref,
                        versions_ref,
                        removed_ref,
                        search_radius,
                        (0.0, dt),
                        &mut neighbours,
                    ) {
                        found.push(record);
                    }
                }
                locals.with(scheduler, |local| local.extend(found.drain(..)));
            });
        }
        let mut queue: BTreeSet<CollisionRecord> = BTreeSet::new();
        for batch in locals.into_values() {
            queue.extend(batch);
        }

        let mut removed = removed;
        let mut to_remove: Vec<usize> = Vec::new();
        let mut neighbours: Vec<NeighbourRecord> = Vec::new();
        const RESCAN_EPS: f64 = 1.0e-12;

        while let Some(record) = queue.pop_first() {
            let CollisionRecord {
                t_coll,
                overlap,
                i,
                j,
                version_i,
                version_j,
            } = record;
            if removed.contains(&i)
                || removed.contains(&j)
                || versions[i] != version_i
                || versions[j] != version_j
            {
                continue; // invalidated by an earlier event
            }
            // recheck against the current state; a pair deflected by an
            // earlier collision may no longer meet
            if overlap == 0.0 {
                match check_contact(r[i], v[i], r[j], v[j], (t_coll - RESCAN_EPS, dt)) {
                    Contact::At(_) | Contact::Overlap(_) => {}
                    Contact::None => {
                        stats.warning_count += 1;
                        continue;
                    }
                }
            }

            // advance the pair to the contact configuration
            let h_i = r[i].h();
            let h_j = r[j].h();
            r[i] = (r[i] + v[i] * t_coll).of_h(h_i);
            r[j] = (r[j] + v[j] * t_coll).of_h(h_j);

            to_remove.clear();
            let result = {
                let mut context = CollisionContext {
                    r: &mut r,
                    v: &mut v,
                    m: &mut m,
                    omega: omega.as_mut().map(|buffer| buffer.as_mut_slice()),
                };
                if overlap > 0.0 {
                    self.overlap_handler.collide(&mut context, i, j, &mut to_remove)
                } else {
                    self.handler.collide(&mut context, i, j, &mut to_remove)
                }
            };

            // rewind with the updated velocities; together with the
            // final full-step advance this yields the kinked trajectory
            for &k in &[i, j] {
                if to_remove.contains(&k) {
                    continue;
                }
                let h = r[k].h();
                r[k] = (r[k] - v[k] * t_coll).of_h(h);
            }

            match result {
                CollisionResult::None => {
                    if overlap > 0.0 {
                        stats.overlap_count += 1;
                        versions[i] = versions[i].wrapping_add(1);
                        versions[j] = versions[j].wrapping_add(1);
                    }
                }
                CollisionResult::Bounce => {
                    stats.bounce_count += 1;
                    stats.collision_count += 1;
                    versions[i] = versions[i].wrapping_add(1);
                    versions[j] = versions[j].wrapping_add(1);
                }
                CollisionResult::Merger => {
                    stats.merger_count += 1;
                    stats.collision_count += 1;
                    versions[i] = versions[i].wrapping_add(1);
                    versions[j] = versions[j].wrapping_add(1);
                    for &k in &to_remove {
                        removed.insert(k);
                    }
                }
            }

            // re-scan the surviving participants in the remaining window
            for &k in &[i, j] {
                if removed.contains(&k) {
                    continue;
                }
                if let Some(next) = self.scan_body(
                    k,
                    &r,
                    &v,
                    &versions,
                    &removed,
                    search_radius,
                    (t_coll + RESCAN_EPS, dt),
                    &mut neighbours,
                ) {
                    queue.insert(next);
                }
            }
        }

        // advance everything by the full timestep
        for k in 0..count {
            let h = r[k].h();
            r[k] = (r[k] + v[k] * dt).of_h(h);
        }

        // write the working state back and apply the removal set
        storage
            .value_mut::<Vector>(QuantityId::Position)?
            .clone_from_slice(&r);
        storage
            .dt_mut::<Vector>(QuantityId::Position)?
            .clone_from_slice(&v);
        storage
            .value_mut::<f64>(QuantityId::Mass)?
            .clone_from_slice(&m);
        if let Some(omega) = &omega {
            storage
                .value_mut::<Vector>(QuantityId::AngularVelocity)?
                .clone_from_slice(omega);
        }
        if !removed.is_empty() {
            let rows: Vec<usize> = removed.into_iter().collect();
            storage.remove(&rows, RemoveFlags::sorted_propagate());
        }
        Ok(())
    }
}
