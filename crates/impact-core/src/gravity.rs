// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Self-Gravity
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Barnes-Hut self-gravity with traceless multipoles up to
//! hexadecapole, plus a brute-force reference evaluator.
//!
//! The tree is a k-d arena over particle positions; each node carries
//! its centre of mass and a traceless multipole expansion assembled
//! bottom-up through the parallel-axis shift. Evaluation opens nodes
//! whose angular size extent/distance exceeds the opening angle and
//! falls back to direct summation in leaves. Attractors contribute to
//! the tree as order-0 bodies and receive their own accelerations by
//! pairwise summation.

use crate::scheduler::{Scheduler, ThreadLocal};
use crate::storage::{QuantityId, Storage};
use impact_math::multipole::MultipoleExpansion;
use impact_math::vector::{
    max_element_wise, min_element_wise, sqr_length, Vector, X, Y, Z,
};
use impact_types::error::{ImpactError, ImpactResult};

pub trait Gravity: Send + Sync {
    /// Rebuild internal structures; positions and masses are read from
    /// the storage.
    fn build(&mut self, scheduler: &dyn Scheduler, storage: &Storage) -> ImpactResult<()>;

    /// Add gravitational accelerations to the position second
    /// derivative and to the attractors.
    fn eval_all(&self, scheduler: &dyn Scheduler, storage: &mut Storage) -> ImpactResult<()>;
}

/// Geometric displacement a - b with a clean smoothing-length lane.
fn displacement(a: Vector, b: Vector) -> Vector {
    Vector::new(a[X] - b[X], a[Y] - b[Y], a[Z] - b[Z])
}

fn gather_bodies(storage: &Storage) -> ImpactResult<(Vec<Vector>, Vec<f64>, usize)> {
    let positions = storage.value::<Vector>(QuantityId::Position)?;
    let masses = storage.value::<f64>(QuantityId::Mass)?;
    let particle_count = positions.len();
    let mut r: Vec<Vector> = positions.to_vec();
    let mut m: Vec<f64> = masses.to_vec();
    for attractor in storage.attractors() {
        r.push(attractor.position);
        m.push(attractor.mass);
    }
    Ok((r, m, particle_count))
}

fn apply_accelerations(
    storage: &mut Storage,
    contributions: Vec<Vec<(usize, Vector)>>,
) -> ImpactResult<()> {
    let particle_count = storage.particle_count();
    {
        let acceleration = storage.d2t_mut::<Vector>(QuantityId::Position)?;
        for batch in &contributions {
            for &(index, value) in batch {
                if index < particle_count {
                    acceleration[index] += value;
                }
            }
        }
    }
    let attractors = storage.attractors_mut();
    for batch in contributions {
        for (index, value) in batch {
            if index >= particle_count {
                attractors[index - particle_count].acceleration += value;
            }
        }
    }
    Ok(())
}

/// Direct O(N^2) summation; the reference implementation and the
/// fallback for small bodies.
pub struct BruteForceGravity {
    constant: f64,
    positions: Vec<Vector>,
    masses: Vec<f64>,
    particle_count: usize,
}

impl BruteForceGravity {
    pub fn new(constant: f64) -> Self {
        BruteForceGravity {
            constant,
            positions: Vec::new(),
            masses: Vec::new(),
            particle_count: 0,
        }
    }
}

impl Gravity for BruteForceGravity {
    fn build(&mut self, _scheduler: &dyn Scheduler, storage: &Storage) -> ImpactResult<()> {
        let (positions, masses, particle_count) = gather_bodies(storage)?;
        self.positions = positions;
        self.masses = masses;
        self.particle_count = particle_count;
        Ok(())
    }

    fn eval_all(&self, scheduler: &dyn Scheduler, storage: &mut Storage) -> ImpactResult<()> {
        let total = self.positions.len();
        let locals: ThreadLocal<Vec<(usize, Vector)>> =
            ThreadLocal::new(scheduler, Vec::new);
        scheduler.parallel_for(0, total, 64, &|range| {
            let mut batch = Vec::with_capacity(range.len());
            for i in range {
                let mut acceleration = Vector::zero();
                for j in 0..total {
                    if i == j {
                        continue;
                    }
                    let dr = displacement(self.positions[j], self.positions[i]);
                    let dist_sqr = sqr_length(dr);
                    if dist_sqr == 0.0 {
                        continue;
                    }
                    acceleration += dr * (self.masses[j] / (dist_sqr * dist_sqr.sqrt()));
                }
                batch.push((i, acceleration * self.constant));
            }
            locals.with(scheduler, |local| local.extend(batch.drain(..)));
        });
        apply_accelerations(storage, locals.into_values())
    }
}

struct BhNode {
    /// Maximal extent of the node bounding box.
    extent: f64,
    com: Vector,
    mass: f64,
    expansion: MultipoleExpansion,
    leaf: bool,
    begin: usize,
    end: usize,
    /// Inner: right child at node + right_offset, left at node + 1.
    right_offset: usize,
}

/// Barnes-Hut tree gravity with multipole order 0, 2, 3 or 4.
pub struct BarnesHut {
    constant: f64,
    opening_angle: f64,
    leaf_size: usize,
    order: usize,
    nodes: Vec<BhNode>,
    ordered: Vec<usize>,
    positions: Vec<Vector>,
    masses: Vec<f64>,
    particle_count: usize,
}

impl BarnesHut {
    pub fn new(constant: f64, opening_angle: f64, leaf_size: usize, order: usize) -> ImpactResult<Self> {
        if !matches!(order, 0 | 2 | 3 | 4) {
            return Err(ImpactError::invalid_setup(format!(
                "multipole order must be 0, 2, 3 or 4, got {order}"
            )));
        }
        if opening_angle <= 0.0 {
            return Err(ImpactError::invalid_setup(
                "opening angle must be positive".to_string(),
            ));
        }
        Ok(BarnesHut {
            constant,
            opening_angle,
            leaf_size: leaf_size.max(1),
            order,
            nodes: Vec::new(),
            ordered: Vec::new(),
            positions: Vec::new(),
            masses: Vec::new(),
            particle_count: 0,
        })
    }

    /// Preorder build computing moments bottom-up; returns the subtree
    /// size.
    fn build_node(&mut self, idxs: &mut [usize], begin: usize) -> usize {
        let mut lower = Vector::splat(f64::INFINITY);
        let mut upper = Vector::splat(f64::NEG_INFINITY);
        let mut mass = 0.0;
        let mut com = Vector::zero();
        for &i in idxs.iter() {
            lower = min_element_wise(lower, self.positions[i]);
            upper = max_element_wise(upper, self.positions[i]);
            mass += self.masses[i];
            com += Vector::new(
                self.positions[i][X],
                self.positions[i][Y],
                self.positions[i][Z],
            ) * self.masses[i];
        }
        if mass > 0.0 {
            com = com / mass;
        }
        let extent_vec = upper - lower;
        let extent = extent_vec[X].max(extent_vec[Y]).max(extent_vec[Z]);

        let node_index = self.nodes.len();
        self.nodes.push(BhNode {
            extent,
            com,
            mass,
            expansion: MultipoleExpansion::zero(),
            leaf: true,
            begin,
            end: begin + idxs.len(),
            right_offset: 0,
        });

        if idxs.len() <= self.leaf_size || extent == 0.0 {
            let points: Vec<Vector> = idxs.iter().map(|&i| self.positions[i]).collect();
            let masses: Vec<f64> = idxs.iter().map(|&i| self.masses[i]).collect();
            self.nodes[node_index].expansion =
                MultipoleExpansion::from_points(&points, &masses, com, self.order);
            return 1;
        }

        let axis = [X, Y, Z]
            .into_iter()
            .max_by(|&a, &b| extent_vec[a].total_cmp(&extent_vec[b]))
            .unwrap();
        let mid = idxs.len() / 2;
        let positions = &self.positions;
        idxs.select_nth_unstable_by(mid, |&a, &b| {
            positions[a][axis].total_cmp(&positions[b][axis])
        });
        let (left_idxs, right_idxs) = idxs.split_at_mut(mid);

        let left_size = self.build_node(left_idxs, begin);
        let left_index = node_index + 1;
        let right_index = node_index + 1 + left_size;
        let right_size = self.build_node(right_idxs, begin + mid);

        // shift child moments to the parent centre of mass and sum
        let mut expansion = MultipoleExpansion::zero();
        for &child in &[left_index, right_index] {
            let child_com = self.nodes[child].com;
            let shifted = self.nodes[child]
                .expansion
                .shifted(com - child_com, self.order);
            expansion.add_assign(&shifted);
        }
        let node = &mut self.nodes[node_index];
        node.leaf = false;
        node.right_offset = 1 + left_size;
        node.expansion = expansion;
        1 + left_size + right_size
    }

    fn eval_point(&self, i: usize) -> Vector {
        let position = self.positions[i];
        let mut acceleration = Vector::zero();
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            if node.mass == 0.0 {
                continue;
            }
            let dr = displacement(node.com, position);
            let dist_sqr = sqr_length(dr);
            if !node.leaf && node.extent * node.extent < self.opening_angle * self.opening_angle * dist_sqr
            {
                acceleration += node.expansion.evaluate_acceleration(dr, self.order);
                continue;
            }
            if node.leaf {
                for &j in &self.ordered[node.begin..node.end] {
                    if j == i {
                        continue;
                    }
                    let delta = displacement(self.positions[j], position);
                    let delta_sqr = sqr_length(delta);
                    if delta_sqr == 0.0 {
                        continue;
                    }
                    acceleration += delta * (self.masses[j] / (delta_sqr * delta_sqr.sqrt()));
                }
            } else {
                stack.push(node_index + 1);
                stack.push(node_index + node.right_offset);
            }
        }
        acceleration * self.constant
    }
}

impl Gravity for BarnesHut {
    fn build(&mut self, _scheduler: &dyn Scheduler, storage: &Storage) -> ImpactResult<()> {
        let (positions, masses, particle_count) = gather_bodies(storage)?;
        self.positions = positions;
        self.masses = masses;
        self.particle_count = particle_count;
        self.nodes.clear();
        let total = self.positions.len();
        self.ordered = (0..total).collect();
        if total == 0 {
            return Ok(());
        }
        let mut ordered = std::mem::take(&mut self.ordered);
        self.build_node(&mut ordered, 0);
        self.ordered = ordered;
        Ok(())
    }

    fn eval_all(&self, scheduler: &dyn Scheduler, storage: &mut Storage) -> ImpactResult<()> {
        if self.nodes.is_empty() {
            return Ok(());
        }
        let locals: ThreadLocal<Vec<(usize, Vector)>> =
            ThreadLocal::new(scheduler, Vec::new);
        // tree evaluation for SPH particles
        scheduler.parallel_for(0, self.particle_count, 64, &|range| {
            let mut batch = Vec::with_capacity(range.len());
            for i in range {
                batch.push((i, self.eval_point(i)));
            }
            locals.with(scheduler, |local| local.extend(batch.drain(..)));
        });
        let mut contributions = locals.into_values();

        // attractors interact pairwise with everything
        let total = self.positions.len();
        let mut attractor_batch = Vec::new();
        for i in self.particle_count..total {
            let mut acceleration = Vector::zero();
            for j in 0..total {
                if i == j {
                    continue;
                }
                let dr = displacement(self.positions[j], self.positions[i]);
                let dist_sqr = sqr_length(dr);
                if dist_sqr == 0.0 {
                    continue;
                }
                acceleration += dr * (self.masses[j] / (dist_sqr * dist_sqr.sqrt()));
            }
            attractor_batch.push((i, acceleration * self.constant));
        }
        contributions.push(attractor_batch);
        apply_accelerations(storage, contributions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SequentialScheduler;
    use crate::storage::{Attractor, OrderEnum};
    use impact_math::vector::length;

    fn cloud_storage(n: usize) -> Storage {
        let mut storage = Storage::new();
        let positions: Vec<Vector> = (0..n)
            .map(|i| {
                let t = i as f64 + 1.0;
                Vector::with_h(
                    (t * 0.37).sin() * 2.0,
                    (t * 0.71).cos() * 2.0,
                    (t * 1.13).sin() * 2.0,
                    0.01,
                )
            })
            .collect();
        let masses: Vec<f64> = (0..n).map(|i| 1.0 + 0.3 * (i % 5) as f64).collect();
        storage
            .insert(QuantityId::Position, OrderEnum::Second, positions)
            .unwrap();
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, masses)
            .unwrap();
        storage
    }

    fn accelerations(gravity: &mut dyn Gravity, storage: &mut Storage) -> Vec<Vector> {
        let scheduler = SequentialScheduler;
        storage.init();
        gravity.build(&scheduler, storage).unwrap();
        gravity.eval_all(&scheduler, storage).unwrap();
        storage.d2t::<Vector>(QuantityId::Position).unwrap().to_vec()
    }

    #[test]
    fn test_barnes_hut_matches_brute_force() {
        let mut storage = cloud_storage(200);
        let brute = accelerations(&mut BruteForceGravity::new(1.0), &mut storage);
        let scale = brute.iter().map(|a| length(*a)).fold(0.0_f64, f64::max);
        for order in [0usize, 2, 3, 4] {
            let mut storage = cloud_storage(200);
            let mut tree = BarnesHut::new(1.0, 0.4, 10, order).unwrap();
            let approx = accelerations(&mut tree, &mut storage);
            let mut worst = 0.0_f64;
            for (a, b) in brute.iter().zip(&approx) {
                worst = worst.max(length(*a - *b) / scale);
            }
            // error normalized by the largest acceleration; higher
            // orders must stay accurate at this opening angle
            let tolerance = match order {
                0 => 0.05,
                2 => 0.01,
                _ => 0.005,
            };
            assert!(
                worst < tolerance,
                "order {} relative error {}",
                order,
                worst
            );
        }
    }

    #[test]
    fn test_two_body_attraction() {
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                vec![
                    Vector::with_h(-1.0, 0.0, 0.0, 0.01),
                    Vector::with_h(1.0, 0.0, 0.0, 0.01),
                ],
            )
            .unwrap();
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, vec![2.0, 3.0])
            .unwrap();
        let acceleration = accelerations(&mut BruteForceGravity::new(1.0), &mut storage);
        // mutual attraction: a_0 = +G m_1 / 4, a_1 = -G m_0 / 4
        assert!((acceleration[0][X] - 3.0 / 4.0).abs() < 1e-12);
        assert!((acceleration[1][X] + 2.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_conservation() {
        let mut storage = cloud_storage(50);
        let masses: Vec<f64> = storage.value::<f64>(QuantityId::Mass).unwrap().to_vec();
        let acceleration = accelerations(&mut BruteForceGravity::new(1.0), &mut storage);
        let mut total = Vector::zero();
        for (a, m) in acceleration.iter().zip(&masses) {
            total += *a * *m;
        }
        assert!(length(total) < 1e-10);
    }

    #[test]
    fn test_attractor_pulls_particles() {
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.0, 0.0, 0.0, 0.01)],
            )
            .unwrap();
        storage
            .insert(QuantityId::Mass, OrderEnum::Zero, vec![1.0e-6])
            .unwrap();
        storage.add_attractor(Attractor::new(
            Vector::new(10.0, 0.0, 0.0),
            Vector::zero(),
            1.0,
            100.0,
        ));
        let mut tree = BarnesHut::new(1.0, 0.5, 5, 3).unwrap();
        let acceleration = accelerations(&mut tree, &mut storage);
        assert!((acceleration[0][X] - 1.0).abs() < 1e-9);
        // the attractor feels the particle in turn
        let reaction = storage.attractors()[0].acceleration;
        assert!(reaction[X] < 0.0);
    }

    #[test]
    fn test_invalid_order_rejected() {
        assert!(matches!(
            BarnesHut::new(1.0, 0.5, 5, 1),
            Err(ImpactError::InvalidSetup(_))
        ));
    }
}
