// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Boundary Conditions
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Computational domains and boundary handlers.
//!
//! Handlers expose `initialize` (before the derivative loop, may add
//! ghosts) and `finalize` (after the reduction, may remove particles or
//! clamp positions). Ghosts are tracked as storage user data so that
//! unrelated removals keep the ghost list consistent, and are cleared
//! at the top of every initialize, making repeated initialization
//! idempotent.

use crate::storage::{QuantityId, RemoveFlags, Storage, StorageUserData};
use impact_math::vector::{dot, Vector, X, Y, Z};
use impact_types::error::{ImpactError, ImpactResult};

// ── domains ──────────────────────────────────────────────────────────

pub trait Domain: Send + Sync {
    fn center(&self) -> Vector;

    fn contains(&self, position: Vector) -> bool;

    /// Signed distance to the boundary, positive inside.
    fn distance_to_boundary(&self, position: Vector) -> f64;

    /// Outward unit normal of the nearest boundary point.
    fn normal(&self, position: Vector) -> Vector;

    /// Reflection of a point across the nearest boundary.
    fn mirror(&self, position: Vector) -> Vector {
        let distance = self.distance_to_boundary(position);
        let normal = self.normal(position);
        let mut mirrored = position + normal * (2.0 * distance);
        mirrored.set_h(position.h());
        mirrored
    }

    /// Projection onto the boundary surface.
    fn project(&self, position: Vector) -> Vector {
        let distance = self.distance_to_boundary(position);
        let normal = self.normal(position);
        let mut projected = position + normal * distance;
        projected.set_h(position.h());
        projected
    }

    fn volume(&self) -> ImpactResult<f64>;
}

pub struct SphericalDomain {
    center: Vector,
    radius: f64,
}

impl SphericalDomain {
    pub fn new(center: Vector, radius: f64) -> Self {
        debug_assert!(radius > 0.0);
        SphericalDomain { center, radius }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Domain for SphericalDomain {
    fn center(&self) -> Vector {
        self.center
    }

    fn contains(&self, position: Vector) -> bool {
        impact_math::vector::sqr_length(position - self.center) <= self.radius * self.radius
    }

    fn distance_to_boundary(&self, position: Vector) -> f64 {
        self.radius - impact_math::vector::length(position - self.center)
    }

    fn normal(&self, position: Vector) -> Vector {
        let offset = position - self.center;
        let length = impact_math::vector::length(offset);
        if length == 0.0 {
            Vector::unit(Z)
        } else {
            Vector::new(offset[X] / length, offset[Y] / length, offset[Z] / length)
        }
    }

    fn volume(&self) -> ImpactResult<f64> {
        Ok(4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3))
    }
}

pub struct BlockDomain {
    center: Vector,
    half: Vector,
}

impl BlockDomain {
    pub fn new(center: Vector, dimensions: Vector) -> Self {
        BlockDomain {
            center,
            half: dimensions * 0.5,
        }
    }

    pub fn lower(&self) -> Vector {
        self.center - self.half
    }

    pub fn upper(&self) -> Vector {
        self.center + self.half
    }

    pub fn dimensions(&self) -> Vector {
        self.half * 2.0
    }
}

impl Domain for BlockDomain {
    fn center(&self) -> Vector {
        self.center
    }

    fn contains(&self, position: Vector) -> bool {
        let offset = position - self.center;
        (0..3).all(|axis| offset[axis].abs() <= self.half[axis])
    }

    fn distance_to_boundary(&self, position: Vector) -> f64 {
        let offset = position - self.center;
        (0..3)
            .map(|axis| self.half[axis] - offset[axis].abs())
            .fold(f64::INFINITY, f64::min)
    }

    fn normal(&self, position: Vector) -> Vector {
        // the face with the smallest clearance
        let offset = position - self.center;
        let mut best_axis = X;
        let mut best_clearance = f64::INFINITY;
        for axis in [X, Y, Z] {
            let clearance = self.half[axis] - offset[axis].abs();
            if clearance < best_clearance {
                best_clearance = clearance;
                best_axis = axis;
            }
        }
        let mut normal = Vector::zero();
        normal[best_axis] = offset[best_axis].signum();
        normal
    }

    fn volume(&self) -> ImpactResult<f64> {
        Ok(8.0 * self.half[X] * self.half[Y] * self.half[Z])
    }
}

/// Half-space z >= z0; an unbounded domain, used for frozen layers and
/// symmetric planes.
pub struct HalfSpaceDomain {
    z0: f64,
}

impl HalfSpaceDomain {
    pub fn new(z0: f64) -> Self {
        HalfSpaceDomain { z0 }
    }
}

impl Domain for HalfSpaceDomain {
    fn center(&self) -> Vector {
        Vector::new(0.0, 0.0, self.z0)
    }

    fn contains(&self, position: Vector) -> bool {
        position[Z] >= self.z0
    }

    fn distance_to_boundary(&self, position: Vector) -> f64 {
        position[Z] - self.z0
    }

    fn normal(&self, _position: Vector) -> Vector {
        Vector::new(0.0, 0.0, 1.0)
    }

    fn volume(&self) -> ImpactResult<f64> {
        Err(ImpactError::invalid_setup(
            "the volume of a half-space domain is undefined".to_string(),
        ))
    }
}

// ── handler contract ─────────────────────────────────────────────────

pub trait BoundaryCondition: Send {
    /// Called before the derivative loop; may add ghosts.
    fn initialize(&mut self, storage: &mut Storage) -> ImpactResult<()>;

    /// Called after the reduction; may remove ghosts, clamp positions
    /// or zero derivatives.
    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()>;
}

/// No-op handler for unbounded runs.
#[derive(Default)]
pub struct NullBoundary;

impl BoundaryCondition for NullBoundary {
    fn initialize(&mut self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&mut self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }
}

// ── ghost particles ──────────────────────────────────────────────────

/// Ghost bookkeeping kept as storage user data; unrelated removals
/// shift the recorded rows.
#[derive(Default)]
pub struct GhostList {
    rows: Vec<usize>,
}

impl GhostList {
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }
}

impl StorageUserData for GhostList {
    fn remove(&mut self, sorted_idxs: &[usize]) {
        self.rows.retain(|row| !sorted_idxs.contains(row));
        for row in &mut self.rows {
            *row -= sorted_idxs.partition_point(|&removed| removed < *row);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

type GhostVelocityOverride = Box<dyn Fn(Vector, Vector) -> Vector + Send>;

/// Mirror-image ghosts enforcing a free-slip (or overridden) condition
/// on a domain boundary.
pub struct GhostParticles {
    domain: Box<dyn Domain>,
    /// Search distance in units of h.
    search_radius: f64,
    /// Optional (position, mirrored velocity) -> ghost velocity.
    velocity_override: Option<GhostVelocityOverride>,
}

impl GhostParticles {
    pub fn new(domain: Box<dyn Domain>, search_radius: f64) -> Self {
        GhostParticles {
            domain,
            search_radius,
            velocity_override: None,
        }
    }

    pub fn with_velocity_override(mut self, override_fn: GhostVelocityOverride) -> Self {
        self.velocity_override = Some(override_fn);
        self
    }

    fn clear_ghosts(storage: &mut Storage) {
        let rows: Vec<usize> = storage
            .user_data_mut::<GhostList>()
            .map(|list| {
                let mut rows = list.rows.clone();
                rows.sort_unstable();
                rows
            })
            .unwrap_or_default();
        if !rows.is_empty() {
            storage.remove(&rows, RemoveFlags::sorted());
        }
        if let Some(list) = storage.user_data_mut::<GhostList>() {
            list.rows.clear();
        } else {
            storage.set_user_data(Box::new(GhostList::default()));
        }
    }
}

impl BoundaryCondition for GhostParticles {
    fn initialize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        // ghosts from the previous step must not survive, otherwise a
        // repeated initialize would double them
        Self::clear_ghosts(storage);

        let candidates: Vec<(usize, Vector, Vector)> = {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            let velocities = storage.dt::<Vector>(QuantityId::Position)?;
            positions
                .iter()
                .enumerate()
                .filter(|(_, r)| {
                    let distance = self.domain.distance_to_boundary(**r);
                    distance >= 0.0 && distance < self.search_radius * r.h()
                })
                .map(|(i, r)| (i, *r, velocities[i]))
                .collect()
        };
        if candidates.is_empty() {
            return Ok(());
        }

        let sources: Vec<usize> = candidates.iter().map(|(i, _, _)| *i).collect();
        let ghost_rows = storage.duplicate(&sources);
        {
            let (positions, velocities, _) =
                storage.all_buffers_mut::<Vector>(QuantityId::Position)?;
            for (ghost_row, (_, source_position, source_velocity)) in
                ghost_rows.iter().zip(&candidates)
            {
                let mirrored = self.domain.mirror(*source_position);
                let normal = self.domain.normal(*source_position);
                let mut velocity =
                    *source_velocity - normal * (2.0 * dot(*source_velocity, normal));
                velocity.set_h(source_velocity.h());
                if let Some(override_fn) = &self.velocity_override {
                    velocity = override_fn(mirrored, velocity);
                }
                positions[*ghost_row] = mirrored;
                velocities[*ghost_row] = velocity;
            }
        }
        if let Some(list) = storage.user_data_mut::<GhostList>() {
            list.rows.extend(&ghost_rows);
        }
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        Self::clear_ghosts(storage);
        Ok(())
    }
}

// ── fixed particles ──────────────────────────────────────────────────

/// A prepared layer of boundary particles with its own material,
/// appended before every step and removed afterwards.
pub struct FixedParticles {
    template: Storage,
    added: std::ops::Range<usize>,
}

impl FixedParticles {
    pub fn new(template: Storage) -> Self {
        FixedParticles {
            template,
            added: 0..0,
        }
    }
}

impl BoundaryCondition for FixedParticles {
    fn initialize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        let begin = storage.particle_count();
        let mut layer = Storage::new();
        std::mem::swap(&mut layer, &mut self.template);
        self.template = clone_layout(&layer);
        storage.merge(layer)?;
        self.added = begin..storage.particle_count();
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        if !self.added.is_empty() {
            let rows: Vec<usize> = self.added.clone().collect();
            storage.remove(&rows, RemoveFlags::sorted());
            self.added = 0..0;
        }
        Ok(())
    }
}

/// Fresh copy of a storage for the next step's layer.
fn clone_layout(storage: &Storage) -> Storage {
    struct Cloner {
        out: Storage,
    }
    impl crate::storage::StorageVisitor for Cloner {
        fn visit_scalar(
            &mut self,
            id: QuantityId,
            order: crate::storage::OrderEnum,
            buffers: &crate::storage::QuantityBuffers<f64>,
        ) {
            let _ = self.out.insert(id, order, buffers.values.clone());
        }
        fn visit_vector(
            &mut self,
            id: QuantityId,
            order: crate::storage::OrderEnum,
            buffers: &crate::storage::QuantityBuffers<Vector>,
        ) {
            let _ = self.out.insert(id, order, buffers.values.clone());
        }
        fn visit_symmetric_tensor(
            &mut self,
            id: QuantityId,
            order: crate::storage::OrderEnum,
            buffers: &crate::storage::QuantityBuffers<impact_math::SymmetricTensor>,
        ) {
            let _ = self.out.insert(id, order, buffers.values.clone());
        }
        fn visit_traceless_tensor(
            &mut self,
            id: QuantityId,
            order: crate::storage::OrderEnum,
            buffers: &crate::storage::QuantityBuffers<impact_math::TracelessTensor>,
        ) {
            let _ = self.out.insert(id, order, buffers.values.clone());
        }
        fn visit_index(
            &mut self,
            id: QuantityId,
            order: crate::storage::OrderEnum,
            buffers: &crate::storage::QuantityBuffers<u64>,
        ) {
            let _ = self.out.insert(id, order, buffers.values.clone());
        }
    }
    let mut cloner = Cloner {
        out: Storage::new(),
    };
    storage.visit(&mut cloner);
    cloner.out
}

// ── frozen particles ─────────────────────────────────────────────────

/// Particles near the boundary or with listed flags have all highest
/// derivatives zeroed each step.
pub struct FrozenParticles {
    domain: Option<Box<dyn Domain>>,
    /// Freezing distance in units of h.
    radius: f64,
    frozen_flags: Vec<u64>,
}

impl FrozenParticles {
    pub fn new(domain: Option<Box<dyn Domain>>, radius: f64, frozen_flags: Vec<u64>) -> Self {
        FrozenParticles {
            domain,
            radius,
            frozen_flags,
        }
    }
}

impl BoundaryCondition for FrozenParticles {
    fn initialize(&mut self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        let rows: Vec<usize> = {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            let flags: Option<&[u64]> = if storage.has(QuantityId::Flag) {
                Some(storage.value::<u64>(QuantityId::Flag)?)
            } else {
                None
            };
            (0..positions.len())
                .filter(|&i| {
                    let near_boundary = self.domain.as_ref().map_or(false, |domain| {
                        domain.distance_to_boundary(positions[i]) < self.radius * positions[i].h()
                    });
                    let flagged = flags
                        .map(|flags| self.frozen_flags.contains(&flags[i]))
                        .unwrap_or(false);
                    near_boundary || flagged
                })
                .collect()
        };
        storage.clear_highest_derivative_rows(&rows);
        Ok(())
    }
}

// ── periodic boundary ────────────────────────────────────────────────

/// Wrap-around box: escaped particles re-enter on the opposite side,
/// particles near a face spawn ghosts on the opposite face.
pub struct PeriodicBoundary {
    domain: BlockDomain,
    /// Ghost distance in units of h.
    search_radius: f64,
}

impl PeriodicBoundary {
    pub fn new(domain: BlockDomain, search_radius: f64) -> Self {
        PeriodicBoundary {
            domain,
            search_radius,
        }
    }
}

impl BoundaryCondition for PeriodicBoundary {
    fn initialize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        GhostParticles::clear_ghosts(storage);

        let lower = self.domain.lower();
        let dimensions = self.domain.dimensions();
        // offsets of image boxes a particle is close to, including the
        // diagonal images
        let mut sources: Vec<usize> = Vec::new();
        let mut shifts: Vec<Vector> = Vec::new();
        {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            for (i, r) in positions.iter().enumerate() {
                let range = self.search_radius * r.h();
                let mut near_low = [false; 3];
                let mut near_high = [false; 3];
                for axis in 0..3 {
                    near_low[axis] = r[axis] - lower[axis] < range;
                    near_high[axis] = lower[axis] + dimensions[axis] - r[axis] < range;
                }
                for dx in -1i32..=1 {
                    for dy in -1i32..=1 {
                        for dz in -1i32..=1 {
                            if dx == 0 && dy == 0 && dz == 0 {
                                continue;
                            }
                            let offsets = [dx, dy, dz];
                            let viable = (0..3).all(|axis| match offsets[axis] {
                                1 => near_low[axis],
                                -1 => near_high[axis],
                                _ => true,
                            });
                            if viable {
                                sources.push(i);
                                shifts.push(Vector::new(
                                    dx as f64 * dimensions[X],
                                    dy as f64 * dimensions[Y],
                                    dz as f64 * dimensions[Z],
                                ));
                            }
                        }
                    }
                }
            }
        }
        if sources.is_empty() {
            return Ok(());
        }
        let ghost_rows = storage.duplicate(&sources);
        {
            let positions = storage.value_mut::<Vector>(QuantityId::Position)?;
            for (row, shift) in ghost_rows.iter().zip(&shifts) {
                let h = positions[*row].h();
                positions[*row] = (positions[*row] + *shift).of_h(h);
            }
        }
        if let Some(list) = storage.user_data_mut::<GhostList>() {
            list.rows.extend(&ghost_rows);
        }
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        GhostParticles::clear_ghosts(storage);
        let lower = self.domain.lower();
        let dimensions = self.domain.dimensions();
        let positions = storage.value_mut::<Vector>(QuantityId::Position)?;
        for position in positions.iter_mut() {
            for axis in 0..3 {
                let relative = position[axis] - lower[axis];
                position[axis] = lower[axis] + relative.rem_euclid(dimensions[axis]);
            }
        }
        Ok(())
    }
}

// ── symmetric plane ──────────────────────────────────────────────────

/// Symmetry across z = 0: particles below are projected slightly above
/// the plane, particles near it get a mirrored ghost.
pub struct SymmetricPlaneBoundary {
    /// Ghost distance in units of h.
    search_radius: f64,
}

impl SymmetricPlaneBoundary {
    pub fn new(search_radius: f64) -> Self {
        SymmetricPlaneBoundary { search_radius }
    }
}

impl BoundaryCondition for SymmetricPlaneBoundary {
    fn initialize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        GhostParticles::clear_ghosts(storage);
        let sources: Vec<usize> = {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            (0..positions.len())
                .filter(|&i| {
                    positions[i][Z] >= 0.0
                        && positions[i][Z] < self.search_radius * positions[i].h()
                })
                .collect()
        };
        if sources.is_empty() {
            return Ok(());
        }
        let ghost_rows = storage.duplicate(&sources);
        {
            let (positions, velocities, _) =
                storage.all_buffers_mut::<Vector>(QuantityId::Position)?;
            for &row in &ghost_rows {
                positions[row][Z] = -positions[row][Z];
                velocities[row][Z] = -velocities[row][Z];
            }
        }
        if let Some(list) = storage.user_data_mut::<GhostList>() {
            list.rows.extend(&ghost_rows);
        }
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        GhostParticles::clear_ghosts(storage);
        let positions = storage.value_mut::<Vector>(QuantityId::Position)?;
        for position in positions.iter_mut() {
            if position[Z] < 0.0 {
                position[Z] = 0.1 * position.h();
            }
        }
        Ok(())
    }
}

// ── kill escapers ────────────────────────────────────────────────────

/// Particles leaving the domain are removed, with propagation into
/// dependent storages.
pub struct KillEscapersBoundary {
    domain: Box<dyn Domain>,
}

impl KillEscapersBoundary {
    pub fn new(domain: Box<dyn Domain>) -> Self {
        KillEscapersBoundary { domain }
    }
}

impl BoundaryCondition for KillEscapersBoundary {
    fn initialize(&mut self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&mut self, storage: &mut Storage) -> ImpactResult<()> {
        let escaped: Vec<usize> = {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            (0..positions.len())
                .filter(|&i| !self.domain.contains(positions[i]))
                .collect()
        };
        if !escaped.is_empty() {
            storage.remove(&escaped, RemoveFlags::sorted_propagate());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OrderEnum;

    fn particle_storage(positions: Vec<Vector>) -> Storage {
        let mut storage = Storage::new();
        let n = positions.len();
        storage
            .insert(QuantityId::Position, OrderEnum::Second, positions)
            .unwrap();
        storage
            .insert_uniform(QuantityId::Mass, OrderEnum::Zero, 1.0_f64)
            .unwrap();
        storage
            .insert(QuantityId::Flag, OrderEnum::Zero, vec![0_u64; n])
            .unwrap();
        storage
    }

    #[test]
    fn test_spherical_domain_geometry() {
        let domain = SphericalDomain::new(Vector::zero(), 2.0);
        assert!(domain.contains(Vector::new(1.0, 0.0, 0.0)));
        assert!(!domain.contains(Vector::new(2.5, 0.0, 0.0)));
        assert!((domain.distance_to_boundary(Vector::new(1.0, 0.0, 0.0)) - 1.0).abs() < 1e-12);
        let mirrored = domain.mirror(Vector::new(1.5, 0.0, 0.0));
        assert!((mirrored[X] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_block_domain_geometry() {
        let domain = BlockDomain::new(Vector::zero(), Vector::new(4.0, 2.0, 2.0));
        assert!(domain.contains(Vector::new(1.9, 0.0, 0.0)));
        assert!(!domain.contains(Vector::new(0.0, 1.5, 0.0)));
        // nearest face is +y
        let normal = domain.normal(Vector::new(0.0, 0.9, 0.0));
        assert_eq!(normal, Vector::new(0.0, 1.0, 0.0));
        assert_eq!(domain.volume().unwrap(), 16.0);
    }

    #[test]
    fn test_half_space_volume_is_invalid_setup() {
        let domain = HalfSpaceDomain::new(0.0);
        assert!(matches!(
            domain.volume(),
            Err(ImpactError::InvalidSetup(_))
        ));
    }

    #[test]
    fn test_ghosts_cleared_on_repeated_initialize() {
        let mut storage = particle_storage(vec![
            Vector::with_h(1.8, 0.0, 0.0, 0.5),
            Vector::with_h(0.0, 0.0, 0.0, 0.5),
        ]);
        let mut boundary =
            GhostParticles::new(Box::new(SphericalDomain::new(Vector::zero(), 2.0)), 2.0);
        boundary.initialize(&mut storage).unwrap();
        let after_first = storage.particle_count();
        assert_eq!(after_first, 3); // one ghost for the near-boundary particle
        boundary.initialize(&mut storage).unwrap();
        // repeated initialize must not double the ghosts
        assert_eq!(storage.particle_count(), after_first);
        boundary.finalize(&mut storage).unwrap();
        assert_eq!(storage.particle_count(), 2);
    }

    #[test]
    fn test_ghost_velocity_mirrored() {
        let mut storage = particle_storage(vec![Vector::with_h(1.8, 0.0, 0.0, 0.5)]);
        storage.dt_mut::<Vector>(QuantityId::Position).unwrap()[0] = Vector::new(1.0, 0.5, 0.0);
        let mut boundary =
            GhostParticles::new(Box::new(SphericalDomain::new(Vector::zero(), 2.0)), 2.0);
        boundary.initialize(&mut storage).unwrap();
        let velocities = storage.dt::<Vector>(QuantityId::Position).unwrap();
        // normal (x) component flipped, tangential kept
        assert!((velocities[1][X] + 1.0).abs() < 1e-12);
        assert!((velocities[1][Y] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_periodic_wrap() {
        let length = 10.0;
        let domain = BlockDomain::new(
            Vector::new(length / 2.0, length / 2.0, length / 2.0),
            Vector::new(length, length, length),
        );
        let eps = 0.1;
        let mut storage =
            particle_storage(vec![Vector::with_h(length - eps, 5.0, 5.0, 0.001)]);
        // particle has already moved past the face by v dt - eps
        let dt = 0.5;
        let velocity = 1.0;
        storage.value_mut::<Vector>(QuantityId::Position).unwrap()[0][X] =
            length - eps + velocity * dt;
        let mut boundary = PeriodicBoundary::new(domain, 2.0);
        boundary.finalize(&mut storage).unwrap();
        let wrapped = storage.value::<Vector>(QuantityId::Position).unwrap()[0][X];
        assert!((wrapped - (velocity * dt - eps)).abs() < 1e-12);
    }

    #[test]
    fn test_periodic_ghosts_on_opposite_face() {
        let domain = BlockDomain::new(
            Vector::new(5.0, 5.0, 5.0),
            Vector::new(10.0, 10.0, 10.0),
        );
        let mut storage = particle_storage(vec![Vector::with_h(0.2, 5.0, 5.0, 0.5)]);
        let mut boundary = PeriodicBoundary::new(domain, 2.0);
        boundary.initialize(&mut storage).unwrap();
        assert_eq!(storage.particle_count(), 2);
        let ghost = storage.value::<Vector>(QuantityId::Position).unwrap()[1];
        assert!((ghost[X] - 10.2).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_plane_projects_below() {
        let mut storage = particle_storage(vec![Vector::with_h(0.0, 0.0, -0.3, 0.5)]);
        let mut boundary = SymmetricPlaneBoundary::new(2.0);
        boundary.finalize(&mut storage).unwrap();
        let z = storage.value::<Vector>(QuantityId::Position).unwrap()[0][Z];
        assert!((z - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_kill_escapers_removes_and_propagates() {
        let mut storage = particle_storage(vec![
            Vector::with_h(0.0, 0.0, 0.0, 0.1),
            Vector::with_h(5.0, 0.0, 0.0, 0.1),
        ]);
        let mut boundary =
            KillEscapersBoundary::new(Box::new(SphericalDomain::new(Vector::zero(), 2.0)));
        boundary.finalize(&mut storage).unwrap();
        assert_eq!(storage.particle_count(), 1);
    }

    #[test]
    fn test_frozen_particles_zero_derivatives() {
        let mut storage = particle_storage(vec![
            Vector::with_h(1.9, 0.0, 0.0, 0.5),
            Vector::with_h(0.0, 0.0, 0.0, 0.5),
        ]);
        {
            let acceleration = storage.d2t_mut::<Vector>(QuantityId::Position).unwrap();
            acceleration[0] = Vector::new(1.0, 1.0, 1.0);
            acceleration[1] = Vector::new(1.0, 1.0, 1.0);
        }
        let mut boundary = FrozenParticles::new(
            Some(Box::new(SphericalDomain::new(Vector::zero(), 2.0))),
            1.0,
            Vec::new(),
        );
        boundary.finalize(&mut storage).unwrap();
        let acceleration = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        assert_eq!(acceleration[0], Vector::zero());
        assert_eq!(acceleration[1], Vector::new(1.0, 1.0, 1.0));
    }
}
