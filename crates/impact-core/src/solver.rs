// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Solver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Top-level solvers and the run loop.
//!
//! `SphSolver` drives the derivative pipeline: material updates,
//! boundary initialization, finder build, the (possibly two-phase)
//! parallel pair loop with thread-local accumulators, deterministic
//! reduction, gravity, and term/material/boundary finalization.
//! `HardSphereSolver` couples tree gravity with the hard-sphere
//! collision resolver; it owns the position advance, so the integrator
//! leaves position values to it.

use crate::boundary::BoundaryCondition;
use crate::collision::CollisionResolver;
use crate::derivatives::{DerivativeHolder, DerivativeInput, Phase};
use crate::equations::EquationTerm;
use crate::finders::{rank_from_key, NeighbourRecord, SpatialFinder};
use crate::gravity::Gravity;
use crate::scheduler::{Scheduler, ThreadLocal};
use crate::storage::{QuantityId, Storage};
use impact_math::kernel::{Kernel, LutKernel, SymmetrizedKernel};
use impact_math::vector::Vector;
use impact_types::error::{ImpactError, ImpactResult};
use impact_types::stats::{MinMaxMean, Statistics};
use std::time::Instant;

pub trait Solver: Send {
    /// Compute all derivatives for the current state.
    fn integrate(
        &mut self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        stats: &mut Statistics,
    ) -> ImpactResult<()>;

    /// Resolve collisions of the step that was just integrated.
    fn collide(
        &mut self,
        _scheduler: &dyn Scheduler,
        _storage: &mut Storage,
        _stats: &mut Statistics,
        _dt: f64,
    ) -> ImpactResult<()> {
        Ok(())
    }

    /// Whether the generic integrator advances position values; the
    /// hard-sphere solver owns that advance itself.
    fn advances_positions(&self) -> bool {
        true
    }
}

/// Per-thread scratch of the pair loop.
struct LoopScratch {
    accumulated: crate::derivatives::Accumulated,
    records: Vec<NeighbourRecord>,
    neighbours: Vec<usize>,
    grads: Vec<Vector>,
    neighbour_counts: MinMaxMean,
}

pub struct SphSolver {
    kernel: LutKernel,
    finder: Box<dyn SpatialFinder>,
    holder: DerivativeHolder,
    terms: Vec<Box<dyn EquationTerm>>,
    boundary: Box<dyn BoundaryCondition>,
    gravity: Option<Box<dyn Gravity>>,
    granularity: usize,
}

impl SphSolver {
    pub fn new(
        kernel: LutKernel,
        finder: Box<dyn SpatialFinder>,
        terms: Vec<Box<dyn EquationTerm>>,
        boundary: Box<dyn BoundaryCondition>,
        gravity: Option<Box<dyn Gravity>>,
        granularity: usize,
    ) -> ImpactResult<Self> {
        let gravity_terms = terms.iter().filter(|term| term.is_gravity()).count();
        if gravity_terms > 1 || (gravity.is_some() && gravity_terms > 0) {
            return Err(ImpactError::invalid_setup(
                "multiple gravity solvers registered".to_string(),
            ));
        }
        let mut holder = DerivativeHolder::new();
        for term in &terms {
            term.set_derivatives(&mut holder)?;
        }
        Ok(SphSolver {
            kernel,
            finder,
            holder,
            terms,
            boundary,
            gravity,
            granularity: granularity.max(1),
        })
    }

    /// Create the quantities of all registered terms.
    pub fn create(&self, storage: &mut Storage) -> ImpactResult<()> {
        for term in &self.terms {
            term.create(storage)?;
        }
        Ok(())
    }

    fn update_materials(
        storage: &mut Storage,
        finalize: bool,
    ) -> ImpactResult<()> {
        for index in 0..storage.material_count() {
            if let Some(material) = storage.take_material(index) {
                let range = storage.material_range(index);
                let result = if finalize {
                    material.finalize(storage, range)
                } else {
                    material.initialize(storage, range)
                };
                storage.put_material(index, material);
                result?;
            }
        }
        Ok(())
    }

    fn run_phase(
        &self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        phase: Phase,
        symmetric: bool,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        let count = storage.particle_count();
        let locals: ThreadLocal<LoopScratch> = ThreadLocal::new(scheduler, || {
            let mut accumulated = self.holder.make_accumulated();
            accumulated.initialize(count);
            LoopScratch {
                accumulated,
                records: Vec::new(),
                neighbours: Vec::new(),
                grads: Vec::new(),
                neighbour_counts: MinMaxMean::default(),
            }
        });

        {
            let r = storage.value::<Vector>(QuantityId::Position)?;
            let v = storage.dt::<Vector>(QuantityId::Position)?;
            let m = storage.value::<f64>(QuantityId::Mass)?;
            let rho = storage.value::<f64>(QuantityId::Density)?;
            let p = storage.value::<f64>(QuantityId::Pressure)?;
            let u = storage.value::<f64>(QuantityId::Energy)?;
            let cs = storage.value::<f64>(QuantityId::SoundSpeed)?;
            let flag = if storage.has(QuantityId::Flag) {
                Some(storage.value::<u64>(QuantityId::Flag)?)
            } else {
                None
            };
            let stress = if storage.has(QuantityId::DeviatoricStress) {
                Some(storage.value::<impact_math::TracelessTensor>(QuantityId::DeviatoricStress)?)
            } else {
                None
            };
            let damage = if storage.has(QuantityId::Damage) {
                Some(storage.value::<f64>(QuantityId::Damage)?)
            } else {
                None
            };
            let reduce = if storage.has(QuantityId::StressReducing) {
                Some(storage.value::<f64>(QuantityId::StressReducing)?)
            } else {
                None
            };
            let correction = if phase == Phase::Evaluation
                && storage.has(QuantityId::AngularMomentumCorrection)
            {
                Some(
                    storage.value::<impact_math::SymmetricTensor>(
                        QuantityId::AngularMomentumCorrection,
                    )?,
                )
            } else {
                None
            };
            let input = DerivativeInput {
                r,
                v,
                m,
                rho,
                p,
                u,
                cs,
                flag,
                stress,
                damage,
                reduce,
                correction,
            };

            let pair_kernel = SymmetrizedKernel::new(&self.kernel);
            let support = self.kernel.radius();
            let finder = self.finder.as_ref();
            let holder = &self.holder;
            scheduler.parallel_for(0, count, self.granularity, &|range| {
                locals.with(scheduler, |scratch| {
                    for i in range.clone() {
                        scratch.records.clear();
                        let radius = support * r[i].h();
                        if symmetric {
                            finder.find_lower_rank(i, radius, &mut scratch.records);
                        } else {
                            finder.find_all(i, radius, &mut scratch.records);
                        }
                        scratch.neighbours.clear();
                        scratch.grads.clear();
                        for record in &scratch.records {
                            if record.index == i {
                                continue;
                            }
                            scratch.neighbours.push(record.index);
                            scratch.grads.push(pair_kernel.grad(r[i], r[record.index]));
                        }
                        if phase == Phase::Evaluation {
                            scratch
                                .neighbour_counts
                                .accumulate(scratch.neighbours.len() as f64);
                        }
                        holder.eval_phase(
                            phase,
                            i,
                            &scratch.neighbours,
                            &scratch.grads,
                            &input,
                            &mut scratch.accumulated,
                            symmetric,
                        );
                    }
                });
            });
        }

        // deterministic reduction in thread-index order
        let mut scratches = locals.into_values();
        let mut main = self.holder.make_accumulated();
        main.initialize(count);
        let buffers: Vec<crate::derivatives::Accumulated> = scratches
            .iter_mut()
            .map(|scratch| std::mem::take(&mut scratch.accumulated))
            .collect();
        main.sum(&buffers);
        main.store_into(storage, phase)?;

        if phase == Phase::Evaluation {
            for scratch in &scratches {
                stats.neighbour_counts.merge(&scratch.neighbour_counts);
            }
        }
        Ok(())
    }
}

impl Solver for SphSolver {
    fn integrate(
        &mut self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        let timer = Instant::now();

        // EoS evaluation and yield reduction, then ghosts copying the
        // fresh state
        Self::update_materials(storage, false)?;
        self.boundary.initialize(storage)?;

        let count = storage.particle_count();
        let symmetric = self.holder.is_symmetric();
        {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            self.finder.build(scheduler, positions);
            if symmetric {
                // pairs are visited once, from the larger-h side
                let lengths: Vec<f64> = positions.iter().map(|r| r.h()).collect();
                self.finder
                    .set_rank(Some(rank_from_key(count, |i| lengths[i])));
            } else {
                self.finder.set_rank(None);
            }
        }

        for term in &self.terms {
            term.initialize(storage)?;
        }

        if self.holder.has_phase(Phase::Precomputation) {
            self.run_phase(scheduler, storage, Phase::Precomputation, symmetric, stats)?;
            for term in &self.terms {
                term.after_precomputation(storage)?;
            }
        }
        self.run_phase(scheduler, storage, Phase::Evaluation, symmetric, stats)?;

        if let Some(gravity) = &mut self.gravity {
            gravity.build(scheduler, storage)?;
            gravity.eval_all(scheduler, storage)?;
        }

        for term in &self.terms {
            term.finalize(storage)?;
        }
        // damage growth reads the finalized stress state
        Self::update_materials(storage, true)?;
        self.boundary.finalize(storage)?;

        stats.evaluation_time_ms = timer.elapsed().as_secs_f64() * 1000.0;
        Ok(())
    }
}

/// Gravity-only N-body solver with hard-sphere collisions; the h lane
/// of a position is the body radius and does not evolve.
pub struct HardSphereSolver {
    gravity: Box<dyn Gravity>,
    resolver: CollisionResolver,
}

impl HardSphereSolver {
    pub fn new(gravity: Box<dyn Gravity>, resolver: CollisionResolver) -> Self {
        HardSphereSolver { gravity, resolver }
    }

    /// Insert the rigid-body quantities: spherical moments of inertia
    /// and zero angular velocities.
    pub fn create_rigid_body_quantities(storage: &mut Storage) -> ImpactResult<()> {
        let inertia: Vec<impact_math::SymmetricTensor> = {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            let masses = storage.value::<f64>(QuantityId::Mass)?;
            positions
                .iter()
                .zip(masses)
                .map(|(r, m)| {
                    impact_math::SymmetricTensor::isotropic(0.4 * m * r.h() * r.h())
                })
                .collect()
        };
        storage.insert(
            QuantityId::MomentOfInertia,
            crate::storage::OrderEnum::First,
            inertia,
        )?;
        storage.insert_uniform(
            QuantityId::AngularVelocity,
            crate::storage::OrderEnum::First,
            Vector::zero(),
        )
    }

    /// Torque-free rigid-body update: dI/dt follows the frame rotation
    /// and the spin precesses as I dw/dt + dI/dt w = 0.
    fn integrate_rigid_bodies(storage: &mut Storage) -> ImpactResult<()> {
        use impact_math::affine::AffineMatrix;
        if !storage.has(QuantityId::AngularVelocity) || !storage.has(QuantityId::MomentOfInertia) {
            return Ok(());
        }
        let omega: Vec<Vector> = storage.value::<Vector>(QuantityId::AngularVelocity)?.to_vec();
        let (inertia, inertia_rate, _) = storage
            .all_buffers_mut::<impact_math::SymmetricTensor>(QuantityId::MomentOfInertia)?;
        let mut spin_rate = vec![Vector::zero(); omega.len()];
        for i in 0..omega.len() {
            let spin = AffineMatrix::cross_product_operator(omega[i]);
            let inertia_matrix = AffineMatrix::from_symmetric(&inertia[i]);
            let rate = spin * inertia_matrix - inertia_matrix * spin;
            inertia_rate[i] = rate.symmetrize();
            spin_rate[i] = -(inertia[i].inverse() * (inertia_rate[i] * omega[i]));
        }
        let omega_rate = storage.dt_mut::<Vector>(QuantityId::AngularVelocity)?;
        omega_rate.clone_from_slice(&spin_rate);
        Ok(())
    }
}

impl Solver for HardSphereSolver {
    fn integrate(
        &mut self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        _stats: &mut Statistics,
    ) -> ImpactResult<()> {
        self.gravity.build(scheduler, storage)?;
        self.gravity.eval_all(scheduler, storage)?;
        // radii are constant: null the smoothing-length derivatives
        {
            let (_, velocities, accelerations) =
                storage.all_buffers_mut::<Vector>(QuantityId::Position)?;
            for i in 0..velocities.len() {
                velocities[i].set_h(0.0);
                accelerations[i].set_h(0.0);
            }
        }
        Self::integrate_rigid_bodies(storage)
    }

    fn collide(
        &mut self,
        scheduler: &dyn Scheduler,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: f64,
    ) -> ImpactResult<()> {
        self.resolver.resolve(scheduler, storage, dt, stats)
    }

    fn advances_positions(&self) -> bool {
        false
    }
}

// ── configuration factories ──────────────────────────────────────────

pub fn make_scheduler(
    config: &impact_types::config::SchedulerConfig,
) -> ImpactResult<Box<dyn Scheduler>> {
    if config.threads == 1 {
        Ok(Box::new(crate::scheduler::SequentialScheduler))
    } else {
        Ok(Box::new(crate::scheduler::RayonScheduler::new(
            config.threads,
        )?))
    }
}

pub fn make_finder(finder: impact_types::config::FinderEnum) -> Box<dyn SpatialFinder> {
    use impact_types::config::FinderEnum;
    match finder {
        FinderEnum::KdTree => Box::new(crate::finders::KdTree::new()),
        FinderEnum::UniformGrid => Box::new(crate::finders::UniformGridFinder::new()),
        FinderEnum::Bvh => Box::new(crate::finders::BvhFinder::new()),
    }
}

pub fn make_gravity(
    config: &impact_types::config::GravityConfig,
) -> ImpactResult<Option<Box<dyn Gravity>>> {
    use impact_types::config::GravityEnum;
    Ok(match config.solver {
        GravityEnum::None => None,
        GravityEnum::BruteForce => Some(Box::new(crate::gravity::BruteForceGravity::new(
            config.constant,
        ))),
        GravityEnum::BarnesHut => Some(Box::new(crate::gravity::BarnesHut::new(
            config.constant,
            config.opening_angle,
            config.leaf_size,
            config.order,
        )?)),
    })
}

pub fn make_collision_resolver(
    config: &impact_types::config::CollisionConfig,
    gravity_constant: f64,
) -> CollisionResolver {
    use crate::collision::{
        ElasticBounceHandler, MergeOrBounceHandler, NullCollisionHandler, PerfectMergingHandler,
        RepelHandler,
    };
    use impact_types::config::{CollisionHandlerEnum, OverlapHandlerEnum};
    let handler: Box<dyn crate::collision::CollisionHandler> = match config.handler {
        CollisionHandlerEnum::None => Box::new(NullCollisionHandler),
        CollisionHandlerEnum::ElasticBounce => Box::new(ElasticBounceHandler::new(
            config.restitution_normal,
            config.restitution_tangent,
        )),
        CollisionHandlerEnum::PerfectMerging => Box::new(PerfectMergingHandler),
        CollisionHandlerEnum::MergeOrBounce => Box::new(MergeOrBounceHandler::new(
            gravity_constant,
            config.merging_limit,
            config.restitution_normal,
            config.restitution_tangent,
        )),
    };
    let overlap_handler: Box<dyn crate::collision::CollisionHandler> =
        match config.overlap_handler {
            OverlapHandlerEnum::None => Box::new(NullCollisionHandler),
            OverlapHandlerEnum::Repel => Box::new(RepelHandler),
            OverlapHandlerEnum::ForceMerge => Box::new(PerfectMergingHandler),
        };
    CollisionResolver::new(handler, overlap_handler, config.allowed_overlap)
}

impl SphSolver {
    /// Assemble the standard SPH solver from the run configuration; the
    /// body configuration decides whether the strength terms are
    /// active.
    pub fn from_config(
        run: &impact_types::config::RunConfig,
        body: &impact_types::config::BodyConfig,
        boundary: Box<dyn BoundaryCondition>,
    ) -> ImpactResult<SphSolver> {
        use impact_types::config::{ArtificialViscosityEnum, YieldingEnum};
        let solid = body.rheology != YieldingEnum::None;
        let mut terms: Vec<Box<dyn EquationTerm>> = vec![
            Box::new(crate::equations::PressureForce),
            Box::new(crate::equations::ContinuityEquation::new(solid)),
        ];
        if run.sph.artificial_viscosity == ArtificialViscosityEnum::Standard {
            terms.push(Box::new(crate::equations::StandardAV::new(
                run.sph.av_alpha,
                run.sph.av_beta,
            )));
        }
        if solid {
            terms.push(Box::new(crate::equations::SolidStressForce::new(
                body.shear_modulus,
            )));
        }
        if run.sph.conserve_angular_momentum {
            terms.push(Box::new(crate::equations::AngularMomentumCorrection));
        }
        if run.sph.xsph_epsilon > 0.0 {
            terms.push(Box::new(crate::equations::XsphTerm::new(
                run.sph.xsph_epsilon,
            )));
        }
        if run.sph.adaptive_smoothing_length {
            terms.push(Box::new(crate::equations::AdaptiveSmoothingLength));
        }
        SphSolver::new(
            LutKernel::default(),
            make_finder(run.sph.finder),
            terms,
            boundary,
            make_gravity(&run.gravity)?,
            run.scheduler.granularity,
        )
    }
}

impl HardSphereSolver {
    pub fn from_config(run: &impact_types::config::RunConfig) -> ImpactResult<HardSphereSolver> {
        let gravity = make_gravity(&run.gravity)?.ok_or_else(|| {
            ImpactError::invalid_setup("the hard-sphere solver requires gravity".to_string())
        })?;
        Ok(HardSphereSolver::new(
            gravity,
            make_collision_resolver(&run.collision, run.gravity.constant),
        ))
    }
}

// ── run loop ─────────────────────────────────────────────────────────

/// Callbacks reported by the run loop; the default implementation is
/// inert.
pub trait RunCallbacks {
    fn on_setup(&mut self, _storage: &Storage, _stats: &Statistics) {}

    fn on_time_step(&mut self, _storage: &Storage, _stats: &Statistics) {}

    fn should_abort(&self) -> bool {
        false
    }
}

/// Callbacks that do nothing, for headless runs.
#[derive(Default)]
pub struct NullCallbacks;

impl RunCallbacks for NullCallbacks {}

pub enum Integrator {
    Euler(crate::timestepping::EulerExplicit),
    PredictorCorrector(crate::timestepping::PredictorCorrector),
}

impl Integrator {
    pub fn from_config(config: &impact_types::config::TimesteppingConfig) -> Self {
        match config.integrator {
            impact_types::config::TimesteppingEnum::Euler => {
                Integrator::Euler(crate::timestepping::EulerExplicit::new(config))
            }
            impact_types::config::TimesteppingEnum::PredictorCorrector => {
                Integrator::PredictorCorrector(crate::timestepping::PredictorCorrector::new(config))
            }
        }
    }

    pub fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        match self {
            Integrator::Euler(stepper) => stepper.step(scheduler, solver, storage, stats),
            Integrator::PredictorCorrector(stepper) => {
                stepper.step(scheduler, solver, storage, stats)
            }
        }
    }
}

/// Advance a storage until `end_time`, polling the abort callback each
/// step and terminating on the first numeric failure after finishing
/// the step's bookkeeping.
pub fn run_until(
    scheduler: &dyn Scheduler,
    integrator: &mut Integrator,
    solver: &mut dyn Solver,
    storage: &mut Storage,
    stats: &mut Statistics,
    end_time: f64,
    callbacks: &mut dyn RunCallbacks,
) -> ImpactResult<()> {
    callbacks.on_setup(storage, stats);
    while stats.run_time < end_time {
        if callbacks.should_abort() {
            break;
        }
        stats.next_step();
        integrator.step(scheduler, solver, storage, stats)?;
        if let Err(failure) = storage.validate_finite() {
            stats.failure = Some(failure.to_string());
            callbacks.on_time_step(storage, stats);
            return Err(failure);
        }
        callbacks.on_time_step(storage, stats);
    }
    Ok(())
}
