// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Time Stepping
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Explicit integrators and timestep criteria.
//!
//! Quantities advance by their stored derivatives; material-declared
//! ranges clamp values after each step and zero the derivative when the
//! clamp engaged. The timestep is the minimum over the enabled
//! criteria, reported together with the criterion that produced it.

use crate::solver::Solver;
use crate::scheduler::Scheduler;
use crate::storage::{OrderEnum, QuantityData, QuantityId, Storage};
use impact_math::{Interval, TracelessTensor, Vector};
use impact_types::config::TimesteppingConfig;
use impact_types::error::ImpactResult;
use impact_types::stats::{CriterionEnum, Statistics};

const DERIVATIVE_EPS: f64 = 1.0e-30;

/// Quantities participating in the derivative criterion.
const DERIVATIVE_QUANTITIES: [QuantityId; 4] = [
    QuantityId::Density,
    QuantityId::Energy,
    QuantityId::Damage,
    QuantityId::DeviatoricStress,
];

/// Timestep selection: min over Courant, derivative and acceleration
/// criteria, capped by the maximal step.
pub struct TimeStepCriterion {
    courant_factor: f64,
    derivative_factor: f64,
    acceleration_factor: f64,
}

impl TimeStepCriterion {
    pub fn new(config: &TimesteppingConfig) -> Self {
        TimeStepCriterion {
            courant_factor: config.courant_factor,
            derivative_factor: config.derivative_factor,
            acceleration_factor: config.acceleration_factor,
        }
    }

    pub fn compute(
        &self,
        storage: &Storage,
        max_dt: f64,
    ) -> ImpactResult<(f64, CriterionEnum)> {
        let mut best = (max_dt, CriterionEnum::Maximal);

        if self.courant_factor > 0.0 {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            if let Ok(sound_speed) = storage.value::<f64>(QuantityId::SoundSpeed) {
                let mut courant = f64::INFINITY;
                for (r, cs) in positions.iter().zip(sound_speed) {
                    if *cs > 0.0 {
                        courant = courant.min(r.h() / cs);
                    }
                }
                let dt = self.courant_factor * courant;
                if dt < best.0 {
                    best = (dt, CriterionEnum::Courant);
                }
            }
        }

        if self.acceleration_factor > 0.0 {
            let positions = storage.value::<Vector>(QuantityId::Position)?;
            let acceleration = storage.d2t::<Vector>(QuantityId::Position)?;
            let mut shortest = f64::INFINITY;
            for (r, a) in positions.iter().zip(acceleration) {
                let magnitude = impact_math::vector::length(*a);
                if magnitude > 0.0 {
                    shortest = shortest.min((r.h() / magnitude).sqrt());
                }
            }
            let dt = self.acceleration_factor * shortest;
            if dt < best.0 {
                best = (dt, CriterionEnum::Acceleration);
            }
        }

        if self.derivative_factor > 0.0 {
            let mut shortest = f64::INFINITY;
            for mat_index in 0..storage.material_count() {
                let range = storage.material_range(mat_index);
                let material = match storage.material(mat_index) {
                    Some(material) => material,
                    None => continue,
                };
                for id in DERIVATIVE_QUANTITIES {
                    if !storage.has(id) {
                        continue;
                    }
                    let minimal = material.minimal(id);
                    match storage.quantity(id)?.data() {
                        QuantityData::Scalar(buffers) => {
                            for i in range.clone() {
                                let value = buffers.values[i].abs();
                                if value < minimal {
                                    continue; // criterion disabled below scale
                                }
                                let derivative = buffers.dt[i].abs();
                                shortest =
                                    shortest.min((value + minimal) / (derivative + DERIVATIVE_EPS));
                            }
                        }
                        QuantityData::TracelessTensor(buffers) => {
                            for i in range.clone() {
                                let value = buffers.values[i].max_abs_component();
                                if value < minimal {
                                    continue;
                                }
                                let derivative = buffers.dt[i].max_abs_component();
                                shortest =
                                    shortest.min((value + minimal) / (derivative + DERIVATIVE_EPS));
                            }
                        }
                        _ => {}
                    }
                }
            }
            let dt = self.derivative_factor * shortest;
            if dt < best.0 {
                best = (dt, CriterionEnum::Derivative);
            }
        }

        Ok(best)
    }
}

/// Clamp a first-order scalar buffer, zeroing derivatives of clamped
/// entries.
fn clamp_scalar(values: &mut [f64], derivatives: &mut [f64], range: Interval, rows: std::ops::Range<usize>) {
    if range.is_unbounded() {
        return;
    }
    for i in rows {
        let clamped = range.clamp(values[i]);
        if clamped != values[i] {
            values[i] = clamped;
            derivatives[i] = 0.0;
        }
    }
}

fn clamp_traceless(
    values: &mut [TracelessTensor],
    derivatives: &mut [TracelessTensor],
    range: Interval,
    rows: std::ops::Range<usize>,
) {
    if range.is_unbounded() {
        return;
    }
    for i in rows {
        let clamped = values[i].clamp(range.lower(), range.upper());
        if clamped != values[i] {
            values[i] = clamped;
            derivatives[i] = TracelessTensor::null();
        }
    }
}

/// Advance every quantity by one Euler step. Positions advance only
/// when the solver does not own the position update (hard-sphere runs),
/// and use the XSPH-corrected velocity when present.
fn advance_quantities(
    storage: &mut Storage,
    dt: f64,
    advance_positions: bool,
) -> ImpactResult<()> {
    let xsph: Option<Vec<Vector>> = if storage.has(QuantityId::XsphVelocity) {
        Some(storage.value::<Vector>(QuantityId::XsphVelocity)?.to_vec())
    } else {
        None
    };
    for id in storage.ids() {
        let order = storage.quantity(id)?.order();
        match order {
            OrderEnum::Zero => continue,
            OrderEnum::First => match storage.quantity_mut(id)?.data_mut() {
                QuantityData::Scalar(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.values[i] += buffers.dt[i] * dt;
                    }
                }
                QuantityData::Vector(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.values[i] += buffers.dt[i] * dt;
                    }
                }
                QuantityData::SymmetricTensor(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.values[i] += buffers.dt[i] * dt;
                    }
                }
                QuantityData::TracelessTensor(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.values[i] += buffers.dt[i] * dt;
                    }
                }
                QuantityData::Index(_) => {}
            },
            OrderEnum::Second => match storage.quantity_mut(id)?.data_mut() {
                QuantityData::Vector(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.dt[i] += buffers.d2t[i] * dt;
                    }
                    if id != QuantityId::Position || advance_positions {
                        for i in 0..buffers.values.len() {
                            let mut velocity = buffers.dt[i];
                            if id == QuantityId::Position {
                                if let Some(xsph) = &xsph {
                                    velocity = velocity + xsph[i];
                                }
                            }
                            buffers.values[i] += velocity * dt;
                        }
                    }
                }
                QuantityData::Scalar(buffers) => {
                    for i in 0..buffers.values.len() {
                        buffers.dt[i] += buffers.d2t[i] * dt;
                        buffers.values[i] += buffers.dt[i] * dt;
                    }
                }
                _ => {}
            },
        }
    }
    clamp_to_material_ranges(storage)
}

fn clamp_to_material_ranges(storage: &mut Storage) -> ImpactResult<()> {
    for mat_index in 0..storage.material_count() {
        let rows = storage.material_range(mat_index);
        let Some(material) = storage.material(mat_index) else {
            continue;
        };
        let clamped_ids: Vec<(QuantityId, Interval)> = storage
            .ids()
            .into_iter()
            .map(|id| (id, material.range(id)))
            .filter(|(_, range)| !range.is_unbounded())
            .collect();
        for (id, range) in clamped_ids {
            match storage.quantity_mut(id)?.data_mut() {
                QuantityData::Scalar(buffers) => {
                    let (values, derivatives) = (&mut buffers.values, &mut buffers.dt);
                    if derivatives.is_empty() {
                        continue;
                    }
                    clamp_scalar(values, derivatives, range, rows.clone());
                }
                QuantityData::TracelessTensor(buffers) => {
                    let (values, derivatives) = (&mut buffers.values, &mut buffers.dt);
                    if derivatives.is_empty() {
                        continue;
                    }
                    clamp_traceless(values, derivatives, range, rows.clone());
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Snapshot of the highest derivatives, for the corrector pass.
enum HighestSnapshot {
    Scalar(Vec<f64>),
    Vector(Vec<Vector>),
    SymmetricTensor(Vec<impact_math::SymmetricTensor>),
    TracelessTensor(Vec<TracelessTensor>),
    Index,
}

fn snapshot_highest(storage: &Storage) -> ImpactResult<Vec<(QuantityId, HighestSnapshot)>> {
    let mut snapshots = Vec::new();
    for id in storage.ids() {
        let quantity = storage.quantity(id)?;
        if quantity.order() == OrderEnum::Zero {
            continue;
        }
        let snapshot = match quantity.data() {
            QuantityData::Scalar(b) => HighestSnapshot::Scalar(match quantity.order() {
                OrderEnum::Second => b.d2t.clone(),
                _ => b.dt.clone(),
            }),
            QuantityData::Vector(b) => HighestSnapshot::Vector(match quantity.order() {
                OrderEnum::Second => b.d2t.clone(),
                _ => b.dt.clone(),
            }),
            QuantityData::SymmetricTensor(b) => {
                HighestSnapshot::SymmetricTensor(match quantity.order() {
                    OrderEnum::Second => b.d2t.clone(),
                    _ => b.dt.clone(),
                })
            }
            QuantityData::TracelessTensor(b) => {
                HighestSnapshot::TracelessTensor(match quantity.order() {
                    OrderEnum::Second => b.d2t.clone(),
                    _ => b.dt.clone(),
                })
            }
            QuantityData::Index(_) => HighestSnapshot::Index,
        };
        snapshots.push((id, snapshot));
    }
    Ok(snapshots)
}

/// q += 0.5 (D2 - D1) dt for the buffer driven by the highest
/// derivative; positions also pick up the second-order correction.
fn apply_corrections(
    storage: &mut Storage,
    predictions: &[(QuantityId, HighestSnapshot)],
    dt: f64,
    advance_positions: bool,
) -> ImpactResult<()> {
    for (id, snapshot) in predictions {
        let order = storage.quantity(*id)?.order();
        match (storage.quantity_mut(*id)?.data_mut(), snapshot) {
            (QuantityData::Scalar(b), HighestSnapshot::Scalar(old)) => {
                if b.values.len() != old.len() {
                    continue; // structure changed mid-step
                }
                match order {
                    OrderEnum::First => {
                        for i in 0..b.values.len() {
                            b.values[i] += 0.5 * (b.dt[i] - old[i]) * dt;
                        }
                    }
                    OrderEnum::Second => {
                        for i in 0..b.values.len() {
                            let delta = 0.5 * (b.d2t[i] - old[i]) * dt;
                            b.dt[i] += delta;
                            b.values[i] += 0.5 * delta * dt;
                        }
                    }
                    OrderEnum::Zero => {}
                }
            }
            (QuantityData::Vector(b), HighestSnapshot::Vector(old)) => {
                if b.values.len() != old.len() {
                    continue;
                }
                match order {
                    OrderEnum::First => {
                        for i in 0..b.values.len() {
                            b.values[i] += (b.dt[i] - old[i]) * (0.5 * dt);
                        }
                    }
                    OrderEnum::Second => {
                        for i in 0..b.values.len() {
                            let delta = (b.d2t[i] - old[i]) * (0.5 * dt);
                            b.dt[i] += delta;
                            if *id != QuantityId::Position || advance_positions {
                                b.values[i] += delta * (0.5 * dt);
                            }
                        }
                    }
                    OrderEnum::Zero => {}
                }
            }
            (QuantityData::SymmetricTensor(b), HighestSnapshot::SymmetricTensor(old)) => {
                if b.values.len() == old.len() && order == OrderEnum::First {
                    for i in 0..b.values.len() {
                        b.values[i] += (b.dt[i] - old[i]) * (0.5 * dt);
                    }
                }
            }
            (QuantityData::TracelessTensor(b), HighestSnapshot::TracelessTensor(old)) => {
                if b.values.len() == old.len() && order == OrderEnum::First {
                    for i in 0..b.values.len() {
                        b.values[i] += (b.dt[i] - old[i]) * (0.5 * dt);
                    }
                }
            }
            _ => {}
        }
    }
    clamp_to_material_ranges(storage)
}

/// First-order explicit Euler stepping.
pub struct EulerExplicit {
    dt: f64,
    max_dt: f64,
    criterion: TimeStepCriterion,
}

impl EulerExplicit {
    pub fn new(config: &TimesteppingConfig) -> Self {
        EulerExplicit {
            dt: config.initial_dt,
            max_dt: config.max_dt,
            criterion: TimeStepCriterion::new(config),
        }
    }

    pub fn current_dt(&self) -> f64 {
        self.dt
    }

    pub fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        let dt = self.dt;
        storage.init();
        solver.integrate(scheduler, storage, stats)?;
        advance_quantities(storage, dt, solver.advances_positions())?;
        solver.collide(scheduler, storage, stats, dt)?;

        stats.timestep = dt;
        stats.run_time += dt;
        let (next_dt, criterion) = self.criterion.compute(storage, self.max_dt)?;
        stats.timestep_criterion = criterion;
        self.dt = next_dt;
        Ok(())
    }
}

/// Predictor-corrector: an Euler prediction, re-evaluated derivatives,
/// and a correction towards the derivative average.
pub struct PredictorCorrector {
    dt: f64,
    max_dt: f64,
    criterion: TimeStepCriterion,
}

impl PredictorCorrector {
    pub fn new(config: &TimesteppingConfig) -> Self {
        PredictorCorrector {
            dt: config.initial_dt,
            max_dt: config.max_dt,
            criterion: TimeStepCriterion::new(config),
        }
    }

    pub fn current_dt(&self) -> f64 {
        self.dt
    }

    pub fn step(
        &mut self,
        scheduler: &dyn Scheduler,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
    ) -> ImpactResult<()> {
        let dt = self.dt;
        // predictor
        storage.init();
        solver.integrate(scheduler, storage, stats)?;
        let predictions = snapshot_highest(storage)?;
        advance_quantities(storage, dt, solver.advances_positions())?;
        // corrector derivatives at the predicted state
        storage.init();
        solver.integrate(scheduler, storage, stats)?;
        apply_corrections(storage, &predictions, dt, solver.advances_positions())?;
        solver.collide(scheduler, storage, stats, dt)?;

        stats.timestep = dt;
        stats.run_time += dt;
        let (next_dt, criterion) = self.criterion.compute(storage, self.max_dt)?;
        stats.timestep_criterion = criterion;
        self.dt = next_dt;
        Ok(())
    }
}
